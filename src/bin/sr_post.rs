//! sr_post: advertise file changes to an AMQP exchange
//!
//! Each path argument is advertised from its current state: an existing
//! file as created, a missing one as removed.
//!
//! ## Configuration
//! - `sr_post.yaml` / SR_POST_CONFIG: configuration file (optional)
//! - SR_POST__*: per-key overrides (e.g. SR_POST__BROKER__URL)
//! - SR_POST_LOG: tracing filter (default: info)

use std::sync::Arc;

use tracing::info;

use sr_post::config::Config;
use sr_post::session::Session;
use sr_post::transport::AmqpTransport;
use sr_post::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        return Err("usage: sr_post PATH...".into());
    }

    let config = Config::load(None)?;
    let transport = Arc::new(AmqpTransport::new(config.broker.url.clone()));
    let mut session = Session::new(transport, config.session_settings());
    let poster = config.poster();

    info!(
        exchange = %config.exchange.name,
        paths = paths.len(),
        "sr_post started"
    );

    let summary = poster.post_paths(&mut session, &paths).await?;

    info!(posted = summary.posted, failed = summary.failed, "sr_post finished");

    if summary.failed > 0 {
        return Err(format!("{} of {} posts failed", summary.failed, paths.len()).into());
    }
    Ok(())
}
