//! Bootstrap utilities for the sr_post binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LOG_ENV_VAR;

/// Filter used when SR_POST_LOG is unset or invalid. lapin logs every
/// channel and connection state change at info.
pub const DEFAULT_LOG_FILTER: &str = "info,lapin=warn";

/// Initialize tracing from SR_POST_LOG, falling back to [`DEFAULT_LOG_FILTER`].
///
/// Output goes to stderr so per-path results written to stdout by callers
/// stay parseable.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(log_filter(std::env::var(LOG_ENV_VAR).ok().as_deref()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}
