//! Posting session: broker connection plus the declared exchange.
//!
//! Lifecycle is `Uninitialized -> Ready -> Closed`. `init` connects and
//! declares the exchange once; `cleanup` deletes the exchange and releases
//! the connection. A session is not reusable after `cleanup`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::advertisement::Advertisement;
use crate::error::{PostError, Result};
use crate::routing::RoutingKey;
use crate::transport::{ExchangeSpec, Transport, TransportError};
use crate::wire::WirePayload;

/// Default sender identity stamped on every advertisement.
pub const DEFAULT_SENDER: &str = "sr_post";

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        })
    }
}

/// Session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub exchange: ExchangeSpec,
    /// Sender identity placed in the `sender` header.
    pub sender: String,
    /// Extra connection attempts made by `init` before giving up.
    pub connect_retries: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            exchange: ExchangeSpec::default(),
            sender: DEFAULT_SENDER.to_string(),
            connect_retries: 0,
        }
    }
}

/// Backoff between connection attempts in `init`.
fn connect_backoff(retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(retries)
        .with_jitter()
}

/// Broker resources held for the duration of a posting campaign.
///
/// Publishing takes `&self`; lifecycle transitions take `&mut self`. The
/// transport is not synchronized for concurrent publishers beyond what the
/// implementation itself provides.
pub struct Session {
    transport: Arc<dyn Transport>,
    settings: SessionSettings,
    state: SessionState,
    exchange_declared: bool,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, settings: SessionSettings) -> Self {
        Self {
            transport,
            settings,
            state: SessionState::Uninitialized,
            exchange_declared: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn sender(&self) -> &str {
        &self.settings.sender
    }

    pub fn exchange(&self) -> &ExchangeSpec {
        &self.settings.exchange
    }

    pub fn exchange_declared(&self) -> bool {
        self.exchange_declared
    }

    /// Connects and declares the exchange. A no-op when already ready.
    pub async fn init(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready => {
                debug!(exchange = %self.settings.exchange.name, "Session already ready");
                return Ok(());
            }
            SessionState::Closed => {
                return Err(PostError::NotReady {
                    state: SessionState::Closed,
                })
            }
            SessionState::Uninitialized => {}
        }

        self.connect().await?;

        if !self.exchange_declared {
            let exchange = &self.settings.exchange;
            if let Err(e) = self.transport.declare_exchange(exchange).await {
                if let Err(disconnect_error) = self.transport.disconnect().await {
                    warn!(error = %disconnect_error, "Failed to disconnect after declare failure");
                }
                return Err(match e {
                    TransportError::Unavailable(message) => PostError::BrokerUnavailable(message),
                    TransportError::Rejected(message) | TransportError::Failed(message) => {
                        PostError::ExchangeDeclarationFailed {
                            exchange: exchange.name.clone(),
                            message,
                        }
                    }
                });
            }
            self.exchange_declared = true;
        }

        self.state = SessionState::Ready;
        info!(
            exchange = %self.settings.exchange.name,
            sender = %self.settings.sender,
            "Posting session ready"
        );
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let retries = self.settings.connect_retries;
        (|| self.transport.connect())
            .retry(connect_backoff(retries))
            .notify(|err: &TransportError, dur: Duration| {
                warn!(
                    error = %err,
                    delay = ?dur,
                    max_retries = retries,
                    "Broker connection failed, retrying"
                );
            })
            .await
            .map_err(|e| PostError::BrokerUnavailable(e.to_string()))
    }

    /// Encodes the advertisement and sends it to the exchange. One attempt, no retry.
    #[tracing::instrument(
        name = "session.publish",
        skip_all,
        fields(exchange = %self.settings.exchange.name, routing_key = %routing_key)
    )]
    pub async fn publish(&self, routing_key: &RoutingKey, advertisement: &Advertisement) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(PostError::NotReady { state: self.state });
        }

        let payload = WirePayload::encode(advertisement);
        self.transport
            .publish(&self.settings.exchange.name, routing_key.as_str(), &payload)
            .await
            .map_err(|e| PostError::PublishFailed(e.to_string()))?;

        debug!(
            identifier = %advertisement.identifier(),
            correlation = %advertisement.headers().correlation,
            "Published advertisement"
        );
        Ok(())
    }

    /// Deletes the exchange and disconnects. A no-op unless ready.
    ///
    /// The connection is released even when the exchange deletion fails; the
    /// first failure is returned and the session is closed either way.
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.state != SessionState::Ready {
            return Ok(());
        }
        self.state = SessionState::Closed;
        release(
            self.transport.as_ref(),
            &self.settings.exchange.name,
            self.exchange_declared,
        )
        .await
    }
}

async fn release(transport: &dyn Transport, exchange: &str, declared: bool) -> Result<()> {
    let mut first_error = None;

    if declared {
        if let Err(e) = transport.delete_exchange(exchange).await {
            warn!(exchange = %exchange, error = %e, "Failed to delete exchange");
            first_error = Some(PostError::ExchangeDeletionFailed {
                exchange: exchange.to_string(),
                message: e.to_string(),
            });
        }
    }

    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "Failed to disconnect from broker");
        first_error.get_or_insert(PostError::BrokerUnavailable(e.to_string()));
    }

    info!(exchange = %exchange, "Posting session closed");
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Ready {
            return;
        }
        self.state = SessionState::Closed;

        let transport = Arc::clone(&self.transport);
        let exchange = self.settings.exchange.name.clone();
        let declared = self.exchange_declared;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(exchange = %exchange, "Session dropped without cleanup, releasing in background");
                handle.spawn(async move {
                    let _ = release(transport.as_ref(), &exchange, declared).await;
                });
            }
            Err(_) => {
                warn!(exchange = %exchange, "Session dropped without cleanup outside a runtime, exchange left declared");
            }
        }
    }
}
