//! Broker transport capability.
//!
//! This module contains:
//! - `Transport` trait: the broker operations a session consumes
//! - Exchange declaration types
//! - Implementations: AMQP (RabbitMQ), Mock

use async_trait::async_trait;
use serde::Deserialize;

use crate::wire::WirePayload;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpTransport;
pub use mock::MockTransport;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The broker could not be reached or the connection was lost.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the operation (e.g. exchange type mismatch).
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// The operation failed in flight (e.g. negative publisher confirm).
    #[error("operation failed: {0}")]
    Failed(String),
}

/// Exchange type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    #[default]
    Topic,
    Direct,
    Fanout,
    Headers,
}

/// Exchange a session declares on init and deletes on cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExchangeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub exchange_type: ExchangeType,
    pub durable: bool,
}

impl Default for ExchangeSpec {
    fn default() -> Self {
        Self {
            name: "xs_guest".to_string(),
            exchange_type: ExchangeType::Topic,
            durable: true,
        }
    }
}

impl ExchangeSpec {
    /// Durable topic exchange with the given name.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Broker operations consumed by a session.
///
/// Implementations:
/// - `AmqpTransport`: RabbitMQ via lapin
/// - `MockTransport`: In-memory mock for testing
///
/// A transport is driven by one session at a time; `connect` precedes every
/// other call and `disconnect` releases whatever `connect` acquired.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    /// Declares the exchange. Idempotent at the broker for a matching spec.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), TransportError>;

    async fn delete_exchange(&self, name: &str) -> Result<(), TransportError>;

    /// Sends one message and resolves once the broker has accepted it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &WirePayload,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
