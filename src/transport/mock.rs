//! Mock transport implementation for testing.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ExchangeSpec, Transport, TransportError};
use crate::wire::WirePayload;

/// A message the mock accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: WirePayload,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connect_attempts: usize,
    connects: usize,
    disconnects: usize,
    declared: Vec<ExchangeSpec>,
    deleted: Vec<String>,
    published: Vec<PublishedMessage>,
    publish_attempts: usize,
    fail_connect: Option<TransportError>,
    connect_failures: VecDeque<TransportError>,
    fail_declare: Option<TransportError>,
    fail_delete: Option<TransportError>,
    publish_failures: VecDeque<TransportError>,
    fail_all_publishes: bool,
}

/// Mock transport for testing.
///
/// Clones share state, so a test can keep a handle after moving a clone into
/// a session.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<RwLock<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_connect(&self, error: Option<TransportError>) {
        self.state.write().await.fail_connect = error;
    }

    /// Fails the next connect; queued failures are consumed in order.
    pub async fn fail_next_connect(&self, error: TransportError) {
        self.state.write().await.connect_failures.push_back(error);
    }

    pub async fn set_fail_declare(&self, error: Option<TransportError>) {
        self.state.write().await.fail_declare = error;
    }

    pub async fn set_fail_delete(&self, error: Option<TransportError>) {
        self.state.write().await.fail_delete = error;
    }

    /// Fails the next publish; queued failures are consumed in order.
    pub async fn fail_next_publish(&self, error: TransportError) {
        self.state.write().await.publish_failures.push_back(error);
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().await.fail_all_publishes = fail;
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    /// Every `connect` call, successful or not.
    pub async fn connect_attempts(&self) -> usize {
        self.state.read().await.connect_attempts
    }

    /// Successful connects.
    pub async fn connect_count(&self) -> usize {
        self.state.read().await.connects
    }

    pub async fn disconnect_count(&self) -> usize {
        self.state.read().await.disconnects
    }

    pub async fn declared(&self) -> Vec<ExchangeSpec> {
        self.state.read().await.declared.clone()
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.state.read().await.deleted.clone()
    }

    pub async fn publish_attempts(&self) -> usize {
        self.state.read().await.publish_attempts
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.read().await.published.clone()
    }

    pub async fn take_published(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut self.state.write().await.published)
    }
}

fn not_connected() -> TransportError {
    TransportError::Unavailable("mock transport not connected".to_string())
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.write().await;
        state.connect_attempts += 1;
        if let Some(error) = state.connect_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.fail_connect.clone() {
            return Err(error);
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), TransportError> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(not_connected());
        }
        if let Some(error) = state.fail_declare.clone() {
            return Err(error);
        }
        state.declared.push(spec.clone());
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), TransportError> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(not_connected());
        }
        if let Some(error) = state.fail_delete.clone() {
            return Err(error);
        }
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &WirePayload,
    ) -> Result<(), TransportError> {
        let mut state = self.state.write().await;
        state.publish_attempts += 1;
        if !state.connected {
            return Err(not_connected());
        }
        if let Some(error) = state.publish_failures.pop_front() {
            return Err(error);
        }
        if state.fail_all_publishes {
            return Err(TransportError::Failed("Mock publish failure".to_string()));
        }
        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.write().await;
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }
}
