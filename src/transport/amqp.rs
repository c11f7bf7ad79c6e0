//! AMQP (RabbitMQ) transport implementation.
//!
//! Holds one connection and one channel in publisher-confirm mode, so a
//! publish resolves only after the broker acknowledged the message.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, ExchangeDeleteOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ExchangeSpec, ExchangeType, Transport, TransportError};
use crate::wire::{WirePayload, CONTENT_TYPE};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

struct Link {
    connection: Connection,
    channel: Channel,
}

/// AMQP transport using RabbitMQ.
pub struct AmqpTransport {
    url: String,
    link: Mutex<Option<Link>>,
}

impl AmqpTransport {
    /// Create a transport for the given URL (e.g. `amqp://localhost:5672`).
    /// No connection is made until `connect`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            link: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn channel(&self) -> Result<Channel, TransportError> {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| link.channel.clone())
            .ok_or_else(|| TransportError::Unavailable("not connected".to_string()))
    }
}

fn exchange_kind(exchange_type: ExchangeType) -> ExchangeKind {
    match exchange_type {
        ExchangeType::Topic => ExchangeKind::Topic,
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Fanout => ExchangeKind::Fanout,
        ExchangeType::Headers => ExchangeKind::Headers,
    }
}

/// Protocol errors are the broker refusing the request; I/O and state errors
/// mean the connection is gone.
fn classify(error: lapin::Error) -> TransportError {
    match error {
        lapin::Error::ProtocolError(_) => TransportError::Rejected(error.to_string()),
        lapin::Error::IOError(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::InvalidChannelState(_)
        | lapin::Error::MissingHeartbeatError => TransportError::Unavailable(error.to_string()),
        _ => TransportError::Failed(error.to_string()),
    }
}

fn field_table(headers: &BTreeMap<String, String>) -> FieldTable {
    let table: BTreeMap<ShortString, AMQPValue> = headers
        .iter()
        .map(|(key, value)| {
            (
                ShortString::from(key.as_str()),
                AMQPValue::LongString(value.clone().into()),
            )
        })
        .collect();
    FieldTable::from(table)
}

/// Converts a delivered header table back into the wire header map.
/// Non-string values are skipped.
pub fn headers_from_field_table(table: &FieldTable) -> BTreeMap<String, String> {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                AMQPValue::ShortString(s) => s.as_str().to_string(),
                _ => return None,
            };
            Some((key.as_str().to_string(), text))
        })
        .collect()
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Ok(());
        }

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Unavailable(format!("Failed to connect: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Unavailable(format!("Failed to create channel: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                TransportError::Unavailable(format!("Failed to enable publisher confirms: {}", e))
            })?;

        info!(url = %self.url, "Connected to AMQP");
        *link = Some(Link {
            connection,
            channel,
        });
        Ok(())
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), TransportError> {
        let channel = self.channel().await?;
        channel
            .exchange_declare(
                &spec.name,
                exchange_kind(spec.exchange_type),
                ExchangeDeclareOptions {
                    durable: spec.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(classify)?;

        debug!(exchange = %spec.name, "Declared exchange");
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), TransportError> {
        let channel = self.channel().await?;
        channel
            .exchange_delete(name, ExchangeDeleteOptions::default())
            .await
            .map_err(classify)?;

        debug!(exchange = %name, "Deleted exchange");
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &WirePayload,
    ) -> Result<(), TransportError> {
        let channel = self.channel().await?;

        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE.into())
            .with_delivery_mode(2) // persistent
            .with_headers(field_table(&payload.headers));

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload.body.as_bytes(),
                properties,
            )
            .await
            .map_err(classify)?;

        let confirmation = confirm
            .await
            .map_err(|e| TransportError::Failed(format!("Publish confirmation failed: {}", e)))?;

        if confirmation.is_nack() {
            return Err(TransportError::Failed(
                "Broker negatively acknowledged the message".to_string(),
            ));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = link.channel.close(REPLY_SUCCESS, "OK").await {
            warn!(error = %e, "Failed to close channel");
        }
        link.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| TransportError::Unavailable(format!("Failed to close connection: {}", e)))?;

        info!(url = %self.url, "Disconnected from AMQP");
        Ok(())
    }
}
