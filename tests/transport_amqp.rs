//! AMQP/RabbitMQ transport integration tests using testcontainers.
//!
//! Run with: cargo test --test transport_amqp -- --ignored --nocapture
//!
//! These tests spin up RabbitMQ in a container using testcontainers-rs.
//! No manual RabbitMQ setup required.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use sr_post::checksum::Sha512Checksum;
use sr_post::post::MemoryContentSource;
use sr_post::transport::amqp::headers_from_field_table;
use sr_post::transport::AmqpTransport;
use sr_post::wire::{WirePayload, CONTENT_TYPE};
use sr_post::{
    EventKind, ExchangeSpec, FileMetadata, FileTime, PostError, Poster, Router, Session,
    SessionSettings,
};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

/// Start RabbitMQ container.
///
/// Returns (container, amqp_url) where amqp_url is suitable for AMQP connection.
async fn start_rabbitmq() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("rabbitmq", "3-management")
        .with_exposed_port(5672.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"));

    let container = image
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start rabbitmq container");

    // Brief delay to ensure RabbitMQ is fully ready
    tokio::time::sleep(Duration::from_secs(2)).await;

    let host_port = container
        .get_host_port_ipv4(5672)
        .await
        .expect("Failed to get mapped port");

    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let amqp_url = format!("amqp://guest:guest@{}:{}", host, host_port);

    println!("RabbitMQ available at: {}", amqp_url);

    (container, amqp_url)
}

async fn open_channel(url: &str) -> (Connection, Channel) {
    let connection = Connection::connect(url, ConnectionProperties::default())
        .await
        .expect("Failed to connect consumer");
    let channel = connection
        .create_channel()
        .await
        .expect("Failed to create consumer channel");
    (connection, channel)
}

fn settings(exchange: &str) -> SessionSettings {
    SessionSettings {
        exchange: ExchangeSpec::topic(exchange),
        sender: "it_feeder".to_string(),
        connect_retries: 2,
    }
}

fn metadata() -> FileMetadata {
    FileMetadata {
        size: 3,
        atime: FileTime::new(1_700_000_000, 0),
        mtime: FileTime::new(1_700_000_000, 0),
        mode: 0o644,
    }
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_published_advertisement_reaches_bound_queue() {
    let (_container, url) = start_rabbitmq().await;
    let exchange = "xs_it_roundtrip";

    let mut session = Session::new(Arc::new(AmqpTransport::new(url.clone())), settings(exchange));
    session.init().await.expect("init failed");

    let (_consumer_connection, channel) = open_channel(&url).await;
    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .expect("Failed to declare queue");
    channel
        .queue_bind(
            queue.name().as_str(),
            exchange,
            "v02.post.data.#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .expect("Failed to bind queue");

    let poster = Poster::new(
        Router::with_prefix("v02.post"),
        Arc::new(Sha512Checksum),
        Arc::new(MemoryContentSource::new().with_file("/data/obs.csv", metadata(), b"a,b".to_vec())),
    );
    let advertisement = poster
        .post(&session, "/data/obs.csv", Some(&metadata()))
        .await
        .expect("post failed");

    let mut consumer = channel
        .basic_consume(
            queue.name().as_str(),
            "it_consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .expect("Failed to start consumer");

    let delivery = tokio::time::timeout(Duration::from_secs(10), consumer.next())
        .await
        .expect("Timed out waiting for delivery")
        .expect("Consumer closed")
        .expect("Delivery error");
    delivery
        .ack(BasicAckOptions::default())
        .await
        .expect("Failed to ack");

    assert_eq!(delivery.routing_key.as_str(), "v02.post.data.obs_csv.create");
    assert_eq!(
        delivery.properties.content_type().as_ref().map(|s| s.as_str()),
        Some(CONTENT_TYPE)
    );
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(headers_from_field_table)
        .unwrap_or_default();
    let payload = WirePayload {
        headers,
        body: String::from_utf8(delivery.data.clone()).expect("Body is not UTF-8"),
    };
    let decoded = payload.decode().expect("Failed to decode delivery");
    assert_eq!(decoded, advertisement);
    assert_eq!(decoded.kind(), EventKind::Create);

    session.cleanup().await.expect("cleanup failed");

    // The exchange is gone after cleanup: a passive declare must fail.
    let (_check_connection, check) = open_channel(&url).await;
    let passive = check
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await;
    assert!(passive.is_err());
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_conflicting_exchange_type_fails_init() {
    let (_container, url) = start_rabbitmq().await;
    let exchange = "xs_it_conflict";

    let (_connection, channel) = open_channel(&url).await;
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .expect("Failed to pre-declare exchange");

    let mut session = Session::new(Arc::new(AmqpTransport::new(url)), settings(exchange));
    let err = session.init().await.unwrap_err();

    assert!(matches!(err, PostError::ExchangeDeclarationFailed { .. }));
    assert!(!session.is_ready());
}

#[tokio::test]
async fn test_unreachable_broker_is_unavailable() {
    let mut session = Session::new(
        Arc::new(AmqpTransport::new("amqp://127.0.0.1:1")),
        SessionSettings::default(),
    );

    let err = session.init().await.unwrap_err();

    assert!(matches!(err, PostError::BrokerUnavailable(_)));
    assert!(err.is_retryable());
}
