//! End-to-end posting through the public API against the mock transport.

use std::sync::Arc;

use sr_post::advertisement::RenameLink;
use sr_post::checksum::ZeroChecksum;
use sr_post::post::MemoryContentSource;
use sr_post::transport::MockTransport;
use sr_post::wire::header;
use sr_post::{
    routing, Config, EventKind, ExchangeSpec, FileMetadata, FileTime, PostError, Poster,
    RenameStatus, Router, Session, SessionSettings, SessionState, TransportError,
};

fn metadata(size: i64) -> FileMetadata {
    FileMetadata {
        size,
        atime: FileTime::new(1_700_000_000, 250_000_000),
        mtime: FileTime::new(1_700_000_100, 0),
        mode: 0o640,
    }
}

fn settings() -> SessionSettings {
    SessionSettings {
        exchange: ExchangeSpec::topic("xs_feeder"),
        sender: "feeder".to_string(),
        connect_retries: 0,
    }
}

#[tokio::test]
async fn test_campaign_publishes_decodable_advertisements() {
    let transport = MockTransport::new();
    let mut session = Session::new(Arc::new(transport.clone()), settings());
    let content = MemoryContentSource::new()
        .with_file("/data/obs.csv", metadata(3), b"a,b".to_vec())
        .with_file("/data/new.csv", metadata(4), b"a,bc".to_vec());
    let poster = Poster::new(
        Router::with_prefix("v02.post"),
        Arc::new(ZeroChecksum),
        Arc::new(content),
    );

    session.init().await.unwrap();
    assert_eq!(transport.declared().await, vec![ExchangeSpec::topic("xs_feeder")]);

    let created = poster
        .post(&session, "/data/obs.csv", Some(&metadata(3)))
        .await
        .unwrap();
    let removed = poster.post(&session, "/data/gone.csv", None).await.unwrap();
    let outcome = poster
        .post_rename(&session, "/data/old.csv", "/data/new.csv", &metadata(4))
        .await;
    assert_eq!(outcome.status(), RenameStatus::Complete);
    session.cleanup().await.unwrap();

    let published = transport.take_published().await;
    let keys: Vec<&str> = published.iter().map(|m| m.routing_key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "v02.post.data.obs_csv.create",
            "v02.post.data.gone_csv.remove",
            "v02.post.data.old_csv.remove",
            "v02.post.data.new_csv.rename",
        ]
    );
    assert!(published.iter().all(|m| m.exchange == "xs_feeder"));
    assert!(published
        .iter()
        .all(|m| m.payload.headers[header::SENDER] == "feeder"));

    let decoded = published[0].payload.decode().unwrap();
    assert_eq!(decoded, created);
    assert_eq!(decoded.sum().unwrap().to_string(), "0,0");
    assert_eq!(published[1].payload.decode().unwrap(), removed);

    let rename_to = published[3].payload.decode().unwrap();
    assert_eq!(rename_to.kind(), EventKind::RenameTo);
    assert_eq!(
        rename_to.headers().rename,
        Some(RenameLink::OldName("/data/old.csv".to_string()))
    );

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(transport.deleted().await, vec!["xs_feeder".to_string()]);
    assert!(!transport.is_connected().await);
}

#[tokio::test]
async fn test_repeated_posts_differ_only_in_headers() {
    let transport = MockTransport::new();
    let mut session = Session::new(Arc::new(transport.clone()), settings());
    let content = MemoryContentSource::new().with_file("/f", metadata(1), b"x".to_vec());
    let poster = Poster::new(
        Router::default(),
        Arc::new(ZeroChecksum),
        Arc::new(content),
    );

    session.init().await.unwrap();
    let first = poster.post(&session, "/f", Some(&metadata(1))).await.unwrap();
    let second = poster.post(&session, "/f", Some(&metadata(1))).await.unwrap();
    session.cleanup().await.unwrap();

    assert!(first.same_event(&second));
    assert_ne!(first.headers().correlation, second.headers().correlation);
    let published = transport.published().await;
    assert_eq!(published[0].payload.body, published[1].payload.body);
}

#[tokio::test]
async fn test_closed_session_rejects_posts() {
    let transport = MockTransport::new();
    let mut session = Session::new(Arc::new(transport.clone()), settings());
    let poster = Poster::default();

    session.init().await.unwrap();
    session.cleanup().await.unwrap();

    let err = poster.post(&session, "/f", None).await.unwrap_err();
    assert!(matches!(
        err,
        PostError::NotReady {
            state: SessionState::Closed
        }
    ));
    assert!(session.init().await.is_err());
    assert_eq!(transport.publish_attempts().await, 0);
}

#[tokio::test]
async fn test_unreachable_broker_fails_init() {
    let transport = MockTransport::new();
    transport
        .set_fail_connect(Some(TransportError::Unavailable("refused".to_string())))
        .await;
    let mut session = Session::new(Arc::new(transport.clone()), settings());

    let err = session.init().await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(transport.declared().await.is_empty());
}

#[tokio::test]
async fn test_config_wires_poster_and_session() {
    let config: Config = Config {
        topic_prefix: Some("v02.post".to_string()),
        ..Config::default()
    };
    let transport = MockTransport::new();
    let mut session = Session::new(Arc::new(transport.clone()), config.session_settings());
    let poster = config.poster();

    session.init().await.unwrap();
    poster.post(&session, "/no/such/file", None).await.unwrap();
    session.cleanup().await.unwrap();

    let published = transport.published().await;
    assert_eq!(published[0].exchange, "xs_guest");
    assert_eq!(published[0].routing_key, "v02.post.no.such.file.remove");
    assert_eq!(published[0].payload.headers[header::SENDER], "sr_post");
}

#[test]
fn test_routing_key_derivation() {
    let key = routing::derive("/data/obs.csv", EventKind::Create).unwrap();
    assert_eq!(key.as_str(), "data.obs_csv.create");

    let err = routing::derive("///", EventKind::Remove).unwrap_err();
    assert!(matches!(err, PostError::InvalidIdentifier { .. }));
}
