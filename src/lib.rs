//! sr_post - file change advertisements over AMQP
//!
//! Builds advertisements for created, removed and renamed files, derives
//! topic routing keys from file paths, and publishes them to a topic
//! exchange through a broker session.

pub mod advertisement;
pub mod checksum;
pub mod config;
pub mod error;
pub mod post;
pub mod routing;
pub mod session;
pub mod transport;
pub mod utils;
pub mod wire;

pub use advertisement::{
    Advertisement, AdvertisementBuilder, EventKind, FileContent, FileMetadata, FileTime,
};
pub use checksum::{Checksum, ChecksumKind, Digest};
pub use config::Config;
pub use error::{PostError, Result};
pub use post::{CampaignSummary, Poster, RenameOutcome, RenameStatus};
pub use routing::{Router, RoutingKey};
pub use session::{Session, SessionSettings, SessionState};
pub use transport::{ExchangeSpec, Transport, TransportError};
pub use wire::WirePayload;
