//! Public posting operations.
//!
//! Each operation runs Builder -> Router -> Session publish for one event.
//! A rename is posted as two independent events: removal of the old name,
//! then creation of the new one.

mod content;

pub use content::{ContentSource, FsContentSource, MemoryContentSource};

use std::io;
use std::sync::Arc;

use tracing::{error, warn};

use crate::advertisement::{
    Advertisement, AdvertisementBuilder, EventKind, FileContent, FileMetadata,
};
use crate::checksum::{Checksum, Sha512Checksum};
use crate::error::{PostError, Result};
use crate::routing::Router;
use crate::session::Session;

/// Outcome classification of a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameStatus {
    Complete,
    /// Old name's removal was not advertised; new name's creation was.
    RemovalFailed,
    /// Old name's removal was advertised; new name's creation was not.
    CreationFailed,
    Failed,
}

/// Per-step results of a rename. Both steps are always attempted.
#[derive(Debug)]
pub struct RenameOutcome {
    pub removal: Result<Advertisement>,
    pub creation: Result<Advertisement>,
}

impl RenameOutcome {
    pub fn status(&self) -> RenameStatus {
        match (&self.removal, &self.creation) {
            (Ok(_), Ok(_)) => RenameStatus::Complete,
            (Err(_), Ok(_)) => RenameStatus::RemovalFailed,
            (Ok(_), Err(_)) => RenameStatus::CreationFailed,
            (Err(_), Err(_)) => RenameStatus::Failed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == RenameStatus::Complete
    }

    /// Both advertisements, or the first failure.
    pub fn into_result(self) -> Result<(Advertisement, Advertisement)> {
        Ok((self.removal?, self.creation?))
    }
}

/// Counts from a posting campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignSummary {
    pub posted: usize,
    pub failed: usize,
}

/// Posts file events through a session.
pub struct Poster {
    router: Router,
    checksum: Arc<dyn Checksum>,
    content: Arc<dyn ContentSource>,
}

impl Default for Poster {
    fn default() -> Self {
        Self::new(
            Router::default(),
            Arc::new(Sha512Checksum),
            Arc::new(FsContentSource),
        )
    }
}

impl Poster {
    pub fn new(router: Router, checksum: Arc<dyn Checksum>, content: Arc<dyn ContentSource>) -> Self {
        Self {
            router,
            checksum,
            content,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    fn builder<'a>(&'a self, session: &'a Session) -> AdvertisementBuilder<'a> {
        AdvertisementBuilder::new(session.sender(), self.checksum.as_ref())
    }

    /// Advertises `path` as created (metadata present) or removed (`None`).
    ///
    /// The identifier, metadata and routing key are checked before any
    /// content is read.
    #[tracing::instrument(name = "post", skip_all, fields(path = %path))]
    pub async fn post(
        &self,
        session: &Session,
        path: &str,
        metadata: Option<&FileMetadata>,
    ) -> Result<Advertisement> {
        let builder = self.builder(session);
        let kind = match metadata {
            Some(_) => EventKind::Create,
            None => EventKind::Remove,
        };
        builder.validate(path, metadata)?;
        let routing_key = self.router.derive(path, kind)?;

        let advertisement = match metadata {
            Some(metadata) => {
                let bytes = self.read_content(path).await?;
                builder.build(path, Some(FileContent::new(metadata, &bytes)))?
            }
            None => builder.build(path, None)?,
        };

        session.publish(&routing_key, &advertisement).await?;
        Ok(advertisement)
    }

    /// Advertises `path` from its current state: created if it exists, removed if not.
    ///
    /// Metadata comes from `lstat`, so a symlink (dangling or not) describes
    /// the link itself; anything other than a regular file is refused with
    /// `ContentUnavailable` instead of pairing the link's metadata with the
    /// target's checksum.
    pub async fn post_path(&self, session: &Session, path: &str) -> Result<Advertisement> {
        match self.content.metadata(path).await {
            Ok(metadata) if !metadata.is_regular_file() => Err(PostError::ContentUnavailable {
                path: path.to_string(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a regular file (mode {:o})", metadata.mode),
                ),
            }),
            Ok(metadata) => self.post(session, path, Some(&metadata)).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.post(session, path, None).await,
            Err(source) => Err(PostError::ContentUnavailable {
                path: path.to_string(),
                source,
            }),
        }
    }

    /// Advertises removal of `old` and creation of `new`, attempting both.
    #[tracing::instrument(name = "post.rename", skip_all, fields(old = %old, new = %new))]
    pub async fn post_rename(
        &self,
        session: &Session,
        old: &str,
        new: &str,
        new_metadata: &FileMetadata,
    ) -> RenameOutcome {
        let builder = self.builder(session);

        let removal = match builder.build_rename_from(old, new) {
            Ok(advertisement) => self
                .post_message(session, &advertisement)
                .await
                .map(|()| advertisement),
            Err(e) => Err(e),
        };
        if let Err(e) = &removal {
            warn!(path = %old, error = %e, "Rename removal not advertised");
        }

        let creation = self.post_rename_to(session, &builder, old, new, new_metadata).await;
        if let Err(e) = &creation {
            warn!(path = %new, error = %e, "Rename creation not advertised");
        }

        RenameOutcome { removal, creation }
    }

    async fn post_rename_to(
        &self,
        session: &Session,
        builder: &AdvertisementBuilder<'_>,
        old: &str,
        new: &str,
        metadata: &FileMetadata,
    ) -> Result<Advertisement> {
        builder.validate(old, None)?;
        builder.validate(new, Some(metadata))?;
        let routing_key = self.router.derive(new, EventKind::RenameTo)?;

        let bytes = self.read_content(new).await?;
        let advertisement = builder.build_rename_to(old, new, FileContent::new(metadata, &bytes))?;
        session.publish(&routing_key, &advertisement).await?;
        Ok(advertisement)
    }

    /// Initializes the session, advertises each path from its current state,
    /// then cleans up.
    ///
    /// Individual post failures are counted, not returned; cleanup runs once
    /// `init` succeeded and its failure is only logged.
    pub async fn post_paths<P: AsRef<str>>(
        &self,
        session: &mut Session,
        paths: &[P],
    ) -> Result<CampaignSummary> {
        session.init().await?;

        let mut summary = CampaignSummary::default();
        for path in paths {
            let path = path.as_ref();
            match self.post_path(session, path).await {
                Ok(_) => summary.posted += 1,
                Err(e) => {
                    error!(path = %path, error = %e, "Failed to post");
                    summary.failed += 1;
                }
            }
        }

        if let Err(e) = session.cleanup().await {
            warn!(error = %e, "Session cleanup failed");
        }
        Ok(summary)
    }

    /// Routes and publishes an already built advertisement.
    pub async fn post_message(&self, session: &Session, advertisement: &Advertisement) -> Result<()> {
        let routing_key = self.router.route(advertisement)?;
        session.publish(&routing_key, advertisement).await
    }

    async fn read_content(&self, path: &str) -> Result<Vec<u8>> {
        self.content
            .read(path)
            .await
            .map_err(|source| PostError::ContentUnavailable {
                path: path.to_string(),
                source,
            })
    }
}
