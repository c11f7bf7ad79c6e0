//! Advertisement records and the builder that produces them.
//!
//! An [`Advertisement`] is the broker-independent description of one
//! file-change event. Create and modify are the same event; a removal carries
//! the identifier only.

use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::checksum::{Checksum, Digest};
use crate::error::{PostError, Result};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// File-type bits of `st_mode`.
const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;

/// Seconds plus nanoseconds since the Unix epoch, as reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTime {
    pub secs: i64,
    pub nanos: i64,
}

impl FileTime {
    pub fn new(secs: i64, nanos: i64) -> Self {
        Self { secs, nanos }
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self::new(since.as_secs() as i64, i64::from(since.subsec_nanos())),
            Err(before) => {
                let before = before.duration();
                let mut secs = -(before.as_secs() as i64);
                let mut nanos = i64::from(before.subsec_nanos());
                if nanos > 0 {
                    secs -= 1;
                    nanos = NANOS_PER_SEC - nanos;
                }
                Self::new(secs, nanos)
            }
        }
    }

    /// Converts to a UTC timestamp, or `None` if the fields are out of range.
    ///
    /// Only years 0 through 9999 are accepted; the wire format has four year digits.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let nanos = u32::try_from(self.nanos)
            .ok()
            .filter(|n| i64::from(*n) < NANOS_PER_SEC)?;
        DateTime::from_timestamp(self.secs, nanos).filter(|t| (0..=9999).contains(&t.year()))
    }
}

/// The subset of a `stat` record an advertisement carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: i64,
    pub atime: FileTime,
    pub mtime: FileTime,
    /// Raw `st_mode`; opaque to this crate.
    pub mode: u32,
}

impl FileMetadata {
    #[cfg(unix)]
    pub fn from_std(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            size: i64::try_from(metadata.size()).unwrap_or(i64::MAX),
            atime: FileTime::new(metadata.atime(), metadata.atime_nsec()),
            mtime: FileTime::new(metadata.mtime(), metadata.mtime_nsec()),
            mode: metadata.mode(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_std(metadata: &std::fs::Metadata) -> Self {
        let mtime = metadata
            .modified()
            .map(FileTime::from_system_time)
            .unwrap_or(FileTime::new(0, 0));
        let atime = metadata
            .accessed()
            .map(FileTime::from_system_time)
            .unwrap_or(mtime);

        Self {
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            atime,
            mtime,
            mode: if metadata.permissions().readonly() {
                0o444
            } else {
                0o644
            },
        }
    }

    /// True for regular files, and for hand-built metadata with no file-type
    /// bits in `mode`.
    pub fn is_regular_file(&self) -> bool {
        matches!(self.mode & S_IFMT, 0 | S_IFREG)
    }

    /// Reads metadata without following a final symlink, like `lstat`.
    pub async fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        Ok(Self::from_std(&metadata))
    }
}

/// What happened to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Created or modified.
    Create,
    Remove,
    /// Created under a new name by a rename.
    RenameTo,
}

impl EventKind {
    /// Token used in routing keys and the `event` header.
    pub fn token(self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Remove => "remove",
            EventKind::RenameTo => "rename",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "create" => Some(EventKind::Create),
            "remove" => Some(EventKind::Remove),
            "rename" => Some(EventKind::RenameTo),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Validated file attributes of a create or rename advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: u64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub mode: u32,
    pub sum: Digest,
}

/// The other half of a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameLink {
    /// Set on the creation half: the name the file had before.
    OldName(String),
    /// Set on the removal half: the name the file has now.
    NewName(String),
}

/// Protocol metadata generated per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeaders {
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    /// Lets consumers de-duplicate redelivered advertisements.
    pub correlation: Uuid,
    pub rename: Option<RenameLink>,
}

impl MessageHeaders {
    fn fresh(sender: &str, rename: Option<RenameLink>) -> Self {
        Self {
            sender: sender.to_string(),
            timestamp: Utc::now(),
            correlation: Uuid::new_v4(),
            rename,
        }
    }
}

/// Immutable description of one file-change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    identifier: String,
    kind: EventKind,
    file: Option<FileAttributes>,
    headers: MessageHeaders,
}

impl Advertisement {
    /// Reassembles a decoded advertisement. `file` must be `None` exactly for removals.
    pub(crate) fn from_parts(
        identifier: String,
        kind: EventKind,
        file: Option<FileAttributes>,
        headers: MessageHeaders,
    ) -> Self {
        debug_assert_eq!(file.is_none(), kind == EventKind::Remove);
        Self {
            identifier,
            kind,
            file,
            headers,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// File attributes; `None` for removals.
    pub fn file(&self) -> Option<&FileAttributes> {
        self.file.as_ref()
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    pub fn sum(&self) -> Option<&Digest> {
        self.file.as_ref().map(|f| &f.sum)
    }

    /// True if both advertisements describe the same event, ignoring the
    /// per-message timestamp and correlation token.
    pub fn same_event(&self, other: &Advertisement) -> bool {
        self.identifier == other.identifier
            && self.kind == other.kind
            && self.file == other.file
            && self.headers.sender == other.headers.sender
            && self.headers.rename == other.headers.rename
    }
}

/// Stat record plus the bytes the checksum is computed over.
#[derive(Debug, Clone, Copy)]
pub struct FileContent<'a> {
    pub metadata: &'a FileMetadata,
    pub bytes: &'a [u8],
}

impl<'a> FileContent<'a> {
    pub fn new(metadata: &'a FileMetadata, bytes: &'a [u8]) -> Self {
        Self { metadata, bytes }
    }
}

/// Builds advertisements for one sender identity. Performs no I/O.
pub struct AdvertisementBuilder<'a> {
    sender: &'a str,
    checksum: &'a dyn Checksum,
}

impl<'a> AdvertisementBuilder<'a> {
    pub fn new(sender: &'a str, checksum: &'a dyn Checksum) -> Self {
        Self { sender, checksum }
    }

    /// Create advertisement when `content` is present, removal otherwise.
    pub fn build(&self, identifier: &str, content: Option<FileContent<'_>>) -> Result<Advertisement> {
        let kind = match content {
            Some(_) => EventKind::Create,
            None => EventKind::Remove,
        };
        self.assemble(identifier, kind, content, None)
    }

    /// Removal half of a rename.
    pub fn build_rename_from(&self, old: &str, new: &str) -> Result<Advertisement> {
        ensure_identifier(new)?;
        self.assemble(
            old,
            EventKind::Remove,
            None,
            Some(RenameLink::NewName(new.to_string())),
        )
    }

    /// Creation half of a rename.
    pub fn build_rename_to(
        &self,
        old: &str,
        new: &str,
        content: FileContent<'_>,
    ) -> Result<Advertisement> {
        ensure_identifier(old)?;
        self.assemble(
            new,
            EventKind::RenameTo,
            Some(content),
            Some(RenameLink::OldName(old.to_string())),
        )
    }

    fn assemble(
        &self,
        identifier: &str,
        kind: EventKind,
        content: Option<FileContent<'_>>,
        rename: Option<RenameLink>,
    ) -> Result<Advertisement> {
        ensure_identifier(identifier)?;
        let file = content
            .map(|content| self.attributes(identifier, content))
            .transpose()?;

        Ok(Advertisement {
            identifier: identifier.to_string(),
            kind,
            file,
            headers: MessageHeaders::fresh(self.sender, rename),
        })
    }

    /// Checks an identifier and optional metadata without touching content.
    ///
    /// Accepts exactly what `build` accepts, so callers can reject bad input
    /// before reading the file the checksum is computed over.
    pub fn validate(&self, identifier: &str, metadata: Option<&FileMetadata>) -> Result<()> {
        ensure_identifier(identifier)?;
        if let Some(metadata) = metadata {
            checked_fields(identifier, metadata)?;
        }
        Ok(())
    }

    fn attributes(&self, identifier: &str, content: FileContent<'_>) -> Result<FileAttributes> {
        let (size, atime, mtime) = checked_fields(identifier, content.metadata)?;

        Ok(FileAttributes {
            size,
            atime,
            mtime,
            mode: content.metadata.mode,
            sum: self.checksum.digest(content.bytes),
        })
    }
}

fn checked_fields(
    identifier: &str,
    metadata: &FileMetadata,
) -> Result<(u64, DateTime<Utc>, DateTime<Utc>)> {
    let size = u64::try_from(metadata.size).map_err(|_| {
        PostError::invalid_metadata(identifier, format!("negative size {}", metadata.size))
    })?;
    let atime = metadata
        .atime
        .to_datetime()
        .ok_or_else(|| bad_time(identifier, "atime", metadata.atime))?;
    let mtime = metadata
        .mtime
        .to_datetime()
        .ok_or_else(|| bad_time(identifier, "mtime", metadata.mtime))?;
    Ok((size, atime, mtime))
}

fn ensure_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(PostError::invalid_identifier(identifier, "empty identifier"));
    }
    Ok(())
}

fn bad_time(identifier: &str, field: &str, time: FileTime) -> PostError {
    PostError::invalid_metadata(
        identifier,
        format!("{} {}s {}ns is not a valid timestamp", field, time.secs, time.nanos),
    )
}
