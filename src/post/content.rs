//! Access to the files being advertised.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;

use crate::advertisement::FileMetadata;

/// Supplies a file's current metadata and bytes.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn metadata(&self, path: &str) -> io::Result<FileMetadata>;

    async fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// Reads from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsContentSource;

#[async_trait]
impl ContentSource for FsContentSource {
    async fn metadata(&self, path: &str) -> io::Result<FileMetadata> {
        FileMetadata::read(path).await
    }

    async fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

/// In-memory files, for tests and callers that already hold the content.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentSource {
    files: HashMap<String, (FileMetadata, Vec<u8>)>,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(
        mut self,
        path: impl Into<String>,
        metadata: FileMetadata,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.insert(path, metadata, bytes);
        self
    }

    pub fn insert(
        &mut self,
        path: impl Into<String>,
        metadata: FileMetadata,
        bytes: impl Into<Vec<u8>>,
    ) {
        self.files.insert(path.into(), (metadata, bytes.into()));
    }

    fn entry(&self, path: &str) -> io::Result<&(FileMetadata, Vec<u8>)> {
        self.files
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path)))
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    async fn metadata(&self, path: &str) -> io::Result<FileMetadata> {
        self.entry(path).map(|(metadata, _)| *metadata)
    }

    async fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.entry(path).map(|(_, bytes)| bytes.clone())
    }
}
