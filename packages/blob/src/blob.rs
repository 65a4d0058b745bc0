//! The [`Blob`] type returned by actions whose output is not JSON.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempDir;

use crate::data::{BlobBytes, BlobData, BlobFile, BlobUrl};
use crate::error::Result;

/// Media type used when an action does not say what it returns.
pub const ANY_MEDIA_TYPE: &str = "*/*";

/// A binary payload tagged with its media type.
///
/// Actions return blobs wrapped in an `Arc`: the invocation's stored output is
/// the owning reference, and the [`BlobRegistry`](crate::BlobRegistry) only
/// ever holds a `Weak` one.
pub struct Blob {
    media_type: String,
    data: Box<dyn BlobData>,
}

impl Blob {
    /// Wrap any backing that implements [`BlobData`].
    pub fn new(data: impl BlobData + 'static, media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            data: Box::new(data),
        }
    }

    /// A blob held in memory.
    pub fn from_bytes(bytes: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self::new(BlobBytes::new(bytes), media_type)
    }

    /// A blob backed by a file that must outlive the blob.
    pub fn from_file(path: impl Into<PathBuf>, media_type: impl Into<String>) -> Result<Self> {
        Ok(Self::new(BlobFile::new(path)?, media_type))
    }

    /// A blob backed by `file` inside `directory`.
    ///
    /// The directory is deleted when the blob is dropped.
    pub fn from_temporary_directory(
        directory: TempDir,
        file: impl AsRef<Path>,
        media_type: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::new(
            BlobFile::in_temporary_directory(directory, file)?,
            media_type,
        ))
    }

    /// A blob downloaded from `url` whenever it is read.
    pub fn from_url(url: &str, media_type: impl Into<String>) -> Result<Self> {
        Ok(Self::new(BlobUrl::new(url)?, media_type))
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The full payload.
    ///
    /// Reading a file- or URL-backed blob touches the disk or the network on
    /// every call, so read it once.
    pub fn content(&self) -> Result<Bytes> {
        self.data.content()
    }

    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        self.data.open()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.data.save(path.as_ref())
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("media_type", &self.media_type)
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_keeps_media_type() {
        let blob = Blob::from_bytes(vec![0u8; 4], "image/png");
        assert_eq!(blob.media_type(), "image/png");
        assert_eq!(blob.content().unwrap().len(), 4);
    }

    #[test]
    fn open_streams_content() {
        let blob = Blob::from_bytes(Bytes::from_static(b"stream me"), ANY_MEDIA_TYPE);
        let mut out = String::new();
        blob.open().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "stream me");
    }

    #[test]
    fn from_temporary_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.csv"), "a,b\n1,2\n").unwrap();

        let blob = Blob::from_temporary_directory(dir, "data.csv", "text/csv").unwrap();
        assert_eq!(blob.content().unwrap(), Bytes::from_static(b"a,b\n1,2\n"));
    }

    #[test]
    fn from_file_fails_for_missing_file() {
        assert!(Blob::from_file("/definitely/not/here.bin", ANY_MEDIA_TYPE).is_err());
    }
}
