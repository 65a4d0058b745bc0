//! Storage backings for blob data.
//!
//! A [`Blob`](crate::Blob) never exposes where its bytes live. Each backing
//! implements [`BlobData`], which offers the same three ways in: read the whole
//! payload, open it as a stream, or save it to a file.

use std::fmt;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use reqwest::blocking::Client;
use tempfile::TempDir;
use url::Url;

use crate::error::{Error, Result};

/// Uniform read contract shared by every blob backing.
pub trait BlobData: Send + Sync + fmt::Debug {
    /// The full payload.
    fn content(&self) -> Result<Bytes>;

    /// A reader positioned at the start of the payload.
    fn open(&self) -> Result<Box<dyn Read + Send>>;

    /// Write the payload to `path`, replacing any existing file.
    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.content()?)?;
        Ok(())
    }
}

/// Blob data held in memory.
#[derive(Debug, Clone)]
pub struct BlobBytes {
    bytes: Bytes,
}

impl BlobBytes {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl BlobData for BlobBytes {
    fn content(&self) -> Result<Bytes> {
        Ok(self.bytes.clone())
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.bytes.clone())))
    }
}

/// Blob data held in a file on disk.
///
/// Only the path is retained. When the file lives in a temporary directory,
/// the directory guard is kept here so the file outlives every reader of the
/// blob and is removed once the blob itself is dropped.
#[derive(Debug)]
pub struct BlobFile {
    path: PathBuf,
    _directory: Option<TempDir>,
}

impl BlobFile {
    /// Wrap an existing file.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::MissingFile(path));
        }
        Ok(Self {
            path,
            _directory: None,
        })
    }

    /// Wrap `file` inside `directory`, taking ownership of the directory.
    pub fn in_temporary_directory(directory: TempDir, file: impl AsRef<Path>) -> Result<Self> {
        let path = directory.path().join(file);
        if !path.exists() {
            return Err(Error::MissingFile(path));
        }
        Ok(Self {
            path,
            _directory: Some(directory),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobData for BlobFile {
    fn content(&self) -> Result<Bytes> {
        Ok(Bytes::from(fs::read(&self.path)?))
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::copy(&self.path, path)?;
        Ok(())
    }
}

/// Blob data that lives at a remote URL and is downloaded on demand.
///
/// Uses a blocking HTTP client, so it must be read from a worker thread
/// rather than from inside the event loop.
#[derive(Debug, Clone)]
pub struct BlobUrl {
    url: Url,
    timeout: Duration,
}

impl BlobUrl {
    /// Create with a default timeout of 30 seconds.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn fetch(&self) -> Result<Bytes> {
        let client = Client::builder().timeout(self.timeout).build()?;
        let response = client.get(self.url.clone()).send()?.error_for_status()?;
        Ok(response.bytes()?)
    }
}

impl BlobData for BlobUrl {
    fn content(&self) -> Result<Bytes> {
        self.fetch()
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.fetch()?)))
    }
}
