//! Expiring, non-owning handles for blobs that cross the HTTP boundary.
//!
//! The registry never keeps a blob alive. Each handle holds a `Weak` reference
//! and an expiry time; resolving fails once either the expiry passes or the
//! last strong owner (normally an invocation's stored output) drops the blob.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blob::Blob;
use crate::error::{Error, Result};

/// URL prefix under which blob handles are served.
pub const BLOB_PATH: &str = "/blob";

/// Default lifetime of a blob handle.
pub const DEFAULT_BLOB_EXPIRY: Duration = Duration::from_secs(300);

/// Opaque token identifying one issued blob handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Recover the id from an href such as `http://host/blob/{id}`.
    pub fn from_href(href: &str) -> Result<Self> {
        let (_, rest) = href
            .rsplit_once("blob/")
            .ok_or_else(|| Error::InvalidHref(href.to_string()))?;
        let token = rest.split(['/', '?', '#']).next().unwrap_or_default();
        token
            .parse()
            .map_err(|_| Error::InvalidHref(href.to_string()))
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A handle returned to clients in place of blob bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHandle {
    pub id: BlobId,
    pub media_type: String,
    pub expires_at: DateTime<Utc>,
}

impl BlobHandle {
    /// Path a client uses to download the blob.
    pub fn href(&self) -> String {
        format!("{}/{}", BLOB_PATH, self.id)
    }
}

struct Entry {
    blob: Weak<Blob>,
    /// `None` when the expiry lies beyond what `Instant` can represent.
    expires: Option<Instant>,
    window: Duration,
}

/// Registry of blob handles, shared by every request handler of one server.
pub struct BlobRegistry {
    entries: Mutex<HashMap<BlobId, Entry>>,
    default_expiry: Duration,
}

impl BlobRegistry {
    pub fn new(default_expiry: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_expiry,
        }
    }

    pub fn default_expiry(&self) -> Duration {
        self.default_expiry
    }

    /// Issue a handle using the registry's default expiry.
    pub fn register(&self, blob: &Arc<Blob>) -> BlobHandle {
        self.register_with_expiry(blob, self.default_expiry)
    }

    /// Issue a handle that stops resolving after `expiry`.
    pub fn register_with_expiry(&self, blob: &Arc<Blob>, expiry: Duration) -> BlobHandle {
        let id = BlobId::new();
        let now = Instant::now();
        let mut entries = self.lock();
        Self::purge_locked(&mut entries, now);
        entries.insert(
            id,
            Entry {
                blob: Arc::downgrade(blob),
                expires: now.checked_add(expiry),
                window: expiry,
            },
        );
        tracing::debug!(blob_id = %id, media_type = blob.media_type(), "blob.register");

        let expires_at = chrono::Duration::from_std(expiry)
            .ok()
            .and_then(|expiry| Utc::now().checked_add_signed(expiry))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        BlobHandle {
            id,
            media_type: blob.media_type().to_string(),
            expires_at,
        }
    }

    /// Look up the blob behind a handle.
    ///
    /// Expiry is checked before liveness, so a handle that is both expired and
    /// dangling reports [`Error::Expired`].
    pub fn resolve(&self, id: BlobId) -> Result<Arc<Blob>> {
        let entries = self.lock();
        let entry = entries.get(&id).ok_or(Error::NotFound(id))?;
        if entry.expires.is_some_and(|expires| Instant::now() >= expires) {
            return Err(Error::Expired(id));
        }
        entry.blob.upgrade().ok_or(Error::Gone(id))
    }

    /// Resolve a handle and read the whole payload.
    ///
    /// The registry lock is released before the blob is read.
    pub fn read(&self, id: BlobId) -> Result<Bytes> {
        let blob = self.resolve(id)?;
        blob.content()
    }

    /// Drop bookkeeping for handles that expired at least one window ago.
    ///
    /// Handles are kept for a while after expiry so that late clients see
    /// [`Error::Expired`] rather than [`Error::NotFound`].
    pub fn purge(&self) -> usize {
        let mut entries = self.lock();
        Self::purge_locked(&mut entries, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_locked(entries: &mut HashMap<BlobId, Entry>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| {
            entry
                .expires
                .and_then(|expires| expires.checked_add(entry.window))
                .map_or(true, |forget_at| now < forget_at)
        });
        before - entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BlobId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BlobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BLOB_EXPIRY)
    }
}

impl fmt::Debug for BlobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobRegistry")
            .field("handles", &self.len())
            .field("default_expiry", &self.default_expiry)
            .finish()
    }
}
