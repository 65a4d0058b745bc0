//! # thingworks-blob
//!
//! Binary outputs for Thing actions.
//!
//! Some action results are not sensibly JSON: camera frames, spectra, data
//! files. An action returns these as a [`Blob`], a payload plus media type,
//! whose bytes may live in memory, in a file, or at a remote URL. Readers never
//! see which: every backing implements the same [`BlobData`] contract.
//!
//! ## Handles
//!
//! When a blob is sent to a client it is replaced by a [`BlobHandle`], whose
//! `href` points at a download route. The [`BlobRegistry`] behind those routes
//! holds only weak references:
//!
//! ```ignore
//! use std::sync::Arc;
//! use thingworks_blob::{Blob, BlobRegistry};
//!
//! let registry = BlobRegistry::default();
//! let output = Arc::new(Blob::from_bytes(jpeg, "image/jpeg"));
//!
//! let handle = registry.register(&output);
//! let bytes = registry.read(handle.id)?;   // works while `output` is alive
//!
//! drop(output);                            // invocation evicted
//! registry.read(handle.id);                // Err(Error::Gone(..))
//! ```
//!
//! A handle resolves only while it is unexpired *and* its blob is still owned
//! by someone, normally the invocation that produced it.

pub mod blob;
pub mod data;
pub mod error;
pub mod registry;

pub use blob::{Blob, ANY_MEDIA_TYPE};
pub use data::{BlobBytes, BlobData, BlobFile, BlobUrl};
pub use error::{Error, Result};
pub use registry::{BlobHandle, BlobId, BlobRegistry, BLOB_PATH, DEFAULT_BLOB_EXPIRY};
