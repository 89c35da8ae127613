// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The blob store capability: `stat`/`get`/`put` by hex hash.
//!
//! A narrow trait rather than a base class, so new backends (remote
//! object storage, a read-through cache in front of one) compose by
//! wrapping, not by inheriting.

mod cache;
mod local;

pub use cache::CachingBlobStore;
pub use local::LocalBlobStore;

use crate::error::Result;

/// A content-addressed object store, keyed by lowercase hex blake2b-256
/// hash. Implementations must be safe for concurrent use: the
/// directory walker calls `stat`/`put` from many worker threads at
/// once.
pub trait BlobStore: Send + Sync {
    /// Returns whether a blob with this hash is already stored.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::BlobIo`] on a storage failure.
    fn stat(&self, hash: &str) -> Result<bool>;

    /// Reads a blob's full contents.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::NotFound`] if the hash is
    /// unknown, or [`crate::error::Error::BlobIo`] on a storage
    /// failure.
    fn get(&self, hash: &str) -> Result<Vec<u8>>;

    /// Stores a blob. Idempotent: storing the same hash twice is a
    /// no-op from the caller's perspective (content addressing makes
    /// partial/duplicate writes safe to retry).
    ///
    /// # Errors
    /// Returns [`crate::error::Error::BlobIo`] on a storage failure.
    fn put(&self, hash: &str, bytes: &[u8]) -> Result<()>;
}

impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    fn stat(&self, hash: &str) -> Result<bool> {
        (**self).stat(hash)
    }

    fn get(&self, hash: &str) -> Result<Vec<u8>> {
        (**self).get(hash)
    }

    fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        (**self).put(hash, bytes)
    }
}
