// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{BlobStore, LocalBlobStore};
use crate::error::Result;

/// Wraps any [`BlobStore`] with a local-directory read-through cache,
/// per spec §4.H ("a remote adapter optionally wrapped with a
/// local-directory read-through cache"). `stat`/`get` consult the
/// cache first; a cache miss falls through to `inner` and populates
/// the cache. `put` always goes to `inner` (the source of truth) and
/// is mirrored into the cache so a blob this process just wrote is
/// immediately readable without a round-trip.
pub struct CachingBlobStore<I> {
    inner: I,
    cache: LocalBlobStore,
}

impl<I: BlobStore> CachingBlobStore<I> {
    /// Wraps `inner`, caching blobs under `cache_dir` on local disk.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::BlobIo`] if `cache_dir` cannot
    /// be created.
    pub fn new(inner: I, cache_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        Ok(Self { inner, cache: LocalBlobStore::open(cache_dir)? })
    }
}

impl<I: BlobStore> BlobStore for CachingBlobStore<I> {
    fn stat(&self, hash: &str) -> Result<bool> {
        if self.cache.stat(hash)? {
            return Ok(true);
        }
        self.inner.stat(hash)
    }

    fn get(&self, hash: &str) -> Result<Vec<u8>> {
        if self.cache.stat(hash)? {
            return self.cache.get(hash);
        }
        let bytes = self.inner.get(hash)?;
        self.cache.put(hash, &bytes)?;
        Ok(bytes)
    }

    fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        self.inner.put(hash, bytes)?;
        self.cache.put(hash, bytes)
    }
}
