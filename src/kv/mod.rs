// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The versioned key/value store capability: a key maps to an
//! ordered list of `(version, bytes)` tuples, with range iteration.

mod embedded;

pub use embedded::EmbeddedKv;

use crate::error::Result;

/// One `(key, version, data)` tuple, the flattened unit [`VersionedKv::entries`]
/// and [`VersionedKv::dump`] iterate over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The key this version belongs to.
    pub key: String,
    /// The version tag this record was written with.
    pub version: i64,
    /// The stored payload.
    pub data: Vec<u8>,
}

/// All versions of a single key, sorted ascending by version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryVersions {
    /// The key these versions belong to.
    pub key: String,
    /// `(version, data)` pairs, ascending by version.
    pub versions: Vec<(i64, Vec<u8>)>,
}

/// A key → ordered-list-of-versions store. Implementations must be
/// safe for concurrent use.
pub trait VersionedKv: Send + Sync {
    /// Prepends a new version of `key`. Versions for a key are kept
    /// newest-first on disk but returned ascending by
    /// [`Self::versions`].
    ///
    /// # Errors
    /// Returns [`crate::error::Error::KvIo`] on a storage failure.
    fn put(&self, key: &str, data: &[u8], version: i64) -> Result<()>;

    /// Returns every stored `(key, version, data)` tuple whose key
    /// falls in `[begin, end]`.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::KvIo`] on a storage failure.
    fn entries(&self, begin: &str, end: &str, limit: usize) -> Result<Vec<Entry>>;

    /// Returns the versions of `key` whose version falls in the
    /// half-open range `[begin_ver, end_ver)`, sorted ascending.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::KvIo`] on a storage failure.
    fn versions(
        &self,
        key: &str,
        begin_ver: i64,
        end_ver: i64,
        limit: usize,
    ) -> Result<EntryVersions>;

    /// Returns every stored `(key, version, data)` tuple, for
    /// diagnostics.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::KvIo`] on a storage failure.
    fn dump(&self) -> Result<Vec<Entry>>;
}

impl<T: VersionedKv + ?Sized> VersionedKv for std::sync::Arc<T> {
    fn put(&self, key: &str, data: &[u8], version: i64) -> Result<()> {
        (**self).put(key, data, version)
    }

    fn entries(&self, begin: &str, end: &str, limit: usize) -> Result<Vec<Entry>> {
        (**self).entries(begin, end, limit)
    }

    fn versions(
        &self,
        key: &str,
        begin_ver: i64,
        end_ver: i64,
        limit: usize,
    ) -> Result<EntryVersions> {
        (**self).versions(key, begin_ver, end_ver, limit)
    }

    fn dump(&self) -> Result<Vec<Entry>> {
        (**self).dump()
    }
}
