// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Upload statistics: additive counters accumulated bottom-up by the
//! directory walker.

use std::sync::Mutex;

/// Per-upload counters, additive under [`UploadStats::add`]. Mirrors
/// the `wr` field of a snapshot record (spec §3).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    /// Total number of blobs (chunks + metas) considered.
    pub blobs_count: u64,
    /// Blobs newly written to the blob store.
    pub blobs_uploaded: u64,
    /// Blobs that already existed and were skipped.
    pub blobs_skipped: u64,
    /// Bytes newly written to the blob store.
    pub size_uploaded: u64,
    /// Bytes skipped because the blob already existed.
    pub size_skipped: u64,
    /// Total bytes considered.
    pub size: u64,
    /// Total files considered.
    pub files_count: u64,
    /// Files that required at least one new blob.
    pub files_uploaded: u64,
    /// Files that were entirely deduplicated.
    pub files_skipped: u64,
    /// Total directories considered.
    pub dirs_count: u64,
    /// Directories whose meta was newly written.
    pub dirs_uploaded: u64,
    /// Directories entirely deduplicated.
    pub dirs_skipped: u64,
}

impl UploadStats {
    /// Folds `other`'s counters into `self`, field-by-field.
    pub fn add(&mut self, other: &Self) {
        self.blobs_count += other.blobs_count;
        self.blobs_uploaded += other.blobs_uploaded;
        self.blobs_skipped += other.blobs_skipped;
        self.size_uploaded += other.size_uploaded;
        self.size_skipped += other.size_skipped;
        self.size += other.size;
        self.files_count += other.files_count;
        self.files_uploaded += other.files_uploaded;
        self.files_skipped += other.files_skipped;
        self.dirs_count += other.dirs_count;
        self.dirs_uploaded += other.dirs_uploaded;
        self.dirs_skipped += other.dirs_skipped;
    }
}

/// A shared, lock-guarded [`UploadStats`] accumulator, safe to fold
/// child results into from multiple walker worker threads at once.
#[derive(Default)]
pub struct SharedStats(Mutex<UploadStats>);

impl SharedStats {
    /// Creates a zeroed accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self(Mutex::new(UploadStats::default()))
    }

    /// Folds `other` into the shared total under the internal lock.
    pub fn add(&self, other: &UploadStats) {
        #[allow(clippy::unwrap_used)]
        self.0.lock().unwrap().add(other);
    }

    /// Snapshots the current totals.
    #[must_use]
    pub fn get(&self) -> UploadStats {
        #[allow(clippy::unwrap_used)]
        *self.0.lock().unwrap()
    }
}
