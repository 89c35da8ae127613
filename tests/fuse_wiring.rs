// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Wiring checks for the FUSE adapter's public surface. The
//! `fuser::Filesystem` callbacks themselves (`lookup`, `readdir`,
//! `read`) need a live kernel mount to drive — see the `children`/
//! `fetch_meta`-based scenarios in `src/fs/mod.rs`'s own test module
//! for coverage of the hierarchy those callbacks walk.

#![cfg(feature = "fuse")]

use blobsnap::blob::{BlobStore, LocalBlobStore};
use blobsnap::fs::{read_only_mount_options, SnapshotFs};
use blobsnap::kv::{EmbeddedKv, VersionedKv};
use std::sync::Arc;

#[test]
fn read_only_mount_options_disallow_writes() {
    let options = read_only_mount_options("blobsnap-test");
    assert!(options.iter().any(|o| matches!(o, fuser::MountOption::RO)));
    assert!(!options.iter().any(|o| matches!(o, fuser::MountOption::RW)));
}

#[test]
fn snapshot_fs_builds_over_an_empty_store_pair() {
    let blob_dir = tempfile::tempdir().unwrap();
    let kv_dir = tempfile::tempdir().unwrap();
    let blob: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::open(blob_dir.path()).unwrap());
    let kv: Arc<dyn VersionedKv> = Arc::new(EmbeddedKv::open(kv_dir.path()).unwrap());

    // Building over a store with no recorded snapshots must not panic;
    // an empty host list is the correct answer for a fresh store.
    let _fs = SnapshotFs::new(blob, kv);
}
