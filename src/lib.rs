// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A content-addressed snapshot engine: files are split into blobs by
//! a rolling-hash chunker, deduplicated against a blob store, and
//! assembled into a Merkle-ish tree of `file`/`dir` metas. A versioned
//! key/value store records one timestamped root-meta pointer per
//! `(hostname, path)` pair, and a read-only FUSE adapter exposes the
//! resulting history as an ordinary directory tree.
//!
//! Start at [`walker::Walker`] to upload a tree, [`reader::FileReader`]
//! to read one back, and [`fs::SnapshotFs`] to mount the whole thing.

pub mod atomic;
pub mod blob;
pub mod chunker;
pub mod error;
pub mod hash;
pub mod kv;
pub mod meta;
pub mod reader;
pub mod snapshot;
pub mod stats;
pub mod time_fmt;
pub mod walker;
pub mod writer;

#[cfg(feature = "fuse")]
pub mod fs;

pub use blob::BlobStore;
pub use error::{Error, Result};
pub use kv::VersionedKv;
pub use meta::Meta;
