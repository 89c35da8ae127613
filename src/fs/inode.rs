// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Lazy, bidirectional inode table: FUSE addresses everything by a
//! `u64` inode, but this filesystem's real addresses are structured
//! keys (a hostname, a snap-set key, a meta hash, ...). Inodes are
//! minted the first time a key is seen and reused after that.

use crate::hash::Hash;
use std::collections::HashMap;

/// The root inode number, fixed by FUSE convention.
pub const ROOT_INO: u64 = 1;

/// Every reachable node in the snapshot hierarchy (spec §4.G's state
/// machine), keyed in a way that's stable across calls so the same
/// logical path always maps back to the same inode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// `/`: one entry per known hostname.
    Root,
    /// `/<hostname>`: fixed `latest` and `snapshots` entries.
    HostRoot { hostname: String },
    /// `/<hostname>/latest`: one entry per snap set, each pointing
    /// directly at that set's most recent root meta.
    HostLatest { hostname: String },
    /// `/<hostname>/snapshots`: one entry per snap set.
    HostSnapshots { hostname: String },
    /// `/<hostname>/snapshots/<set-name>`: one entry per historical
    /// version, named by RFC3339 time.
    SnapshotsDir { snap_set_key: Hash },
    /// `/<hostname>/snapshots/<set-name>/<time>`: a single entry
    /// (the root meta's own name) pointing at that version's root.
    SnapshotDir { snap_set_key: Hash, version_nanos: i64 },
    /// A file or directory meta, reached either directly (latest) or
    /// through a [`NodeKey::SnapshotDir`] indirection.
    Meta { hash: Hash },
}

/// Bidirectional `inode <-> NodeKey` map, filled in lazily as `lookup`
/// and `readdir` calls walk the hierarchy. Not internally
/// synchronized: fuser's default session loop delivers requests
/// sequentially through `&mut self`.
pub struct InodeTable {
    by_ino: HashMap<u64, NodeKey>,
    by_key: HashMap<NodeKey, u64>,
    next_ino: u64,
}

impl InodeTable {
    /// Creates a table with only the root inode populated.
    #[must_use]
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_key = HashMap::new();
        by_ino.insert(ROOT_INO, NodeKey::Root);
        by_key.insert(NodeKey::Root, ROOT_INO);
        Self { by_ino, by_key, next_ino: ROOT_INO + 1 }
    }

    /// Returns the inode for `key`, minting a new one if this is the
    /// first time it's been seen.
    pub fn intern(&mut self, key: NodeKey) -> u64 {
        if let Some(&ino) = self.by_key.get(&key) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_ino.insert(ino, key.clone());
        self.by_key.insert(key, ino);
        ino
    }

    /// Looks up the key a known inode was minted for.
    #[must_use]
    pub fn get(&self, ino: u64) -> Option<NodeKey> {
        self.by_ino.get(&ino).cloned()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
