// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::error::Error;
use crate::hash::Hash;
use crate::stats::UploadStats;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};

/// One directory entry in the in-memory exploration tree. Carries its
/// own mutex + condition variable guarding its result slots, per
/// spec §4.D/§5: "the per-node mutex+condition-variable guards its
/// own result slots; no node-to-node lock nesting beyond
/// parent-waits-on-child is allowed."
pub struct Node {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub mode: u32,
    pub mtime: String,
    pub children: Vec<std::sync::Arc<Node>>,
    state: Mutex<NodeState>,
    cond: Condvar,
}

/// The persisted outcome of uploading one node.
#[derive(Clone)]
pub struct NodeResult {
    /// Hash of the node's own meta (file or directory).
    pub meta_hash: Hash,
    /// The node's own meta `size` field (content size, not blob bytes).
    pub content_size: u64,
    /// Upload counters contributed by this node and its subtree.
    pub stats: UploadStats,
    /// True if this node (and, for a directory, everything under it)
    /// required no new blobs.
    pub skipped: bool,
}

struct NodeState {
    done: bool,
    result: Option<NodeResult>,
    error: Option<Error>,
}

impl Node {
    pub fn new(
        path: PathBuf,
        name: String,
        is_dir: bool,
        mode: u32,
        mtime: String,
        children: Vec<std::sync::Arc<Node>>,
    ) -> Self {
        Self {
            path,
            name,
            is_dir,
            mode,
            mtime,
            children,
            state: Mutex::new(NodeState { done: false, result: None, error: None }),
            cond: Condvar::new(),
        }
    }

    /// Blocks until this node is done, then returns its result.
    ///
    /// # Errors
    /// Returns the error the node (or one of its descendants) failed
    /// with.
    #[allow(clippy::missing_panics_doc)]
    pub fn wait_done(&self) -> crate::error::Result<NodeResult> {
        let mut guard = self.state.lock().expect("lock poisoned");
        while !guard.done {
            guard = self.cond.wait(guard).expect("lock poisoned");
        }
        if let Some(error) = guard.error.take() {
            return Err(error);
        }
        #[allow(clippy::expect_used)]
        Ok(guard.result.clone().expect("done with neither result nor error"))
    }

    #[allow(clippy::missing_panics_doc)]
    pub fn finish_ok(&self, result: NodeResult) {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.result = Some(result);
        guard.done = true;
        drop(guard);
        self.cond.notify_all();
    }

    #[allow(clippy::missing_panics_doc)]
    pub fn finish_err(&self, error: Error) {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.error = Some(error);
        guard.done = true;
        drop(guard);
        self.cond.notify_all();
    }
}
