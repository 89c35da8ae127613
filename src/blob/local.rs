// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::BlobStore;
use crate::atomic::rewrite_atomic;
use crate::error::{Error, Result};
use std::path::PathBuf;

/// File-per-blob local-disk blob store: each blob lives at
/// `<root>/<hex hash>`. Writes are made durable with a temp-file +
/// rename so a crash mid-write never leaves a blob whose content
/// doesn't match its name.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Opens (creating if necessary) a local blob store rooted at `root`.
    ///
    /// # Errors
    /// Returns [`Error::BlobIo`] if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(Error::BlobIo)?;
        Ok(Self { root })
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }
}

impl BlobStore for LocalBlobStore {
    fn stat(&self, hash: &str) -> Result<bool> {
        self.path_for(hash).try_exists().map_err(Error::BlobIo)
    }

    fn get(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.path_for(hash);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(hash.to_string()))
            }
            Err(e) => Err(Error::BlobIo(e)),
        }
    }

    fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        rewrite_atomic(&self.path_for(hash), bytes).map_err(Error::BlobIo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();

        assert!(!store.stat("deadbeef").unwrap());
        store.put("deadbeef", b"hello").unwrap();
        assert!(store.stat("deadbeef").unwrap());
        assert_eq!(store.get("deadbeef").unwrap(), b"hello");
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        store.put("k", b"v1").unwrap();
        store.put("k", b"v1").unwrap();
        assert_eq!(store.get("k").unwrap(), b"v1");
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        assert!(matches!(store.get("nope"), Err(Error::NotFound(_))));
    }
}
