// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Entry, EntryVersions, VersionedKv};
use crate::atomic::rewrite_atomic;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Bolt-like embedded versioned KV store: each key is one file on
/// disk, holding its version chain as concatenated
/// `{i64 LE version, i64 LE length, length bytes}` records, newest
/// first (a `put` prepends). The on-disk shape matches spec §4.H/§6
/// exactly, so a dump of this store is wire-compatible with any other
/// implementation of the same layout.
pub struct EmbeddedKv {
    root: PathBuf,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl EmbeddedKv {
    /// Opens (creating if necessary) an embedded KV store rooted at `root`.
    ///
    /// # Errors
    /// Returns [`Error::KvIo`] if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(Error::KvIo)?;
        Ok(Self { root, locks: RwLock::new(HashMap::new()) })
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().expect("lock poisoned").get(key) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().expect("lock poisoned");
        Arc::clone(locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }

    fn key_from_file_name(name: &str) -> Option<String> {
        let bytes = hex::decode(name).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn read_records(path: &Path) -> Result<Vec<(i64, Vec<u8>)>> {
        match std::fs::read(path) {
            Ok(bytes) => decode_records(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::KvIo(e)),
        }
    }

    fn for_each_key_file<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &Path) -> Result<()>,
    {
        let dirents = std::fs::read_dir(&self.root).map_err(Error::KvIo)?;
        for dirent in dirents {
            let dirent = dirent.map_err(Error::KvIo)?;
            let file_name = dirent.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            let Some(key) = Self::key_from_file_name(file_name) else { continue };
            f(&key, &dirent.path())?;
        }
        Ok(())
    }
}

impl VersionedKv for EmbeddedKv {
    fn put(&self, key: &str, data: &[u8], version: i64) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().expect("lock poisoned");

        let path = self.file_path(key);
        let existing = std::fs::read(&path).unwrap_or_default();

        let mut buf = Vec::with_capacity(16 + data.len() + existing.len());
        encode_record(&mut buf, version, data);
        buf.extend_from_slice(&existing);

        rewrite_atomic(&path, &buf).map_err(Error::KvIo)
    }

    fn entries(&self, begin: &str, end: &str, limit: usize) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        self.for_each_key_file(|key, path| {
            if key < begin || key > end {
                return Ok(());
            }
            for (version, data) in Self::read_records(path)? {
                if limit != 0 && out.len() >= limit {
                    return Ok(());
                }
                out.push(Entry { key: key.to_string(), version, data });
            }
            Ok(())
        })?;
        out.sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));
        if limit != 0 {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn versions(
        &self,
        key: &str,
        begin_ver: i64,
        end_ver: i64,
        limit: usize,
    ) -> Result<EntryVersions> {
        let records = Self::read_records(&self.file_path(key))?;
        let mut versions: Vec<(i64, Vec<u8>)> = records
            .into_iter()
            .filter(|(v, _)| *v >= begin_ver && *v < end_ver)
            .collect();
        versions.sort_by_key(|(v, _)| *v);
        if limit != 0 {
            versions.truncate(limit);
        }
        Ok(EntryVersions { key: key.to_string(), versions })
    }

    fn dump(&self) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        self.for_each_key_file(|key, path| {
            for (version, data) in Self::read_records(path)? {
                out.push(Entry { key: key.to_string(), version, data });
            }
            Ok(())
        })?;
        out.sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));
        Ok(out)
    }
}

fn encode_record(out: &mut Vec<u8>, version: i64, data: &[u8]) {
    out.extend_from_slice(&version.to_le_bytes());
    #[allow(clippy::cast_possible_wrap)]
    let len = data.len() as i64;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
}

/// Decodes a concatenated record stream, stopping cleanly at EOF
/// (spec §4.H: "Decoding stops at EOF").
fn decode_records(bytes: &[u8]) -> Result<Vec<(i64, Vec<u8>)>> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    loop {
        if pos == bytes.len() {
            break;
        }
        if pos + 16 > bytes.len() {
            return Err(Error::Decode("truncated kv record header".into()));
        }

        let version = i64::from_le_bytes(bytes[pos..pos + 8].try_into().expect("8 bytes"));
        let len = i64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().expect("8 bytes"));
        pos += 16;

        let len = usize::try_from(len).map_err(|_| Error::Decode("negative kv record length".into()))?;
        if pos + len > bytes.len() {
            return Err(Error::Decode("truncated kv record payload".into()));
        }

        out.push((version, bytes[pos..pos + len].to_vec()));
        pos += len;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_returned_sorted_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();

        kv.put("k", b"v1", 10).unwrap();
        kv.put("k", b"v2", 20).unwrap();

        let result = kv.versions("k", 0, 100, 0).unwrap();
        assert_eq!(
            result.versions,
            vec![(10, b"v1".to_vec()), (20, b"v2".to_vec())]
        );
    }

    #[test]
    fn versions_range_is_half_open() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();
        kv.put("k", b"v1", 10).unwrap();
        kv.put("k", b"v2", 20).unwrap();

        let result = kv.versions("k", 10, 20, 0).unwrap();
        assert_eq!(result.versions, vec![(10, b"v1".to_vec())]);
    }

    #[test]
    fn entries_filters_by_key_range() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();
        kv.put("a", b"1", 1).unwrap();
        kv.put("m", b"2", 1).unwrap();
        kv.put("z", b"3", 1).unwrap();

        let entries = kv.entries("b", "y", 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "m");
    }

    #[test]
    fn dump_returns_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();
        kv.put("a", b"1", 1).unwrap();
        kv.put("a", b"2", 2).unwrap();
        kv.put("b", b"3", 1).unwrap();

        let all = kv.dump().unwrap();
        assert_eq!(all.len(), 3);
    }
}
