// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The read-only FUSE adapter (spec §4.G): presents a host's snapshot
//! history as `/<hostname>/latest/...` and
//! `/<hostname>/snapshots/<set>/<time>/...`.

mod inode;

use crate::blob::BlobStore;
use crate::kv::VersionedKv;
use crate::meta::{Meta, Refs};
use crate::reader::{ChunkCache, FileReader};
use crate::snapshot;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request,
};
use inode::{InodeTable, NodeKey, ROOT_INO};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const TTL: Duration = Duration::from_secs(1);

/// Mounts a read-only view of every snapshot known to a blob/KV
/// store pair.
pub struct SnapshotFs {
    blob: Arc<dyn BlobStore>,
    kv: Arc<dyn VersionedKv>,
    chunk_cache: Arc<ChunkCache>,
    inodes: InodeTable,
    open_files: HashMap<u64, FileReader>,
    next_fh: u64,
}

impl SnapshotFs {
    /// Builds a filesystem over `blob`/`kv`.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>, kv: Arc<dyn VersionedKv>) -> Self {
        Self {
            blob,
            kv,
            chunk_cache: Arc::new(ChunkCache::default()),
            inodes: InodeTable::new(),
            open_files: HashMap::new(),
            next_fh: 1,
        }
    }

    fn now_unix_nanos(&self) -> i64 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
    }

    fn hostnames(&self) -> Vec<String> {
        let mut names: Vec<String> = snapshot::list_latest(self.kv.as_ref())
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.hostname)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn fetch_meta(&self, hash: &str) -> Option<Meta> {
        let bytes = self.blob.get(hash).ok()?;
        Meta::from_json(&bytes).ok()
    }

    /// Children of a `NodeKey`, as `(name, child key, file type)`.
    fn children(&self, key: &NodeKey) -> Vec<(String, NodeKey, FileType)> {
        match key {
            NodeKey::Root => self
                .hostnames()
                .into_iter()
                .map(|h| (h.clone(), NodeKey::HostRoot { hostname: h }, FileType::Directory))
                .collect(),

            NodeKey::HostRoot { hostname } => vec![
                ("latest".to_string(), NodeKey::HostLatest { hostname: hostname.clone() }, FileType::Directory),
                (
                    "snapshots".to_string(),
                    NodeKey::HostSnapshots { hostname: hostname.clone() },
                    FileType::Directory,
                ),
            ],

            NodeKey::HostLatest { hostname } => snapshot::list_latest(self.kv.as_ref())
                .unwrap_or_default()
                .into_iter()
                .filter(|r| &r.hostname == hostname)
                .filter_map(|r| {
                    let meta = self.fetch_meta(&r.meta_ref)?;
                    Some((meta.name.clone(), NodeKey::Meta { hash: r.meta_ref }, meta_file_type(&meta)))
                })
                .collect(),

            NodeKey::HostSnapshots { hostname } => snapshot::list_latest(self.kv.as_ref())
                .unwrap_or_default()
                .into_iter()
                .filter(|r| &r.hostname == hostname)
                .map(|r| {
                    let name = std::path::Path::new(&r.path)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or(r.path);
                    (name, NodeKey::SnapshotsDir { snap_set_key: r.snap_set_key }, FileType::Directory)
                })
                .collect(),

            NodeKey::SnapshotsDir { snap_set_key } => {
                let now = self.now_unix_nanos();
                let versions = snapshot::list_versions_raw(self.kv.as_ref(), snap_set_key, now).unwrap_or_default();

                // RFC3339 names only have second resolution; two
                // versions of the same set can land in the same
                // second, so a repeat gets the nanos appended to stay
                // unique in `readdir`.
                let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
                versions
                    .into_iter()
                    .map(|(version_nanos, record)| {
                        let base = crate::time_fmt::unix_secs_to_rfc3339(version_nanos / 1_000_000_000);
                        let name = if seen.contains(&base) { format!("{base}.{version_nanos}") } else { base };
                        seen.insert(name.clone());
                        (
                            name,
                            NodeKey::SnapshotDir { snap_set_key: snap_set_key.clone(), version_nanos },
                            FileType::Directory,
                        )
                    })
                    .collect()
            }

            NodeKey::SnapshotDir { snap_set_key, version_nanos } => {
                let now = self.now_unix_nanos().max(*version_nanos);
                snapshot::list_versions_raw(self.kv.as_ref(), snap_set_key, now)
                    .unwrap_or_default()
                    .into_iter()
                    .find(|(v, _)| v == version_nanos)
                    .and_then(|(_, record)| {
                        let meta = self.fetch_meta(&record.meta_ref)?;
                        Some(vec![(
                            meta.name.clone(),
                            NodeKey::Meta { hash: record.meta_ref },
                            meta_file_type(&meta),
                        )])
                    })
                    .unwrap_or_default()
            }

            NodeKey::Meta { hash } => {
                let Some(meta) = self.fetch_meta(hash) else { return Vec::new() };
                let Refs::Dir(children) = meta.refs else { return Vec::new() };
                children
                    .into_iter()
                    .filter_map(|child_hash| {
                        let child_meta = self.fetch_meta(&child_hash)?;
                        let kind = meta_file_type(&child_meta);
                        Some((child_meta.name, NodeKey::Meta { hash: child_hash }, kind))
                    })
                    .collect()
            }
        }
    }

    fn attr_for(&self, ino: u64, key: &NodeKey) -> Option<FileAttr> {
        match key {
            NodeKey::Meta { hash } => {
                let meta = self.fetch_meta(hash)?;
                Some(file_attr(ino, &meta))
            }
            _ => Some(dir_attr(ino)),
        }
    }
}

fn meta_file_type(meta: &Meta) -> FileType {
    match meta.refs {
        Refs::Dir(_) => FileType::Directory,
        Refs::File(_) => FileType::RegularFile,
    }
}

fn dir_attr(ino: u64) -> FileAttr {
    let now = SystemTime::now();
    FileAttr {
        ino,
        size: 0,
        blocks: 0,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: FileType::Directory,
        perm: 0o555,
        nlink: 2,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

fn file_attr(ino: u64, meta: &Meta) -> FileAttr {
    let mtime = parse_rfc3339(&meta.mtime).unwrap_or(SystemTime::UNIX_EPOCH);
    let kind = meta_file_type(meta);
    FileAttr {
        ino,
        size: meta.size,
        blocks: meta.size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind,
        #[allow(clippy::cast_possible_truncation)]
        perm: (meta.mode & 0o777) as u16,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

fn parse_rfc3339(s: &str) -> Option<SystemTime> {
    use time::format_description::well_known::Rfc3339;
    let odt = time::OffsetDateTime::parse(s, &Rfc3339).ok()?;
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(u64::try_from(odt.unix_timestamp()).ok()?))
}

impl Filesystem for SnapshotFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_key) = self.inodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        let Some((_, child_key, _)) = self.children(&parent_key).into_iter().find(|(n, ..)| n == name) else {
            reply.error(libc::ENOENT);
            return;
        };

        let ino = self.inodes.intern(child_key.clone());
        let Some(attr) = self.attr_for(ino, &child_key) else {
            reply.error(libc::EIO);
            return;
        };
        reply.entry(&TTL, &attr, 0);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(key) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(attr) = self.attr_for(ino, &key) else {
            reply.error(libc::EIO);
            return;
        };
        reply.attr(&TTL, &attr);
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(key) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let mut entries = vec![(".".to_string(), ino, FileType::Directory), ("..".to_string(), ino, FileType::Directory)];
        for (name, child_key, kind) in self.children(&key) {
            let child_ino = self.inodes.intern(child_key);
            entries.push((name, child_ino, kind));
        }

        #[allow(clippy::cast_sign_loss)]
        for (i, (name, ino, kind)) in entries.into_iter().enumerate().skip(offset as usize) {
            #[allow(clippy::cast_possible_wrap)]
            let next_offset = i as i64 + 1;
            if reply.add(ino, next_offset, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(NodeKey::Meta { hash }) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(meta) = self.fetch_meta(&hash) else {
            reply.error(libc::EIO);
            return;
        };
        let Ok(reader) = FileReader::new(meta, Arc::clone(&self.blob), Arc::clone(&self.chunk_cache)) else {
            reply.error(libc::EIO);
            return;
        };

        let fh = self.next_fh;
        self.next_fh += 1;
        self.open_files.insert(fh, reader);
        reply.opened(fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(reader) = self.open_files.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let mut buf = vec![0u8; size as usize];
        #[allow(clippy::cast_sign_loss)]
        match reader.read_at(&mut buf, offset as u64) {
            Ok(n) => {
                buf.truncate(n);
                reply.data(&buf);
            }
            Err(_) => reply.error(libc::EIO),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.open_files.remove(&fh);
        reply.ok();
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // Read-only filesystem: attribute changes are silently
        // accepted but never applied (spec §4.G: "Setattr is a no-op").
        let Some(key) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_for(ino, &key) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(libc::EIO),
        }
    }
}

/// Everything needed to mount a [`SnapshotFs`] with `fuser::mount2`.
#[must_use]
pub fn read_only_mount_options(fsname: &str) -> Vec<fuser::MountOption> {
    vec![
        fuser::MountOption::RO,
        fuser::MountOption::FSName(fsname.to_string()),
        fuser::MountOption::DefaultPermissions,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use crate::kv::EmbeddedKv;
    use crate::walker::Walker;

    fn mounted_fs() -> SnapshotFs {
        let blob_dir = tempfile::tempdir().unwrap();
        let kv_dir = tempfile::tempdir().unwrap();
        let blob: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::open(blob_dir.path()).unwrap());
        let kv: Arc<dyn VersionedKv> = Arc::new(EmbeddedKv::open(kv_dir.path()).unwrap());

        let tree = tempfile::tempdir().unwrap();
        std::fs::write(tree.path().join("a.txt"), b"hi").unwrap();
        std::fs::create_dir(tree.path().join("b")).unwrap();
        std::fs::write(tree.path().join("b").join("c.txt"), b"hi").unwrap();

        let walker = Walker::new(Arc::clone(&blob));
        let (root_meta, stats) = walker.put(tree.path()).unwrap();

        snapshot::record_if_changed(kv.as_ref(), tree.path().to_str().unwrap(), "host1", root_meta.hash(), 1000, 1_000_000_000, stats)
            .unwrap();

        std::mem::forget(blob_dir);
        std::mem::forget(kv_dir);
        std::mem::forget(tree);

        SnapshotFs::new(blob, kv)
    }

    #[test]
    fn root_lists_known_hostnames() {
        let fs = mounted_fs();
        let children = fs.children(&NodeKey::Root);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, "host1");
    }

    #[test]
    fn host_root_has_latest_and_snapshots() {
        let fs = mounted_fs();
        let children = fs.children(&NodeKey::HostRoot { hostname: "host1".into() });
        let names: Vec<_> = children.iter().map(|(n, ..)| n.clone()).collect();
        assert_eq!(names, vec!["latest", "snapshots"]);
    }

    #[test]
    fn latest_points_directly_at_root_meta_children() {
        let fs = mounted_fs();
        let latest_children = fs.children(&NodeKey::HostLatest { hostname: "host1".into() });
        assert_eq!(latest_children.len(), 1);

        let (_, root_key, kind) = &latest_children[0];
        assert_eq!(*kind, FileType::Directory);
        let root_contents = fs.children(root_key);
        let mut names: Vec<_> = root_contents.iter().map(|(n, ..)| n.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b"]);
    }

    #[test]
    fn reading_a_file_meta_reached_through_latest_returns_its_bytes() {
        let fs = mounted_fs();
        let latest_children = fs.children(&NodeKey::HostLatest { hostname: "host1".into() });
        let (_, root_key, _) = &latest_children[0];
        let root_contents = fs.children(root_key);

        let (_, a_key, _) = root_contents.iter().find(|(n, ..)| n == "a.txt").unwrap();
        let NodeKey::Meta { hash } = a_key else { panic!("expected a meta key") };
        let meta = fs.fetch_meta(hash).unwrap();

        let mut reader = FileReader::new(meta, Arc::clone(&fs.blob), Arc::clone(&fs.chunk_cache)).unwrap();
        let mut buf = vec![0u8; 2];
        let n = reader.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"hi");
    }

    #[test]
    fn snapshots_dir_wraps_one_more_level_than_latest() {
        let fs = mounted_fs();
        let snapshots_children = fs.children(&NodeKey::HostSnapshots { hostname: "host1".into() });
        assert_eq!(snapshots_children.len(), 1);

        let (_, set_key, _) = &snapshots_children[0];
        let versions = fs.children(set_key);
        assert_eq!(versions.len(), 1);

        let (_, version_key, _) = &versions[0];
        let wrapper = fs.children(version_key);
        assert_eq!(wrapper.len(), 1);

        let (_, root_key, _) = &wrapper[0];
        let root_contents = fs.children(root_key);
        let mut names: Vec<_> = root_contents.iter().map(|(n, ..)| n.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b"]);
    }

    #[test]
    fn two_versions_in_the_same_second_get_distinct_directory_names() {
        let kv_dir = tempfile::tempdir().unwrap();
        let blob_dir = tempfile::tempdir().unwrap();
        let blob: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::open(blob_dir.path()).unwrap());
        let kv: Arc<dyn VersionedKv> = Arc::new(EmbeddedKv::open(kv_dir.path()).unwrap());

        let path = "/data/set";
        let stats = crate::stats::UploadStats { size_uploaded: 1, ..Default::default() };
        // Same path/hostname (same snap-set key), same whole second,
        // distinct nanosecond versions.
        snapshot::record_if_changed(kv.as_ref(), path, "host1", "a".repeat(64), 1000, 1_000_000_000, stats).unwrap();
        snapshot::record_if_changed(kv.as_ref(), path, "host1", "b".repeat(64), 1000, 1_000_000_500, stats).unwrap();

        let fs = SnapshotFs::new(blob, kv);
        let snapshots_children = fs.children(&NodeKey::HostSnapshots { hostname: "host1".into() });
        assert_eq!(snapshots_children.len(), 1);

        let (_, set_key, _) = &snapshots_children[0];
        let versions = fs.children(set_key);
        assert_eq!(versions.len(), 2);

        let names: Vec<_> = versions.iter().map(|(n, ..)| n.clone()).collect();
        assert_eq!(names.iter().collect::<std::collections::HashSet<_>>().len(), 2);
    }
}
