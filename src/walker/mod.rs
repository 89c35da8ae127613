// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The concurrent directory walker (spec §4.D): uploads a tree with
//! bounded parallelism, assembling directory metas strictly after all
//! of their children are done.

mod exclude;
mod node;
mod semaphore;

pub use exclude::{ExcludeFilter, GlobSetExclude, NoExclude};
pub use node::NodeResult;

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::meta::{Meta, Refs};
use crate::stats::UploadStats;
use crate::time_fmt::to_rfc3339;
use crate::writer::{persist_meta, write_file};
use node::Node;
use semaphore::Semaphore;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// Default cap on concurrent file uploads (bounds open file
/// descriptors), per spec §4.D.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 25;

/// Default cap on concurrent directory-meta assemblies, per spec §4.D.
pub const DEFAULT_DIR_CONCURRENCY: usize = 12;

/// Shared, thread-safe state a walk's worker threads all reach
/// through: the two concurrency semaphores (the sole cross-task
/// synchronization on the write path, spec §5) and the blob store.
struct WalkContext {
    blob: Arc<dyn BlobStore>,
    upload_sem: Semaphore,
    dir_sem: Semaphore,
    exclude: Arc<dyn ExcludeFilter>,
}

/// Walks and uploads a directory tree to a blob store with bounded
/// parallelism.
pub struct Walker {
    ctx: Arc<WalkContext>,
}

impl Walker {
    /// Creates a walker with the spec's default concurrency caps and
    /// no path exclusions.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self::with_concurrency(blob, DEFAULT_UPLOAD_CONCURRENCY, DEFAULT_DIR_CONCURRENCY)
    }

    /// Creates a walker with explicit concurrency caps.
    #[must_use]
    pub fn with_concurrency(blob: Arc<dyn BlobStore>, upload_concurrency: usize, dir_concurrency: usize) -> Self {
        Self {
            ctx: Arc::new(WalkContext {
                blob,
                upload_sem: Semaphore::new(upload_concurrency.max(1)),
                dir_sem: Semaphore::new(dir_concurrency.max(1)),
                exclude: Arc::new(NoExclude),
            }),
        }
    }

    /// Installs a path-exclusion filter (spec §4.D.1 extension point).
    #[must_use]
    pub fn with_exclude(mut self, exclude: Arc<dyn ExcludeFilter>) -> Self {
        self.ctx = Arc::new(WalkContext {
            blob: Arc::clone(&self.ctx.blob),
            upload_sem: Semaphore::new(self.ctx.upload_sem.capacity()),
            dir_sem: Semaphore::new(self.ctx.dir_sem.capacity()),
            exclude,
        });
        self
    }

    /// Uploads the tree rooted at `path`, returning its root meta and
    /// aggregate upload statistics.
    ///
    /// # Errors
    /// Returns the first [`Error`] encountered anywhere in the tree
    /// (spec §4.D: "the directory walker preserves the first error
    /// encountered on the root").
    pub fn put(&self, path: &Path) -> Result<(Meta, UploadStats)> {
        let root = explore(&self.ctx, path)?;

        thread::scope(|scope| {
            spawn_node(scope, Arc::clone(&self.ctx), Arc::clone(&root));
            let result = root.wait_done()?;
            let bytes = self.ctx.blob.get(&result.meta_hash)?;
            let meta = Meta::from_json(&bytes)?;
            Ok((meta, result.stats))
        })
    }
}

fn explore(ctx: &WalkContext, path: &Path) -> Result<Arc<Node>> {
    let metadata =
        fs::symlink_metadata(path).map_err(|source| Error::SourceIo { path: path.to_path_buf(), source })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    let mtime = to_rfc3339(metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH));

    if metadata.is_dir() {
        let entries =
            fs::read_dir(path).map_err(|source| Error::SourceIo { path: path.to_path_buf(), source })?;

        let mut child_paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::SourceIo { path: path.to_path_buf(), source })?;
            child_paths.push(entry.path());
        }
        child_paths.sort();

        let mut children = Vec::with_capacity(child_paths.len());
        for child_path in child_paths {
            if ctx.exclude.excludes(&child_path) {
                continue;
            }
            let child_meta = fs::symlink_metadata(&child_path)
                .map_err(|source| Error::SourceIo { path: child_path.clone(), source })?;
            if child_meta.file_type().is_symlink() {
                continue;
            }
            children.push(explore(ctx, &child_path)?);
        }

        Ok(Arc::new(Node::new(path.to_path_buf(), name, true, metadata.mode(), mtime, children)))
    } else {
        Ok(Arc::new(Node::new(path.to_path_buf(), name, false, metadata.mode(), mtime, Vec::new())))
    }
}

fn spawn_node<'scope>(scope: &'scope thread::Scope<'scope, '_>, ctx: Arc<WalkContext>, node: Arc<Node>) {
    scope.spawn(move || {
        if node.is_dir {
            process_dir(scope, &ctx, &node);
        } else {
            process_file(&ctx, &node);
        }
    });
}

fn process_file(ctx: &WalkContext, node: &Node) {
    let _permit = ctx.upload_sem.acquire();

    let file = match fs::File::open(&node.path) {
        Ok(f) => f,
        Err(source) => {
            node.finish_err(Error::SourceIo { path: node.path.clone(), source });
            return;
        }
    };

    match write_file(file, &node.name, node.mode, &node.mtime, ctx.blob.as_ref()) {
        Ok(result) => {
            let skipped = result.stats.blobs_uploaded == 0;
            node.finish_ok(NodeResult {
                meta_hash: result.meta.hash(),
                content_size: result.meta.size,
                stats: result.stats,
                skipped,
            });
        }
        Err(error) => {
            log::warn!("failed to upload {}: {error}", node.path.display());
            node.finish_err(error);
        }
    }
}

fn process_dir<'scope>(scope: &'scope thread::Scope<'scope, '_>, ctx: &Arc<WalkContext>, node: &Arc<Node>) {
    for child in &node.children {
        spawn_node(scope, Arc::clone(ctx), Arc::clone(child));
    }

    let mut stats = UploadStats::default();
    let mut hashes: Vec<String> = Vec::with_capacity(node.children.len());
    let mut content_size: u64 = 0;
    let mut all_skipped = true;

    for child in &node.children {
        match child.wait_done() {
            Ok(result) => {
                stats.add(&result.stats);
                content_size += result.content_size;
                all_skipped &= result.skipped;
                hashes.push(result.meta_hash);
            }
            Err(error) => {
                node.finish_err(error);
                return;
            }
        }
    }

    hashes.sort();
    hashes.dedup();

    let dir_meta = Meta {
        name: node.name.clone(),
        size: content_size,
        mode: node.mode,
        mtime: node.mtime.clone(),
        refs: Refs::Dir(hashes),
    };

    if let Err(error) = dir_meta.validate() {
        node.finish_err(error);
        return;
    }

    // Acquired only around the meta put, not the child-wait above: a
    // permit held across `wait_done()` would deadlock on trees deeper
    // than the semaphore's capacity (every ancestor blocks on a child
    // while holding the permit the deepest descendant needs to finish).
    let _permit = ctx.dir_sem.acquire();

    let hash = match persist_meta(&dir_meta, ctx.blob.as_ref(), &mut stats) {
        Ok(h) => h,
        Err(error) => {
            node.finish_err(error);
            return;
        }
    };

    stats.dirs_count += 1;
    if all_skipped {
        stats.dirs_skipped += 1;
    } else {
        stats.dirs_uploaded += 1;
    }

    log::debug!("assembled dir {:?}: {} children", node.name, dir_meta_len(&dir_meta));

    node.finish_ok(NodeResult { meta_hash: hash, content_size, stats, skipped: all_skipped });
}

fn dir_meta_len(meta: &Meta) -> usize {
    match &meta.refs {
        Refs::Dir(refs) => refs.len(),
        Refs::File(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use std::io::Write as _;

    fn make_tree() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"hi").unwrap();
        std::fs::create_dir(root.path().join("b")).unwrap();
        std::fs::write(root.path().join("b").join("c.txt"), b"hi").unwrap();
        root
    }

    #[test]
    fn dedups_identical_file_contents_across_the_tree() {
        let blob_dir = tempfile::tempdir().unwrap();
        let blob = Arc::new(LocalBlobStore::open(blob_dir.path()).unwrap());
        let tree = make_tree();

        let walker = Walker::new(blob);
        let (root_meta, stats) = walker.put(tree.path()).unwrap();

        let Refs::Dir(children) = &root_meta.refs else { panic!("expected dir") };
        assert_eq!(children.len(), 2);
        assert!(stats.files_count >= 2);
    }

    #[test]
    fn second_upload_of_same_tree_uploads_nothing_new() {
        let blob_dir = tempfile::tempdir().unwrap();
        let blob = Arc::new(LocalBlobStore::open(blob_dir.path()).unwrap());
        let tree = make_tree();

        let walker = Walker::new(blob);
        let (first_meta, _) = walker.put(tree.path()).unwrap();
        let (second_meta, second_stats) = walker.put(tree.path()).unwrap();

        assert_eq!(first_meta.hash(), second_meta.hash());
        assert_eq!(second_stats.blobs_uploaded, 0);
    }

    #[test]
    fn enumeration_order_does_not_change_dir_meta_hash() {
        let blob_dir_a = tempfile::tempdir().unwrap();
        let blob_a = Arc::new(LocalBlobStore::open(blob_dir_a.path()).unwrap());
        let blob_dir_b = tempfile::tempdir().unwrap();
        let blob_b = Arc::new(LocalBlobStore::open(blob_dir_b.path()).unwrap());

        let tree_a = tempfile::tempdir().unwrap();
        std::fs::write(tree_a.path().join("1"), b"one").unwrap();
        std::fs::write(tree_a.path().join("2"), b"two").unwrap();

        let tree_b = tempfile::tempdir().unwrap();
        std::fs::write(tree_b.path().join("2"), b"two").unwrap();
        std::fs::write(tree_b.path().join("1"), b"one").unwrap();

        let (mut meta_a, _) = Walker::new(blob_a).put(tree_a.path()).unwrap();
        let (mut meta_b, _) = Walker::new(blob_b).put(tree_b.path()).unwrap();

        meta_a.name = "root".to_string();
        meta_b.name = "root".to_string();

        assert_eq!(meta_a.hash(), meta_b.hash());
    }

    #[test]
    fn source_io_error_propagates_to_root() {
        let blob_dir = tempfile::tempdir().unwrap();
        let blob = Arc::new(LocalBlobStore::open(blob_dir.path()).unwrap());

        let walker = Walker::new(blob);
        let result = walker.put(Path::new("/definitely/does/not/exist"));
        assert!(result.is_err());
    }

    #[test]
    fn exclude_filter_skips_matching_paths() {
        let blob_dir = tempfile::tempdir().unwrap();
        let blob = Arc::new(LocalBlobStore::open(blob_dir.path()).unwrap());
        let tree = make_tree();
        let mut f = std::fs::File::create(tree.path().join("skip.tmp")).unwrap();
        f.write_all(b"ignored").unwrap();

        let walker = Walker::new(blob).with_exclude(Arc::new(GlobSetExclude::new(["*.tmp"])));
        let (root_meta, _) = walker.put(tree.path()).unwrap();

        let Refs::Dir(children) = &root_meta.refs else { panic!("expected dir") };
        assert_eq!(children.len(), 2);
    }
}
