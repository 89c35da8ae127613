// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Random-access reading of a file [`Meta`] (spec §4.E): binary search
//! over `refs` to find the chunk covering a byte offset, with an LRU
//! cache in front of the blob store so sequential and re-read access
//! patterns don't re-fetch the same chunk from a cold backend.

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::meta::{Meta, Refs};
use quick_cache::sync::{Cache, DefaultLifecycle};
use quick_cache::UnitWeighter;
use std::sync::Arc;

/// Default chunk cache capacity. The original implementation used 2;
/// this crate's FUSE layer can have several open file handles racing
/// for the same backing chunks during a directory-wide `readdir` +
/// `read` burst, so the cache is sized a little more generously.
pub const DEFAULT_CHUNK_CACHE_CAPACITY: usize = 8;

/// An LRU cache of decoded chunk bytes, shared across [`FileReader`]s
/// so re-reading the same chunk (e.g. two files referencing the same
/// deduplicated block) is a cache hit rather than a blob store round
/// trip. Hashed with `rustc_hash` rather than the default `SipHash`,
/// which performed best for this kind of lookup-heavy cache.
pub struct ChunkCache {
    cache: Cache<Hash, Arc<Vec<u8>>, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl ChunkCache {
    /// Creates a cache holding at most `capacity` chunks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        #[allow(clippy::default_trait_access)]
        let cache = Cache::with(
            capacity,
            capacity as u64,
            UnitWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );
        Self { cache }
    }

    fn get_or_fetch(&self, blob: &dyn BlobStore, hash: &str) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.cache.get(hash) {
            return Ok(bytes);
        }
        let bytes = Arc::new(blob.get(hash)?);
        self.cache.insert(hash.to_string(), Arc::clone(&bytes));
        Ok(bytes)
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_CACHE_CAPACITY)
    }
}

/// Random-access reader over a single file [`Meta`].
pub struct FileReader {
    meta: Meta,
    blob: Arc<dyn BlobStore>,
    cache: Arc<ChunkCache>,
    /// Current position for the sequential [`std::io::Read`] impl.
    pos: u64,
}

impl FileReader {
    /// Opens a reader for `meta`, which must be a file-kind meta.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] if `meta` is a directory.
    pub fn new(meta: Meta, blob: Arc<dyn BlobStore>, cache: Arc<ChunkCache>) -> Result<Self> {
        if !matches!(meta.refs, Refs::File(_)) {
            return Err(Error::Decode(format!("{:?} is a directory, not a file", meta.name)));
        }
        Ok(Self { meta, blob, cache, pos: 0 })
    }

    /// The file's total byte size.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.meta.size
    }

    /// Whether the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meta.size == 0
    }

    fn refs(&self) -> &[(u64, Hash)] {
        let Refs::File(refs) = &self.meta.refs else { unreachable!("validated in new()") };
        refs
    }

    /// Finds the index of the chunk covering byte `offset`, plus that
    /// chunk's start offset. `refs[i].0` is the cumulative end offset
    /// of chunk `i`, so the chunk covering `offset` is the first one
    /// whose end offset is strictly greater than `offset`.
    fn chunk_for_offset(&self, offset: u64) -> Option<(usize, u64)> {
        let refs = self.refs();
        let idx = refs.partition_point(|(end, _)| *end <= offset);
        if idx >= refs.len() {
            return None;
        }
        let start = if idx == 0 { 0 } else { refs[idx - 1].0 };
        Some((idx, start))
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning
    /// the number of bytes actually read (short only at EOF, per
    /// `pread` semantics).
    ///
    /// # Errors
    /// Returns [`Error::BlobIo`]/[`Error::NotFound`] if a backing
    /// chunk cannot be fetched.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.meta.size || buf.is_empty() {
            return Ok(0);
        }

        let mut written = 0usize;
        let mut cursor = offset;
        let end = offset.saturating_add(buf.len() as u64).min(self.meta.size);

        while cursor < end {
            let Some((idx, chunk_start)) = self.chunk_for_offset(cursor) else { break };
            let (chunk_end, hash) = &self.refs()[idx];
            let chunk = self.cache.get_or_fetch(self.blob.as_ref(), hash)?;

            #[allow(clippy::cast_possible_truncation)]
            let within_chunk = (cursor - chunk_start) as usize;
            let chunk_len = (*chunk_end - chunk_start) as usize;
            let available = chunk_len.saturating_sub(within_chunk);
            #[allow(clippy::cast_possible_truncation)]
            let remaining_wanted = (end - cursor) as usize;
            let take = available.min(remaining_wanted);

            #[allow(clippy::indexing_slicing)]
            buf[written..written + take].copy_from_slice(&chunk[within_chunk..within_chunk + take]);

            written += take;
            cursor += take as u64;
        }

        Ok(written)
    }
}

impl std::io::Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .read_at(buf, self.pos)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.pos += n as u64;
        Ok(n)
    }
}
