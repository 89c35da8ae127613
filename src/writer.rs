// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The file writer (spec §4.C): chunks a byte stream, deduplicates
//! and stores chunks, and produces a file [`Meta`].

use crate::blob::BlobStore;
use crate::chunker::Chunker;
use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Hash, HashWriter};
use crate::meta::{Meta, Refs};
use crate::stats::UploadStats;
use std::io::Read;

/// Reads from the source stream in bulk (spec §9 explicitly sanctions
/// this: the chunker still sees every byte, only the syscall pattern
/// changes).
const READ_BUF_SIZE: usize = 64 * 1024;

/// The outcome of writing one file's byte stream.
pub struct FileWriteResult {
    /// The file's meta, already persisted to the blob store.
    pub meta: Meta,
    /// Upload counters for this file alone.
    pub stats: UploadStats,
    /// The blake2b-256 hex of the whole, unchunked byte stream.
    ///
    /// Kept alongside `stats` rather than inside it: §3 fixes
    /// [`UploadStats`]'s additive field set exactly, and a per-file
    /// full-stream hash doesn't fold meaningfully across a directory
    /// (see DESIGN.md).
    pub hash: Hash,
}

/// Chunks `reader`'s bytes, deduplicates each chunk against `blob`,
/// and persists a `"file"`-type [`Meta`] named `name` with the given
/// `mode`/`mtime`.
///
/// # Errors
/// Returns [`Error::SourceIo`] if reading the stream fails, or
/// [`Error::BlobIo`] if a chunk or the meta cannot be stat'd/put.
pub fn write_file<R: Read>(
    mut reader: R,
    name: &str,
    mode: u32,
    mtime: &str,
    blob: &dyn BlobStore,
) -> Result<FileWriteResult> {
    let mut file_hash = HashWriter::new();
    let mut chunk_buf: Vec<u8> = Vec::new();
    let mut chunker = Chunker::new();
    let mut refs: Vec<(u64, Hash)> = Vec::new();
    let mut offset: u64 = 0;
    let mut stats = UploadStats::default();
    let mut read_buf = [0u8; READ_BUF_SIZE];

    loop {
        let n = reader
            .read(&mut read_buf)
            .map_err(|source| Error::SourceIo { path: name.into(), source })?;
        if n == 0 {
            break;
        }

        #[allow(clippy::indexing_slicing)]
        let filled = &read_buf[..n];
        file_hash.update(filled);

        let mut start = 0usize;
        for (i, &b) in filled.iter().enumerate() {
            chunker.write_byte(b);
            if chunker.on_split() {
                #[allow(clippy::indexing_slicing)]
                chunk_buf.extend_from_slice(&filled[start..=i]);
                finalize_chunk(&mut chunk_buf, blob, &mut offset, &mut refs, &mut stats)?;
                chunker.reset();
                start = i + 1;
            }
        }
        #[allow(clippy::indexing_slicing)]
        if start < n {
            chunk_buf.extend_from_slice(&filled[start..n]);
        }
    }

    if !chunk_buf.is_empty() {
        finalize_chunk(&mut chunk_buf, blob, &mut offset, &mut refs, &mut stats)?;
    }

    stats.files_count = 1;
    if stats.blobs_uploaded > 0 {
        stats.files_uploaded = 1;
    } else {
        stats.files_skipped = 1;
    }

    let meta = Meta {
        name: name.to_string(),
        size: offset,
        mode,
        mtime: mtime.to_string(),
        refs: Refs::File(refs),
    };
    meta.validate()?;

    persist_meta(&meta, blob, &mut stats)?;

    log::debug!(
        "wrote file {name:?}: {} chunks, {} uploaded, {} bytes",
        stats.blobs_count,
        stats.blobs_uploaded,
        stats.size
    );

    Ok(FileWriteResult { meta, stats, hash: file_hash.finalize_hex() })
}

fn finalize_chunk(
    buf: &mut Vec<u8>,
    blob: &dyn BlobStore,
    offset: &mut u64,
    refs: &mut Vec<(u64, Hash)>,
    stats: &mut UploadStats,
) -> Result<()> {
    let hash = hash_bytes(buf);

    if blob.stat(&hash)? {
        stats.blobs_skipped += 1;
        #[allow(clippy::cast_possible_truncation)]
        {
            stats.size_skipped += buf.len() as u64;
        }
    } else {
        blob.put(&hash, buf)?;
        stats.blobs_uploaded += 1;
        #[allow(clippy::cast_possible_truncation)]
        {
            stats.size_uploaded += buf.len() as u64;
        }
    }

    stats.blobs_count += 1;
    #[allow(clippy::cast_possible_truncation)]
    {
        stats.size += buf.len() as u64;
        *offset += buf.len() as u64;
    }
    refs.push((*offset, hash));
    buf.clear();

    Ok(())
}

/// Persists a meta (file or directory) the same way as a chunk blob:
/// stat first, put only if missing (meta-level dedup, spec §4.C step
/// "Serialize the meta ... stat/put it identically to a chunk blob").
pub(crate) fn persist_meta(meta: &Meta, blob: &dyn BlobStore, stats: &mut UploadStats) -> Result<Hash> {
    let hash = meta.hash();
    let json = meta.to_canonical_json();

    if blob.stat(&hash)? {
        #[allow(clippy::cast_possible_truncation)]
        {
            stats.size_skipped += json.len() as u64;
        }
    } else {
        blob.put(&hash, &json)?;
        stats.blobs_uploaded += 1;
        #[allow(clippy::cast_possible_truncation)]
        {
            stats.size_uploaded += json.len() as u64;
        }
    }

    stats.blobs_count += 1;
    #[allow(clippy::cast_possible_truncation)]
    {
        stats.size += json.len() as u64;
    }

    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;

    fn store() -> (tempfile::TempDir, LocalBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn tiny_file_is_one_chunk() {
        let (_dir, store) = store();
        let data = vec![0u8; 10 * 1024];
        let result = write_file(&data[..], "z.bin", 0o644, "2024-01-01T00:00:00Z", &store).unwrap();

        let Refs::File(refs) = &result.meta.refs else { panic!("expected file refs") };
        assert_eq!(refs.len(), 1);
        assert_eq!(result.meta.size, data.len() as u64);
    }

    #[test]
    fn large_random_file_splits_into_multiple_chunks_and_round_trips() {
        use rand::RngCore;
        let (_dir, store) = store();

        let mut data = vec![0u8; 5 * 1024 * 1024];
        rand::rngs::ThreadRng::default().fill_bytes(&mut data);

        let result = write_file(&data[..], "big.bin", 0o644, "2024-01-01T00:00:00Z", &store).unwrap();
        let Refs::File(refs) = &result.meta.refs else { panic!("expected file refs") };
        assert!(refs.len() >= 2);

        let mut reconstructed = Vec::with_capacity(data.len());
        for (_, hash) in refs {
            reconstructed.extend_from_slice(&store.get(hash).unwrap());
        }
        assert_eq!(reconstructed, data);
    }

    #[test]
    fn second_identical_write_uploads_nothing() {
        let (_dir, store) = store();
        let data = vec![7u8; 2 * 1024 * 1024];

        let first = write_file(&data[..], "f.bin", 0o644, "2024-01-01T00:00:00Z", &store).unwrap();
        assert!(first.stats.blobs_uploaded > 0);

        let second = write_file(&data[..], "f.bin", 0o644, "2024-01-01T00:00:00Z", &store).unwrap();
        assert_eq!(second.stats.blobs_uploaded, 0);
        assert_eq!(second.meta.hash(), first.meta.hash());
    }
}
