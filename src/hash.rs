// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The blake2b-256 content hash used to address every blob and meta.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Blake2b with a 32-byte (256-bit) digest, the hash used for all
/// blob, chunk and meta identities in this crate.
pub type Blake2b256 = Blake2b<U32>;

/// A lowercase hex-encoded blake2b-256 digest.
pub type Hash = String;

/// Incremental hasher; feed bytes, then [`HashWriter::finalize_hex`].
#[derive(Default, Clone)]
pub struct HashWriter(Blake2b256);

impl HashWriter {
    /// Creates a fresh, empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self(Blake2b256::new())
    }

    /// Feeds bytes into the running hash.
    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    /// Consumes the hasher and returns the lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> Hash {
        hex::encode(self.0.finalize())
    }

    /// Resets the hasher to its initial state, reusing the allocation.
    pub fn reset(&mut self) {
        self.0 = Blake2b256::new();
    }
}

impl std::io::Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Hashes a single byte slice and returns its lowercase hex digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
