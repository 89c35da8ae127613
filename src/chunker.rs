// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Content-defined chunking via a rolling polynomial fingerprint.
//!
//! Boundaries fall out of the data itself, so inserting or deleting
//! bytes anywhere in a stream only perturbs the chunks adjacent to the
//! edit instead of re-chunking everything downstream of it.

/// Prime multiplier of the rolling polynomial fingerprint.
pub const PRIME: u64 = 31;

/// Sliding window length, in bytes (same window size as LBFS).
pub const WINDOW_SIZE: usize = 64;

/// Minimum chunk size; the chunker will not split below this unless
/// the stream itself ends.
pub const MIN_SIZE: u64 = 256 * 1024;

/// Target average chunk size.
pub const AVG_SIZE: u64 = 1024 * 1024;

/// Maximum chunk size; the chunker always splits at or before this.
pub const MAX_SIZE: u64 = 4 * 1024 * 1024;

/// A rolling-fingerprint chunker that signals content-defined split
/// points over a byte stream.
///
/// The window and fingerprint persist across [`Chunker::reset`] calls
/// by design (see module docs on `Reset`): only the block-length
/// counter returns to zero. This is load-bearing for hash stability —
/// changing it changes every split position downstream.
pub struct Chunker {
    /// `PRIME^(WINDOW_SIZE - 1)` per possible byte value, precomputed
    /// once so each step is a single multiply-free table lookup.
    cache: [u64; 256],
    window: [u8; WINDOW_SIZE],
    pos: usize,
    prev_pos: usize,
    fingerprint: u64,
    block_size: u64,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker {
    /// Creates a chunker with the compiled-in `MIN`/`AVG`/`MAX` parameters.
    #[must_use]
    pub fn new() -> Self {
        let mut result: u64 = 1;
        for _ in 1..WINDOW_SIZE {
            result = result.wrapping_mul(PRIME);
        }

        let mut cache = [0u64; 256];
        for (b, slot) in cache.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let b = b as u64;
            *slot = b.wrapping_mul(result);
        }

        Self {
            cache,
            window: [0u8; WINDOW_SIZE],
            pos: 0,
            prev_pos: WINDOW_SIZE - 1,
            fingerprint: 0,
            block_size: 0,
        }
    }

    /// Feeds one byte through the rolling fingerprint and advances the
    /// window. Does not by itself signal a split; call [`Self::on_split`]
    /// after each byte (or each buffered bulk write) to check.
    pub fn write_byte(&mut self, b: u8) {
        // +1 prevents long runs of identical bytes (e.g. zeros) from
        // collapsing the fingerprint to a fixed point.
        let ch = u64::from(b) + 1;
        self.fingerprint = self.fingerprint.wrapping_mul(PRIME).wrapping_add(ch);

        #[allow(clippy::indexing_slicing)]
        let outgoing = self.window[self.prev_pos];
        #[allow(clippy::indexing_slicing)]
        {
            self.fingerprint = self.fingerprint.wrapping_sub(self.cache[outgoing as usize]);
            self.window[self.pos] = b;
        }

        self.prev_pos = self.pos;
        self.pos = (self.pos + 1) % WINDOW_SIZE;
        self.block_size += 1;
    }

    /// Feeds a buffer through the rolling fingerprint. Splits are still
    /// decided byte-by-byte internally (§4.A/§9): bulk delivery only
    /// changes how the caller batches I/O, never the split positions.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Returns true if the current block is eligible to end here.
    #[must_use]
    pub fn on_split(&self) -> bool {
        self.block_size > MIN_SIZE && (self.fingerprint % AVG_SIZE == 1 || self.block_size >= MAX_SIZE)
    }

    /// Bytes consumed since the last [`Self::reset`].
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Starts a new block. The window contents and fingerprint are
    /// intentionally left untouched — only `block_size` returns to
    /// zero (spec-mandated; affects chunk boundaries and must be
    /// preserved for hash-stable dedup across versions).
    pub fn reset(&mut self) {
        self.block_size = 0;
    }
}

/// Splits `data` into chunk byte ranges using a fresh [`Chunker`].
/// Convenience wrapper for tests and callers that already hold the
/// whole stream in memory; the streaming file writer (`writer.rs`)
/// does not use this — it interleaves splitting with hashing and
/// upload per spec.md §4.C.
#[must_use]
pub fn chunk_offsets(data: &[u8]) -> Vec<std::ops::Range<usize>> {
    let mut chunker = Chunker::new();
    let mut ranges = Vec::new();
    let mut start = 0usize;

    for (i, &b) in data.iter().enumerate() {
        chunker.write_byte(b);
        if chunker.on_split() {
            ranges.push(start..i + 1);
            start = i + 1;
            chunker.reset();
        }
    }

    if start < data.len() {
        ranges.push(start..data.len());
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_bytes(n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        rand::rngs::ThreadRng::default().fill_bytes(&mut buf);
        buf
    }

    #[test]
    fn splits_are_deterministic_regardless_of_delivery_chunking() {
        let data = random_bytes(3 * 1024 * 1024);

        let byte_by_byte = chunk_offsets(&data);

        let mut chunker = Chunker::new();
        let mut ranges = Vec::new();
        let mut start = 0usize;
        let mut i = 0usize;
        for buf in data.chunks(4096) {
            chunker.write(buf);
            for _ in buf {
                i += 1;
                if chunker.on_split() {
                    ranges.push(start..i);
                    start = i;
                    chunker.reset();
                }
            }
        }
        if start < data.len() {
            ranges.push(start..data.len());
        }

        assert_eq!(byte_by_byte, ranges);
    }

    #[test]
    fn every_non_final_chunk_respects_min_and_max() {
        let data = random_bytes(10 * 1024 * 1024);
        let ranges = chunk_offsets(&data);

        assert!(ranges.len() >= 2);

        for (i, r) in ranges.iter().enumerate() {
            let len = (r.end - r.start) as u64;
            assert!(len > 0);
            assert!(len <= MAX_SIZE);
            if i + 1 < ranges.len() {
                assert!(len > MIN_SIZE);
            }
        }
    }

    #[test]
    fn short_stream_yields_single_chunk() {
        let data = random_bytes(10 * 1024);
        let ranges = chunk_offsets(&data);
        assert_eq!(ranges, vec![0..data.len()]);
    }

    #[test]
    fn reset_preserves_window_and_fingerprint() {
        let mut a = Chunker::new();
        let mut b = Chunker::new();

        let data = random_bytes(128);
        a.write(&data);
        b.write(&data);

        a.reset();
        // b never resets; block_size differs but internal state that
        // feeds the fingerprint must still agree after equal byte feed.
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.window, b.window);
        assert_eq!(a.block_size(), 0);
    }
}
