// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The snapshot recorder (spec §4.F): one timestamped pointer at a
//! root meta per `(hostname, path)` pair ("snap set"), kept as a
//! version history under a single KV key.

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Hash};
use crate::kv::VersionedKv;
use crate::stats::UploadStats;

/// KV key prefix every snapshot set lives under.
const SNAPSET_PREFIX: &str = "blobsnap:snapset:";

/// One timestamped pointer at a root meta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// The backed-up path, as given to `put`.
    pub path: String,
    /// The host the upload ran on.
    pub hostname: String,
    /// Hash of the root meta this snapshot points at.
    pub meta_ref: Hash,
    /// Unix seconds the snapshot was recorded.
    pub time: i64,
    /// `blake2b-256(path || hostname)` hex — identifies the snap set.
    pub snap_set_key: Hash,
    /// Upload statistics from the `put` that produced this snapshot.
    pub stats: UploadStats,
}

/// Computes the snap-set identity for a `(path, hostname)` pair.
#[must_use]
pub fn snap_set_key(path: &str, hostname: &str) -> Hash {
    let mut buf = Vec::with_capacity(path.len() + hostname.len());
    buf.extend_from_slice(path.as_bytes());
    buf.extend_from_slice(hostname.as_bytes());
    hash_bytes(&buf)
}

fn kv_key(snap_set_key: &str) -> String {
    format!("{SNAPSET_PREFIX}{snap_set_key}")
}

impl SnapshotRecord {
    /// Builds the record for a completed upload. Does not persist it;
    /// call [`record_if_changed`] to do that conditionally.
    #[must_use]
    pub fn new(path: &str, hostname: &str, meta_ref: Hash, time: i64, stats: UploadStats) -> Self {
        Self { path: path.to_string(), hostname: hostname.to_string(), meta_ref, time, snap_set_key: snap_set_key(path, hostname), stats }
    }

    fn to_canonical_json(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(160);
        out.push(b'{');
        write_str(&mut out, "path", &self.path, true);
        write_str(&mut out, "hostname", &self.hostname, false);
        write_str(&mut out, "ref", &self.meta_ref, false);
        write_num(&mut out, "time", self.time);
        write_str(&mut out, "key", &self.snap_set_key, false);
        write_stats(&mut out, &self.stats);
        out.push(b'}');
        out
    }

    /// Decodes a record previously written by [`Self::to_canonical_json`].
    ///
    /// # Errors
    /// Returns [`Error::Decode`] on malformed JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        let obj = value.as_object().ok_or_else(|| Error::Decode("snapshot is not a JSON object".into()))?;

        let str_field = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Decode(format!("missing or non-string field {key:?}")))
        };
        let num_field = |key: &str| -> Result<i64> {
            obj.get(key)
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| Error::Decode(format!("missing or non-numeric field {key:?}")))
        };

        let stats_obj = obj
            .get("wr")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| Error::Decode("missing or non-object field \"wr\"".into()))?;
        let stat_num = |key: &str| -> Result<u64> {
            stats_obj
                .get(key)
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| Error::Decode(format!("missing or non-numeric stats field {key:?}")))
        };

        Ok(Self {
            path: str_field("path")?,
            hostname: str_field("hostname")?,
            meta_ref: str_field("ref")?,
            time: num_field("time")?,
            snap_set_key: str_field("key")?,
            stats: UploadStats {
                blobs_count: stat_num("blobsCount")?,
                blobs_uploaded: stat_num("blobsUploaded")?,
                blobs_skipped: stat_num("blobsSkipped")?,
                size_uploaded: stat_num("sizeUploaded")?,
                size_skipped: stat_num("sizeSkipped")?,
                size: stat_num("size")?,
                files_count: stat_num("filesCount")?,
                files_uploaded: stat_num("filesUploaded")?,
                files_skipped: stat_num("filesSkipped")?,
                dirs_count: stat_num("dirsCount")?,
                dirs_uploaded: stat_num("dirsUploaded")?,
                dirs_skipped: stat_num("dirsSkipped")?,
            },
        })
    }
}

fn write_str(out: &mut Vec<u8>, key: &str, value: &str, first: bool) {
    if !first {
        out.push(b',');
    }
    write_json_string(out, key);
    out.push(b':');
    write_json_string(out, value);
}

fn write_num(out: &mut Vec<u8>, key: &str, value: i64) {
    out.push(b',');
    write_json_string(out, key);
    out.push(b':');
    out.extend_from_slice(value.to_string().as_bytes());
}

fn write_stats(out: &mut Vec<u8>, stats: &UploadStats) {
    out.push(b',');
    write_json_string(out, "wr");
    out.push(b':');
    out.push(b'{');
    let fields: [(&str, u64); 12] = [
        ("blobsCount", stats.blobs_count),
        ("blobsUploaded", stats.blobs_uploaded),
        ("blobsSkipped", stats.blobs_skipped),
        ("sizeUploaded", stats.size_uploaded),
        ("sizeSkipped", stats.size_skipped),
        ("size", stats.size),
        ("filesCount", stats.files_count),
        ("filesUploaded", stats.files_uploaded),
        ("filesSkipped", stats.files_skipped),
        ("dirsCount", stats.dirs_count),
        ("dirsUploaded", stats.dirs_uploaded),
        ("dirsSkipped", stats.dirs_skipped),
    ];
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        write_json_string(out, name);
        out.push(b':');
        out.extend_from_slice(value.to_string().as_bytes());
    }
    out.push(b'}');
}

fn write_json_string(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes()),
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// Records a snapshot for a completed upload, unless the upload
/// touched zero new bytes (spec §4.F.1: a byte-identical re-upload
/// leaves the prior snapshot as the latest).
///
/// # Errors
/// Returns [`Error::KvIo`] if the KV store rejects the write.
pub fn record_if_changed(
    kv: &dyn VersionedKv,
    path: &str,
    hostname: &str,
    meta_ref: Hash,
    now_unix_secs: i64,
    now_unix_nanos: i64,
    stats: UploadStats,
) -> Result<Option<SnapshotRecord>> {
    if stats.size_uploaded == 0 {
        return Ok(None);
    }

    let record = SnapshotRecord::new(path, hostname, meta_ref, now_unix_secs, stats);
    let json = record.to_canonical_json();
    kv.put(&kv_key(&record.snap_set_key), &json, now_unix_nanos)?;
    Ok(Some(record))
}

/// Lists the most recent version of every snapshot set known to `kv`
/// (spec §4.F: scan `["blobsnap:snapset:", "blobsnap:snapset:\xff")`).
///
/// # Errors
/// Returns [`Error::KvIo`] or [`Error::Decode`] on a storage or record
/// failure.
pub fn list_latest(kv: &dyn VersionedKv) -> Result<Vec<SnapshotRecord>> {
    let end = format!("{SNAPSET_PREFIX}\u{ff}");
    let entries = kv.entries(SNAPSET_PREFIX, &end, 0)?;

    // Tie-broken on the KV version (nanos), not `record.time` (whole
    // seconds): two snapshots of the same set can legitimately land in
    // the same wall-clock second, and `time` alone can't tell them
    // apart.
    let mut latest: std::collections::HashMap<String, (i64, SnapshotRecord)> = std::collections::HashMap::new();
    for entry in entries {
        let record = SnapshotRecord::from_json(&entry.data)?;
        latest
            .entry(entry.key.clone())
            .and_modify(|(existing_version, existing)| {
                if entry.version > *existing_version {
                    *existing_version = entry.version;
                    *existing = record.clone();
                }
            })
            .or_insert((entry.version, record));
    }

    let mut out: Vec<_> = latest.into_values().map(|(_, record)| record).collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

/// Lists every historical version for one snap set, ascending by time.
///
/// # Errors
/// Returns [`Error::KvIo`] or [`Error::Decode`] on a storage or record
/// failure.
pub fn list_versions(kv: &dyn VersionedKv, snap_set_key: &str, now_unix_nanos: i64) -> Result<Vec<SnapshotRecord>> {
    Ok(list_versions_raw(kv, snap_set_key, now_unix_nanos)?.into_iter().map(|(_, record)| record).collect())
}

/// Like [`list_versions`] but keeps each record's KV version (nanos),
/// needed by the FUSE layer to name/address a specific historical
/// snapshot directory unambiguously even when two snapshots of the
/// same set land in the same RFC3339 second.
///
/// # Errors
/// Returns [`Error::KvIo`] or [`Error::Decode`] on a storage or record
/// failure.
pub fn list_versions_raw(
    kv: &dyn VersionedKv,
    snap_set_key: &str,
    now_unix_nanos: i64,
) -> Result<Vec<(i64, SnapshotRecord)>> {
    let versions = kv.versions(&kv_key(snap_set_key), 0, now_unix_nanos.saturating_add(1), 0)?;
    versions
        .versions
        .into_iter()
        .map(|(version, data)| SnapshotRecord::from_json(&data).map(|record| (version, record)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::EmbeddedKv;

    #[test]
    fn zero_bytes_uploaded_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();
        let stats = UploadStats { size_uploaded: 0, ..Default::default() };

        let result = record_if_changed(&kv, "/data", "host1", "a".repeat(64), 1000, 1_000_000_000, stats).unwrap();
        assert!(result.is_none());
        assert!(kv.dump().unwrap().is_empty());
    }

    #[test]
    fn nonzero_upload_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();
        let stats = UploadStats { size_uploaded: 42, blobs_uploaded: 1, ..Default::default() };

        let record = record_if_changed(&kv, "/data", "host1", "b".repeat(64), 1000, 1_000_000_000, stats)
            .unwrap()
            .unwrap();

        let latest = list_latest(&kv).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0], record);
    }

    #[test]
    fn successive_snapshots_of_same_set_are_strictly_increasing_versions() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();
        let stats = UploadStats { size_uploaded: 1, ..Default::default() };

        record_if_changed(&kv, "/data", "host1", "c".repeat(64), 1000, 1_000_000_000, stats).unwrap();
        record_if_changed(&kv, "/data", "host1", "d".repeat(64), 2000, 2_000_000_000, stats).unwrap();

        let key = snap_set_key("/data", "host1");
        let versions = list_versions(&kv, &key, 3_000_000_000).unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].time < versions[1].time);
        assert_eq!(versions[1].meta_ref, "d".repeat(64));
    }

    #[test]
    fn list_latest_returns_only_the_newest_version_per_set() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();
        let stats = UploadStats { size_uploaded: 1, ..Default::default() };

        record_if_changed(&kv, "/data", "host1", "e".repeat(64), 1000, 1_000_000_000, stats).unwrap();
        record_if_changed(&kv, "/data", "host1", "f".repeat(64), 2000, 2_000_000_000, stats).unwrap();

        let latest = list_latest(&kv).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].meta_ref, "f".repeat(64));
    }

    #[test]
    fn list_latest_breaks_same_second_ties_on_kv_version_not_time() {
        let dir = tempfile::tempdir().unwrap();
        let kv = EmbeddedKv::open(dir.path()).unwrap();
        let stats = UploadStats { size_uploaded: 1, ..Default::default() };

        // Both records report the same whole-second `time`; only the
        // KV version (nanos) orders them.
        record_if_changed(&kv, "/data", "host1", "a".repeat(64), 1000, 1_000_000_000, stats).unwrap();
        record_if_changed(&kv, "/data", "host1", "b".repeat(64), 1000, 1_000_000_500, stats).unwrap();

        let latest = list_latest(&kv).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].meta_ref, "b".repeat(64));
    }
}
