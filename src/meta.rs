// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The file/directory descriptor record ("meta") and its canonical
//! serialization.
//!
//! A meta's identity is the blake2b-256 hash of its canonical JSON
//! bytes, so two implementations must agree byte-for-byte on field
//! order and formatting or their meta hashes will diverge. This
//! module hand-writes the JSON instead of going through a generic
//! serializer so that ordering is a property of the code, not of a
//! library's incidental map iteration order.

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Hash};

/// The two record shapes a [`Meta`] can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    /// A regular file: `refs` is an offset-indexed chunk list.
    File,
    /// A directory: `refs` is a sorted list of child meta hashes.
    Dir,
}

impl MetaKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
        }
    }
}

/// The `refs` field, shaped differently for files and directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refs {
    /// `(cumulative offset after this chunk, chunk hash)`, strictly
    /// increasing offsets, last one equal to the meta's `size`.
    File(Vec<(u64, Hash)>),
    /// Child meta hashes, sorted ascending, no duplicates.
    Dir(Vec<Hash>),
}

/// A file or directory descriptor. Identity (`hash`) is a pure
/// function of the canonical serialization and is never itself part
/// of the serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Basename of the file or directory.
    pub name: String,
    /// Total byte size: full content length for a file, sum of
    /// children's sizes for a directory.
    pub size: u64,
    /// Filesystem mode bits.
    pub mode: u32,
    /// RFC3339-formatted modification time.
    pub mtime: String,
    /// File or directory references.
    pub refs: Refs,
}

impl Meta {
    /// Returns `"file"` or `"dir"`.
    #[must_use]
    pub fn kind(&self) -> MetaKind {
        match self.refs {
            Refs::File(_) => MetaKind::File,
            Refs::Dir(_) => MetaKind::Dir,
        }
    }

    /// Checks the per-kind structural invariants from spec §3.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] if offsets are not strictly
    /// increasing, the final offset does not equal `size`, or a
    /// directory's refs are not sorted with no duplicates.
    pub fn validate(&self) -> Result<()> {
        match &self.refs {
            Refs::File(refs) => {
                let mut prev = 0u64;
                for (i, (offset, _)) in refs.iter().enumerate() {
                    if i > 0 && *offset <= prev {
                        return Err(Error::Decode(format!(
                            "file meta {:?}: offsets not strictly increasing at index {i}",
                            self.name
                        )));
                    }
                    prev = *offset;
                }
                if let Some((last, _)) = refs.last() {
                    if *last != self.size {
                        return Err(Error::Decode(format!(
                            "file meta {:?}: last offset {last} != size {}",
                            self.name, self.size
                        )));
                    }
                } else if self.size != 0 {
                    return Err(Error::Decode(format!(
                        "file meta {:?}: no refs but size {}",
                        self.name, self.size
                    )));
                }
            }
            Refs::Dir(refs) => {
                for window in refs.windows(2) {
                    if let [a, b] = window {
                        if a >= b {
                            return Err(Error::Decode(format!(
                                "dir meta {:?}: refs not strictly sorted ({a} >= {b})",
                                self.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Serializes this meta to canonical JSON: fields in the fixed
    /// order `name, type, size, mode, mtime, refs`.
    #[must_use]
    pub fn to_canonical_json(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.push(b'{');
        write_str_field(&mut out, "name", &self.name, true);
        write_str_field(&mut out, "type", self.kind().as_str(), false);
        write_raw_field(&mut out, "size", &self.size.to_string(), false);
        write_raw_field(&mut out, "mode", &self.mode.to_string(), false);
        write_str_field(&mut out, "mtime", &self.mtime, false);
        write_refs_field(&mut out, &self.refs);
        out.push(b'}');
        out
    }

    /// The meta's identity: blake2b-256 hex of its canonical JSON.
    #[must_use]
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_canonical_json())
    }

    /// Decodes a meta previously produced by [`Self::to_canonical_json`].
    ///
    /// # Errors
    /// Returns [`Error::Decode`] on malformed or structurally invalid
    /// JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Decode("meta is not a JSON object".into()))?;

        let name = field_str(obj, "name")?;
        let type_ = field_str(obj, "type")?;
        let size = field_u64(obj, "size")?;
        let mode = field_u64(obj, "mode")? as u32;
        let mtime = field_str(obj, "mtime")?;

        let refs_value = obj
            .get("refs")
            .ok_or_else(|| Error::Decode("missing field refs".into()))?;
        let refs_array = refs_value
            .as_array()
            .ok_or_else(|| Error::Decode("refs is not an array".into()))?;

        let refs = match type_.as_str() {
            "file" => {
                let mut out = Vec::with_capacity(refs_array.len());
                for entry in refs_array {
                    let pair = entry
                        .as_array()
                        .ok_or_else(|| Error::Decode("file ref is not [offset, hash]".into()))?;
                    let offset = pair
                        .first()
                        .and_then(serde_json::Value::as_u64)
                        .ok_or_else(|| Error::Decode("file ref offset is not a u64".into()))?;
                    let hash = pair
                        .get(1)
                        .and_then(serde_json::Value::as_str)
                        .ok_or_else(|| Error::Decode("file ref hash is not a string".into()))?
                        .to_string();
                    out.push((offset, hash));
                }
                Refs::File(out)
            }
            "dir" => {
                let mut out = Vec::with_capacity(refs_array.len());
                for entry in refs_array {
                    let hash = entry
                        .as_str()
                        .ok_or_else(|| Error::Decode("dir ref is not a string".into()))?
                        .to_string();
                    out.push(hash);
                }
                Refs::Dir(out)
            }
            other => return Err(Error::Decode(format!("unknown meta type {other:?}"))),
        };

        let meta = Self { name, size, mode, mtime, refs };
        meta.validate()?;
        Ok(meta)
    }
}

fn field_str(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Decode(format!("missing or non-string field {key:?}")))
}

fn field_u64(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Result<u64> {
    obj.get(key)
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| Error::Decode(format!("missing or non-numeric field {key:?}")))
}

fn write_str_field(out: &mut Vec<u8>, key: &str, value: &str, first: bool) {
    if !first {
        out.push(b',');
    }
    write_json_string(out, key);
    out.push(b':');
    write_json_string(out, value);
}

fn write_raw_field(out: &mut Vec<u8>, key: &str, raw: &str, first: bool) {
    if !first {
        out.push(b',');
    }
    write_json_string(out, key);
    out.push(b':');
    out.extend_from_slice(raw.as_bytes());
}

fn write_refs_field(out: &mut Vec<u8>, refs: &Refs) {
    out.push(b',');
    write_json_string(out, "refs");
    out.push(b':');
    out.push(b'[');
    match refs {
        Refs::File(entries) => {
            for (i, (offset, hash)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.push(b'[');
                out.extend_from_slice(offset.to_string().as_bytes());
                out.push(b',');
                write_json_string(out, hash);
                out.push(b']');
            }
        }
        Refs::Dir(hashes) => {
            for (i, hash) in hashes.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(out, hash);
            }
        }
    }
    out.push(b']');
}

/// Writes a minimally-escaped JSON string literal. Names, hashes and
/// timestamps never need more than the mandatory escapes, but
/// filenames are arbitrary bytes from the filesystem, so every
/// control character and the two JSON metacharacters are covered.
fn write_json_string(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_meta(name: &str, size: u64, refs: Vec<(u64, &str)>) -> Meta {
        Meta {
            name: name.to_string(),
            size,
            mode: 0o644,
            mtime: "2024-01-01T00:00:00Z".to_string(),
            refs: Refs::File(refs.into_iter().map(|(o, h)| (o, h.to_string())).collect()),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let meta = file_meta("a.txt", 5, vec![(5, "aa".repeat(32).as_str())]);
        let bytes = meta.to_canonical_json();
        let decoded = Meta::from_json(&bytes).unwrap();
        assert_eq!(meta, decoded);
    }

    #[test]
    fn field_order_is_fixed() {
        let meta = file_meta("a.txt", 0, vec![]);
        let json = String::from_utf8(meta.to_canonical_json()).unwrap();
        let name_pos = json.find("\"name\"").unwrap();
        let type_pos = json.find("\"type\"").unwrap();
        let size_pos = json.find("\"size\"").unwrap();
        let mode_pos = json.find("\"mode\"").unwrap();
        let mtime_pos = json.find("\"mtime\"").unwrap();
        let refs_pos = json.find("\"refs\"").unwrap();
        assert!(name_pos < type_pos);
        assert!(type_pos < size_pos);
        assert!(size_pos < mode_pos);
        assert!(mode_pos < mtime_pos);
        assert!(mtime_pos < refs_pos);
    }

    #[test]
    fn identical_content_yields_identical_hash() {
        let a = file_meta("same.txt", 3, vec![(3, "bb".repeat(32).as_str())]);
        let b = file_meta("same.txt", 3, vec![(3, "bb".repeat(32).as_str())]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn rejects_non_increasing_offsets() {
        let meta = file_meta("bad.txt", 10, vec![(5, "aa"), (5, "bb")]);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn rejects_unsorted_dir_refs() {
        let meta = Meta {
            name: "d".into(),
            size: 0,
            mode: 0o755,
            mtime: "2024-01-01T00:00:00Z".into(),
            refs: Refs::Dir(vec!["bb".repeat(32), "aa".repeat(32)]),
        };
        assert!(meta.validate().is_err());
    }

    #[test]
    fn escapes_control_characters_in_name() {
        let meta = file_meta("weird\"name\n.txt", 0, vec![]);
        let json = meta.to_canonical_json();
        let decoded = Meta::from_json(&json).unwrap();
        assert_eq!(decoded.name, "weird\"name\n.txt");
    }
}
