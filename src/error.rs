// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::path::PathBuf;

/// Errors that can occur anywhere in the snapshot engine.
#[derive(Debug)]
pub enum Error {
    /// Failed to read the source file or directory being uploaded.
    ///
    /// Fatal for the affected subtree; siblings continue.
    SourceIo { path: PathBuf, source: std::io::Error },

    /// The blob store failed a `stat`/`get`/`put`.
    ///
    /// Fatal for the affected file; propagates to the root of the walk.
    BlobIo(std::io::Error),

    /// The versioned KV store failed a `put`/`entries`/`versions`.
    ///
    /// Fatal for the whole `put` operation; no snapshot is recorded.
    KvIo(std::io::Error),

    /// A meta or snapshot record could not be decoded.
    Decode(String),

    /// A blob or meta was requested but does not exist in the store.
    NotFound(String),

    /// Catch-all I/O error for the ambient stack (CLI, config files).
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceIo { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            Self::BlobIo(e) => write!(f, "blob store error: {e}"),
            Self::KvIo(e) => write!(f, "kv store error: {e}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SourceIo { source, .. } | Self::Io(source) => Some(source),
            Self::BlobIo(e) | Self::KvIo(e) => Some(e),
            Self::Decode(_) | Self::NotFound(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

/// A specialized `Result` for the snapshot engine.
pub type Result<T> = std::result::Result<T, Error>;
