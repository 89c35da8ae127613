// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Shared atomic-file-rewrite helper used by both storage backends.
//! Grounded on the teacher's `file::rewrite_atomic`: write to a
//! sibling temp file, `fsync`, then rename over the target so readers
//! never observe a partially-written file.

use std::io::Write;
use std::path::Path;

pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    Ok(())
}
