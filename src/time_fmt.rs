// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! RFC3339 timestamp formatting, shared by meta `mtime` fields and the
//! FUSE snapshot directory names (spec §4.G: "named by
//! `time.Format(RFC3339)`").

use std::time::SystemTime;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Formats a [`SystemTime`] as RFC3339 (e.g. `2024-01-01T00:00:00Z`).
#[must_use]
pub fn to_rfc3339(t: SystemTime) -> String {
    OffsetDateTime::from(t)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Formats a unix-seconds timestamp as RFC3339.
#[must_use]
pub fn unix_secs_to_rfc3339(secs: i64) -> String {
    OffsetDateTime::from_unix_timestamp(secs)
        .map(|odt| odt.format(&Rfc3339).unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()))
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
