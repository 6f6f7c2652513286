// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An immutable record of file content at write-time, linked to its
/// predecessor through `previous`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVersion {
    /// Monotonic per-store id.
    pub id: u64,
    pub path: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<u64>,
    /// SHA-256 of the content, hex-encoded.
    pub hash: String,
}

impl FileVersion {
    pub fn new(
        id: u64,
        path: impl Into<String>,
        content: impl Into<String>,
        author: impl Into<String>,
        previous: Option<u64>,
    ) -> Self {
        let content = content.into();
        Self {
            id,
            path: path.into(),
            hash: content_hash(&content),
            content,
            timestamp: Utc::now(),
            author: author.into(),
            previous,
        }
    }
}

/// Hex SHA-256 of a content string.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// A point-in-time, read-only copy of the current path → content map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub files: BTreeMap<String, String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
