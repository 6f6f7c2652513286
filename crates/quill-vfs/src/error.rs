// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("file too large: {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl VfsError {
    /// Stable code string for API responses and event payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathTraversal(_) => "path_traversal",
            _ => "vfs_error",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
