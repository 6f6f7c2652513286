// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// The closed set of permission tokens checked at tool invocation.
///
/// Tokens outside this set are dropped with a warning when caller records
/// are parsed — they never silently grant anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "vfs.read")]
    VfsRead,
    #[serde(rename = "vfs.write")]
    VfsWrite,
    #[serde(rename = "vfs.delete")]
    VfsDelete,
    #[serde(rename = "net.fetch")]
    NetFetch,
    #[serde(rename = "process.execute")]
    ProcessExecute,
    #[serde(rename = "python.execute")]
    PythonExecute,
    #[serde(rename = "js.execute")]
    JsExecute,
    #[serde(rename = "tool.run")]
    ToolRun,
    #[serde(rename = "model.call")]
    ModelCall,
}

impl Permission {
    /// The dotted token form used in config files and API payloads.
    pub fn token(&self) -> &'static str {
        match self {
            Self::VfsRead => "vfs.read",
            Self::VfsWrite => "vfs.write",
            Self::VfsDelete => "vfs.delete",
            Self::NetFetch => "net.fetch",
            Self::ProcessExecute => "process.execute",
            Self::PythonExecute => "python.execute",
            Self::JsExecute => "js.execute",
            Self::ToolRun => "tool.run",
            Self::ModelCall => "model.call",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "vfs.read" => Some(Self::VfsRead),
            "vfs.write" => Some(Self::VfsWrite),
            "vfs.delete" => Some(Self::VfsDelete),
            "net.fetch" => Some(Self::NetFetch),
            "process.execute" => Some(Self::ProcessExecute),
            "python.execute" => Some(Self::PythonExecute),
            "js.execute" => Some(Self::JsExecute),
            "tool.run" => Some(Self::ToolRun),
            "model.call" => Some(Self::ModelCall),
            _ => None,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Parse permission tokens, dropping anything outside the closed set.
pub fn parse_permissions<S: AsRef<str>>(tokens: &[S]) -> HashSet<Permission> {
    let mut out = HashSet::new();
    for t in tokens {
        match Permission::from_token(t.as_ref()) {
            Some(p) => {
                out.insert(p);
            }
            None => warn!(token = t.as_ref(), "dropping unknown permission token"),
        }
    }
    out
}

/// The authenticated entity on whose behalf tools are invoked.
///
/// Produced by the session boundary (which parses tokens and roles); the
/// engine only ever consumes this record.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub permissions: HashSet<Permission>,
}

impl Caller {
    pub fn new(id: impl Into<String>, permissions: HashSet<Permission>) -> Self {
        Self {
            id: id.into(),
            permissions,
        }
    }

    /// Caller from raw token strings; unknown tokens are dropped.
    pub fn from_tokens<S: AsRef<str>>(id: impl Into<String>, tokens: &[S]) -> Self {
        Self {
            id: id.into(),
            permissions: parse_permissions(tokens),
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Permissions in `required` the caller does not hold, sorted by token.
    pub fn missing(&self, required: &HashSet<Permission>) -> Vec<Permission> {
        let mut missing: Vec<Permission> = required
            .difference(&self.permissions)
            .copied()
            .collect();
        missing.sort_by_key(|p| p.token());
        missing
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
