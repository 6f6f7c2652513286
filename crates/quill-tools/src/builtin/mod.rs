// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod fs;
mod system;
mod text;
mod version;

use std::sync::Arc;

pub use fs::{FsDeleteTool, FsListTool, FsReadTool, FsWriteTool};
pub use system::{HashTool, ListModelsTool, ProcessInfoTool};
pub use text::{TextLowercaseTool, TextReverseTool, TextUppercaseTool};
pub use version::{VfsDiffTool, VfsSnapshotTool};

use crate::{BuiltinTool, ErrorCode, ToolError};

/// Every built-in tool that ships with the engine, in registration order.
pub fn all() -> Vec<Arc<dyn BuiltinTool>> {
    vec![
        Arc::new(FsReadTool),
        Arc::new(FsWriteTool),
        Arc::new(FsDeleteTool),
        Arc::new(FsListTool),
        Arc::new(VfsDiffTool),
        Arc::new(VfsSnapshotTool),
        Arc::new(HashTool),
        Arc::new(TextUppercaseTool),
        Arc::new(TextLowercaseTool),
        Arc::new(TextReverseTool),
        Arc::new(ProcessInfoTool),
        Arc::new(ListModelsTool),
    ]
}

/// Map a VFS failure onto the stable tool error codes.
pub(crate) fn vfs_err(e: quill_vfs::VfsError) -> ToolError {
    let code = match &e {
        quill_vfs::VfsError::PathTraversal(_) => ErrorCode::PathTraversal,
        _ => ErrorCode::VfsError,
    };
    ToolError::new(code, e.to_string())
}

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(
    args: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    args.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        ToolError::new(
            ErrorCode::ValidationFailed,
            format!("missing required string parameter '{key}'"),
        )
    })
}

/// Fetch a required unsigned-integer argument.
pub(crate) fn required_u64(args: &serde_json::Value, key: &str) -> Result<u64, ToolError> {
    args.get(key).and_then(|v| v.as_u64()).ok_or_else(|| {
        ToolError::new(
            ErrorCode::ValidationFailed,
            format!("missing required integer parameter '{key}'"),
        )
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ids_are_unique() {
        let tools = all();
        let mut ids: Vec<&str> = tools.iter().map(|t| t.id()).collect();
        ids.sort();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[test]
    fn required_str_reports_missing_key() {
        let err = required_str(&serde_json::json!({}), "path").unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert!(err.message.contains("path"));
    }

    #[test]
    fn vfs_err_maps_traversal_code() {
        let e = vfs_err(quill_vfs::VfsError::PathTraversal("p".into()));
        assert_eq!(e.code, ErrorCode::PathTraversal);
        let e = vfs_err(quill_vfs::VfsError::NotFound("v".into()));
        assert_eq!(e.code, ErrorCode::VfsError);
    }
}
