// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::{required_u64, vfs_err};
use crate::{BuiltinTool, Permission, ToolCtx, ToolError};

/// Structural diff between two stored file versions.
pub struct VfsDiffTool;

#[async_trait]
impl BuiltinTool for VfsDiffTool {
    fn id(&self) -> &str {
        "vfs.diff"
    }
    fn description(&self) -> &str {
        "Line-level structural diff between two version ids."
    }
    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "a": { "type": "integer", "minimum": 1 },
                "b": { "type": "integer", "minimum": 1 }
            },
            "required": ["a", "b"],
            "additionalProperties": false
        }))
    }
    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::VfsRead]
    }
    async fn execute(&self, args: &Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let a = required_u64(args, "a")?;
        let b = required_u64(args, "b")?;
        let diff = ctx.vfs.diff(a, b).map_err(vfs_err)?;
        Ok(json!({ "a": a, "b": b, "diff": diff }))
    }
}

/// Capture a point-in-time copy of the current path → content map.
pub struct VfsSnapshotTool;

#[async_trait]
impl BuiltinTool for VfsSnapshotTool {
    fn id(&self) -> &str {
        "vfs.snapshot"
    }
    fn description(&self) -> &str {
        "Capture an immutable snapshot of the current workspace contents."
    }
    fn schema(&self) -> Option<Value> {
        Some(json!({ "type": "object", "additionalProperties": false }))
    }
    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::VfsRead]
    }
    async fn execute(&self, _args: &Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let id = ctx.vfs.snapshot(Some(&ctx.caller.id)).map_err(vfs_err)?;
        Ok(json!({ "snapshot": id }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
