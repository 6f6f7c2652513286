// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::{required_str, vfs_err};
use crate::{BuiltinTool, Permission, ToolCtx, ToolError};

fn path_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": "Relative path inside the workspace" }
        },
        "required": ["path"],
        "additionalProperties": false
    })
}

/// Read the current content at a path.
pub struct FsReadTool;

#[async_trait]
impl BuiltinTool for FsReadTool {
    fn id(&self) -> &str {
        "fs.read"
    }
    fn description(&self) -> &str {
        "Read the current content of a file. Returns null content when the path is absent."
    }
    fn schema(&self) -> Option<Value> {
        Some(path_schema())
    }
    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::VfsRead]
    }
    async fn execute(&self, args: &Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let path = required_str(args, "path")?;
        let content = ctx.vfs.read(path).map_err(vfs_err)?;
        Ok(json!({
            "path": path,
            "exists": content.is_some(),
            "content": content,
        }))
    }
}

/// Write content to a path, creating a new immutable version.
pub struct FsWriteTool;

#[async_trait]
impl BuiltinTool for FsWriteTool {
    fn id(&self) -> &str {
        "fs.write"
    }
    fn description(&self) -> &str {
        "Write a file. Overwrites existing content; the previous version remains retrievable."
    }
    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        }))
    }
    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::VfsWrite]
    }
    async fn execute(&self, args: &Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let path = required_str(args, "path")?;
        let content = required_str(args, "content")?;
        let version = ctx
            .vfs
            .write(path, content, Some(&ctx.caller.id))
            .map_err(vfs_err)?;
        Ok(json!({
            "path": version.path,
            "version": version.id,
            "hash": version.hash,
        }))
    }
}

/// Remove the current mapping for a path.  Versions are retained.
pub struct FsDeleteTool;

#[async_trait]
impl BuiltinTool for FsDeleteTool {
    fn id(&self) -> &str {
        "fs.delete"
    }
    fn description(&self) -> &str {
        "Delete a file mapping. Past versions stay retrievable by id."
    }
    fn schema(&self) -> Option<Value> {
        Some(path_schema())
    }
    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::VfsDelete]
    }
    async fn execute(&self, args: &Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let path = required_str(args, "path")?;
        let existed = ctx
            .vfs
            .delete(path, Some(&ctx.caller.id))
            .map_err(vfs_err)?;
        Ok(json!({ "ok": true, "path": path, "existed": existed }))
    }
}

/// List currently mapped paths.
pub struct FsListTool;

#[async_trait]
impl BuiltinTool for FsListTool {
    fn id(&self) -> &str {
        "fs.list"
    }
    fn description(&self) -> &str {
        "List every path currently mapped in the workspace, sorted."
    }
    fn schema(&self) -> Option<Value> {
        Some(json!({ "type": "object", "additionalProperties": false }))
    }
    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::VfsRead]
    }
    async fn execute(&self, _args: &Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        Ok(json!({ "paths": ctx.vfs.list() }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
