// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::builtin::required_str;
use crate::{BuiltinTool, Permission, ToolCtx, ToolError};

/// Deterministic content hash.
pub struct HashTool;

#[async_trait]
impl BuiltinTool for HashTool {
    fn id(&self) -> &str {
        "system.hash"
    }
    fn description(&self) -> &str {
        "SHA-256 hash of the given text, hex-encoded."
    }
    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
            "additionalProperties": false
        }))
    }
    async fn execute(&self, args: &Value, _ctx: &ToolCtx) -> Result<Value, ToolError> {
        let text = required_str(args, "text")?;
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Ok(json!({
            "algorithm": "sha256",
            "hash": hex::encode(hasher.finalize()),
        }))
    }
}

/// Process-level telemetry query.
pub struct ProcessInfoTool;

#[async_trait]
impl BuiltinTool for ProcessInfoTool {
    fn id(&self) -> &str {
        "system.process_info"
    }
    fn description(&self) -> &str {
        "Report pid, platform, and working directory of the backend process."
    }
    fn schema(&self) -> Option<Value> {
        Some(json!({ "type": "object", "additionalProperties": false }))
    }
    async fn execute(&self, _args: &Value, _ctx: &ToolCtx) -> Result<Value, ToolError> {
        Ok(json!({
            "pid": std::process::id(),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "cwd": std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }))
    }
}

/// Query the locally installed model identifiers.
pub struct ListModelsTool;

#[async_trait]
impl BuiltinTool for ListModelsTool {
    fn id(&self) -> &str {
        "model.list_installed"
    }
    fn description(&self) -> &str {
        "List the model identifiers installed in the local model subsystem."
    }
    fn schema(&self) -> Option<Value> {
        Some(json!({ "type": "object", "additionalProperties": false }))
    }
    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::ModelCall]
    }
    async fn execute(&self, _args: &Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        Ok(json!({ "models": ctx.cfg.installed_models }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quill_config::{EventBusConfig, ToolsConfig, VfsConfig};
    use quill_events::EventBus;
    use quill_vfs::Vfs;

    use super::*;
    use crate::Caller;

    fn ctx_with(cfg: ToolsConfig) -> ToolCtx {
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        ToolCtx {
            vfs: Arc::new(Vfs::new(VfsConfig::default(), Arc::clone(&bus))),
            bus,
            cfg: Arc::new(cfg),
            caller: Caller::from_tokens("t", &["model.call"]),
        }
    }

    #[tokio::test]
    async fn hash_is_deterministic_sha256() {
        let ctx = ctx_with(ToolsConfig::default());
        let a = HashTool.execute(&json!({"text": "abc"}), &ctx).await.unwrap();
        let b = HashTool.execute(&json!({"text": "abc"}), &ctx).await.unwrap();
        assert_eq!(a, b);
        // Well-known sha256("abc").
        assert_eq!(
            a["hash"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn process_info_reports_pid() {
        let ctx = ctx_with(ToolsConfig::default());
        let out = ProcessInfoTool.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(out["pid"], std::process::id());
        assert!(!out["os"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_models_reads_configured_catalog() {
        let ctx = ctx_with(ToolsConfig {
            installed_models: vec!["phi-3-mini".into(), "llama-3.2-3b".into()],
            ..Default::default()
        });
        let out = ListModelsTool.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(out["models"], json!(["phi-3-mini", "llama-3.2-3b"]));
    }
}
