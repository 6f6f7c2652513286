// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use quill_config::ToolsConfig;
use quill_events::EventBus;
use quill_vfs::Vfs;

use crate::sandbox::{CompiledScript, SubprocessSpec};
use crate::{Caller, Permission, ToolError};

/// Shared services available to every runner invocation.
#[derive(Clone)]
pub struct ToolCtx {
    pub bus: Arc<EventBus>,
    pub vfs: Arc<Vfs>,
    pub cfg: Arc<ToolsConfig>,
    pub caller: Caller,
}

/// Trait implemented by every native tool shipped with the engine.
#[async_trait]
pub trait BuiltinTool: Send + Sync {
    /// Unique id, e.g. `fs.read`.
    fn id(&self) -> &str;
    /// Human-readable name; defaults to the id.
    fn name(&self) -> &str {
        self.id()
    }
    fn description(&self) -> &str;
    /// JSON Schema for the args object, when the tool wants validation.
    fn schema(&self) -> Option<Value> {
        None
    }
    /// Permission tokens a caller must hold to invoke this tool.
    fn required_permissions(&self) -> Vec<Permission> {
        Vec::new()
    }
    /// Execute with already-validated args.  Failures are returned as
    /// [`ToolError`]; the engine wraps panics.
    async fn execute(&self, args: &Value, ctx: &ToolCtx) -> Result<Value, ToolError>;
}

/// The execution strategy for a registered tool.
///
/// Scripted and subprocess sources are compiled/validated once at
/// registration; invocation reuses the stored form.
pub enum Runner {
    Builtin(Arc<dyn BuiltinTool>),
    Scripted(CompiledScript),
    Subprocess(SubprocessSpec),
}

impl Runner {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Builtin(_) => "builtin",
            Self::Scripted(_) => "scripted-inprocess",
            Self::Subprocess(_) => "subprocess",
        }
    }
}

/// Registry entry describing one tool.  Immutable after registration.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schema: Option<Value>,
    pub required_permissions: HashSet<Permission>,
}

impl ToolDefinition {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            schema: None,
            required_permissions: HashSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = Permission>) -> Self {
        self.required_permissions.extend(perms);
        self
    }

    /// Definition synthesized from a [`BuiltinTool`] implementation.
    pub fn from_builtin(tool: &dyn BuiltinTool) -> Self {
        Self {
            id: tool.id().to_string(),
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            schema: tool.schema(),
            required_permissions: tool.required_permissions().into_iter().collect(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTool;

    #[async_trait]
    impl BuiltinTool for NoopTool {
        fn id(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn required_permissions(&self) -> Vec<Permission> {
            vec![Permission::VfsRead]
        }
        async fn execute(&self, _args: &Value, _ctx: &ToolCtx) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn definition_from_builtin_copies_surface() {
        let def = ToolDefinition::from_builtin(&NoopTool);
        assert_eq!(def.id, "noop");
        assert_eq!(def.name, "noop");
        assert!(def.required_permissions.contains(&Permission::VfsRead));
        assert!(def.schema.is_none());
    }

    #[test]
    fn builder_accumulates_fields() {
        let def = ToolDefinition::new("t", "a tool")
            .with_name("The Tool")
            .with_schema(serde_json::json!({"type": "object"}))
            .with_permissions([Permission::ToolRun]);
        assert_eq!(def.name, "The Tool");
        assert!(def.schema.is_some());
        assert!(def.required_permissions.contains(&Permission::ToolRun));
    }

    #[test]
    fn runner_kind_strings_are_stable() {
        let r = Runner::Builtin(Arc::new(NoopTool));
        assert_eq!(r.kind(), "builtin");
    }
}
