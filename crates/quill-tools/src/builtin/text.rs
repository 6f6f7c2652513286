// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::required_str;
use crate::{BuiltinTool, ToolCtx, ToolError};

fn text_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "text": { "type": "string" } },
        "required": ["text"],
        "additionalProperties": false
    })
}

/// Pure text transform: uppercase.
pub struct TextUppercaseTool;

#[async_trait]
impl BuiltinTool for TextUppercaseTool {
    fn id(&self) -> &str {
        "text.uppercase"
    }
    fn description(&self) -> &str {
        "Uppercase the given text."
    }
    fn schema(&self) -> Option<Value> {
        Some(text_schema())
    }
    async fn execute(&self, args: &Value, _ctx: &ToolCtx) -> Result<Value, ToolError> {
        let text = required_str(args, "text")?;
        Ok(json!({ "text": text.to_uppercase() }))
    }
}

/// Pure text transform: lowercase.
pub struct TextLowercaseTool;

#[async_trait]
impl BuiltinTool for TextLowercaseTool {
    fn id(&self) -> &str {
        "text.lowercase"
    }
    fn description(&self) -> &str {
        "Lowercase the given text."
    }
    fn schema(&self) -> Option<Value> {
        Some(text_schema())
    }
    async fn execute(&self, args: &Value, _ctx: &ToolCtx) -> Result<Value, ToolError> {
        let text = required_str(args, "text")?;
        Ok(json!({ "text": text.to_lowercase() }))
    }
}

/// Pure text transform: reverse by character.
pub struct TextReverseTool;

#[async_trait]
impl BuiltinTool for TextReverseTool {
    fn id(&self) -> &str {
        "text.reverse"
    }
    fn description(&self) -> &str {
        "Reverse the given text character by character."
    }
    fn schema(&self) -> Option<Value> {
        Some(text_schema())
    }
    async fn execute(&self, args: &Value, _ctx: &ToolCtx) -> Result<Value, ToolError> {
        let text = required_str(args, "text")?;
        Ok(json!({ "text": text.chars().rev().collect::<String>() }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
