// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Request types ────────────────────────────────────────────────────────────

/// One completion request as the core hands it to a model client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInput {
    /// The assembled prompt: task, plan hint, serialized context.
    pub prompt: String,
    /// Additional context blocks the client may fold into its wire format.
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub options: GenerateOptions,
}

/// Sampling and tool options forwarded with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
    /// Maximum output tokens; must be positive.
    pub max_tokens: u32,
    /// Tools the model may request, as structured specs.
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
            tools: Vec::new(),
        }
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// ─── Response types ───────────────────────────────────────────────────────────

/// What the model produced for one request: either a final answer or a
/// request to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelOutput {
    Final {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    Tool {
        tool: String,
        arguments: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl ModelOutput {
    /// Convenience constructor for a final text answer.
    pub fn final_text(content: impl Into<String>) -> Self {
        Self::Final {
            content: content.into(),
            usage: None,
        }
    }

    /// Convenience constructor for a tool request.
    pub fn tool_call(tool: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::Tool {
            tool: tool.into(),
            arguments,
            usage: None,
        }
    }
}

/// Token usage from one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ─── Context message types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Reasoning,
}

/// A single message in the bounded context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    /// Structured metadata: tool call records, summary statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ContextMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            meta: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            meta: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            meta: None,
        }
    }

    /// A tool message carrying `{tool, args, result}` metadata next to a
    /// short text rendering.
    pub fn tool(text: impl Into<String>, meta: serde_json::Value) -> Self {
        Self {
            role: Role::Tool,
            content: text.into(),
            meta: Some(meta),
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Approximate token count used for context budgeting.
    ///
    /// Uses the 4-chars-per-token heuristic; never returns zero so that
    /// empty messages still count against the message budget consistently.
    pub fn approx_tokens(&self) -> usize {
        (self.content.len() / 4).max(1)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
