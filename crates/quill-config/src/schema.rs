// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub vfs: VfsConfig,
    #[serde(default)]
    pub events: EventBusConfig,
}

/// Controller limits for one agent run.
///
/// Every field has a conservative default; the loader only overrides what a
/// config file actually sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on reason-act iterations per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Hard cap on wall time for one run, in milliseconds.
    #[serde(default = "default_global_timeout_ms")]
    pub global_timeout_ms: u64,
    /// Per-step cap applied around the model and tool awaits.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// The same tool+args signature recurring beyond this count terminates
    /// the run as a loop.
    #[serde(default = "default_max_identical_tool_calls")]
    pub max_identical_tool_calls: u32,
    /// Consecutive tool/model failures tolerated before aborting.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Token budget for the bounded context.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Message-count budget for the bounded context.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
    /// How many recent messages survive a context summarization pass.
    #[serde(default = "default_summarize_keep_recent")]
    pub summarize_keep_recent: usize,
    /// Fraction of the token budget at which the controller summarizes
    /// proactively before the next model call.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Sampling temperature forwarded to the model.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum output tokens requested per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Default permission tokens granted to callers that carry none.
    /// Unknown tokens are dropped with a warning at parse time.
    #[serde(default = "default_permissions")]
    pub permissions: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            global_timeout_ms: default_global_timeout_ms(),
            step_timeout_ms: default_step_timeout_ms(),
            max_identical_tool_calls: default_max_identical_tool_calls(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_context_tokens: default_max_context_tokens(),
            max_context_messages: default_max_context_messages(),
            summarize_keep_recent: default_summarize_keep_recent(),
            compaction_threshold: default_compaction_threshold(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            permissions: default_permissions(),
        }
    }
}

fn default_max_steps() -> u32 {
    50
}
fn default_global_timeout_ms() -> u64 {
    300_000
}
fn default_step_timeout_ms() -> u64 {
    30_000
}
fn default_max_identical_tool_calls() -> u32 {
    3
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_max_context_tokens() -> usize {
    4096
}
fn default_max_context_messages() -> usize {
    100
}
fn default_summarize_keep_recent() -> usize {
    8
}
fn default_compaction_threshold() -> f32 {
    0.9
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_permissions() -> Vec<String> {
    vec!["vfs.read".to_string()]
}

/// Tool engine limits: rate limiting and the two sandboxed runners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Token-bucket window per (caller, tool), in milliseconds.
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    /// Invocations allowed per window before `rate_limit_exceeded`.
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
    /// Interval of the background task that prunes expired buckets.
    #[serde(default = "default_rate_limit_prune_interval_ms")]
    pub rate_limit_prune_interval_ms: u64,
    /// Wall-clock budget for one in-process scripted execution.
    #[serde(default = "default_script_timeout_ms")]
    pub script_timeout_ms: u64,
    /// Scripted sources larger than this are rejected at registration.
    #[serde(default = "default_script_max_source_bytes")]
    pub script_max_source_bytes: usize,
    /// Wall-clock budget for one subprocess tool run.
    #[serde(default = "default_subprocess_timeout_ms")]
    pub subprocess_timeout_ms: u64,
    /// Grace period between the stop signal and the kill signal.
    #[serde(default = "default_subprocess_grace_ms")]
    pub subprocess_grace_ms: u64,
    /// Virtual-memory ceiling applied to subprocess runners.
    #[serde(default = "default_subprocess_memory_limit_bytes")]
    pub subprocess_memory_limit_bytes: u64,
    /// Interpreter binary for python subprocess tools.
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
    /// Model identifiers reported by the `model.list_installed` builtin.
    #[serde(default)]
    pub installed_models: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_ms: default_rate_limit_window_ms(),
            rate_limit_burst: default_rate_limit_burst(),
            rate_limit_prune_interval_ms: default_rate_limit_prune_interval_ms(),
            script_timeout_ms: default_script_timeout_ms(),
            script_max_source_bytes: default_script_max_source_bytes(),
            subprocess_timeout_ms: default_subprocess_timeout_ms(),
            subprocess_grace_ms: default_subprocess_grace_ms(),
            subprocess_memory_limit_bytes: default_subprocess_memory_limit_bytes(),
            python_bin: default_python_bin(),
            installed_models: Vec::new(),
        }
    }
}

fn default_rate_limit_window_ms() -> u64 {
    1000
}
fn default_rate_limit_burst() -> u32 {
    10
}
fn default_rate_limit_prune_interval_ms() -> u64 {
    30_000
}
fn default_script_timeout_ms() -> u64 {
    5000
}
fn default_script_max_source_bytes() -> usize {
    20 * 1024
}
fn default_subprocess_timeout_ms() -> u64 {
    30_000
}
fn default_subprocess_grace_ms() -> u64 {
    1000
}
fn default_subprocess_memory_limit_bytes() -> u64 {
    256 * 1024 * 1024
}
fn default_python_bin() -> String {
    "python3".to_string()
}

/// Versioned file store limits and the optional persistent backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VfsConfig {
    /// Per-file content ceiling; writes above it fail with a size error.
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: usize,
    /// User paths longer than this are rejected.
    #[serde(default = "default_max_path_len")]
    pub max_path_len: usize,
    /// Root of the on-disk workspace.  `None` keeps the store memory-only.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Project directory name under the workspace root.
    #[serde(default = "default_project_id")]
    pub project_id: String,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            max_path_len: default_max_path_len(),
            workspace_root: None,
            project_id: default_project_id(),
        }
    }
}

fn default_max_file_size_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_max_path_len() -> usize {
    1024
}
fn default_project_id() -> String {
    "default".to_string()
}

/// Event bus retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Bounded ring size for in-memory event history.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// How many oldest events are handed to the archive sink per overflow.
    #[serde(default = "default_archive_batch")]
    pub archive_batch: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            archive_batch: default_archive_batch(),
        }
    }
}

fn default_max_history() -> usize {
    1000
}
fn default_archive_batch() -> usize {
    128
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
