// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Exactly one termination reason per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    FinalAnswer,
    MaxSteps,
    GlobalTimeout,
    LoopDetected,
    ConsecutiveFailures,
    EmergencyStop,
    FatalError,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(s.trim_matches('"'))
    }
}

/// The outcome of one `run` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub reason: TerminationReason,
    /// Iterations executed (the step counter at exit).
    pub steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RunReport {
    pub fn ok(&self) -> bool {
        self.reason == TerminationReason::FinalAnswer
    }

    /// The structured `{ok, value | error}` shape every API exit path
    /// returns.
    pub fn api_response(&self) -> serde_json::Value {
        if self.ok() {
            serde_json::json!({
                "ok": true,
                "value": { "ok": true, "answer": self.answer },
            })
        } else {
            serde_json::json!({
                "ok": false,
                "error": {
                    "code": reason_code(self.reason),
                    "message": self
                        .last_error
                        .clone()
                        .unwrap_or_else(|| self.reason.to_string()),
                },
            })
        }
    }
}

fn reason_code(reason: TerminationReason) -> &'static str {
    match reason {
        TerminationReason::FinalAnswer => "ok",
        TerminationReason::MaxSteps => "max_steps",
        TerminationReason::GlobalTimeout => "timeout_error",
        TerminationReason::LoopDetected => "agent_loop_error",
        TerminationReason::ConsecutiveFailures => "consecutive_failures",
        TerminationReason::EmergencyStop => "emergency_stop",
        TerminationReason::FatalError => "fatal_error",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
