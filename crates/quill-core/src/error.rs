// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// The only errors that cross a suspension point inside the controller.
///
/// Every other failure (tool error, model error) is data recorded in the
/// context; these are the termination sentinels caught at the run boundary
/// and converted into a structured termination reason.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("timeout_error: deadline exceeded")]
    Timeout,

    #[error("agent_loop_error: identical tool call repeated beyond threshold")]
    Loop,

    #[error("emergency stop: {0}")]
    EmergencyStop(String),

    #[error("{0} consecutive failures")]
    ConsecutiveFailures(u32),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl AgentError {
    /// Stable code string for API responses and the `AgentFinish` payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout_error",
            Self::Loop => "agent_loop_error",
            Self::EmergencyStop(_) => "emergency_stop",
            Self::ConsecutiveFailures(_) => "consecutive_failures",
            Self::Fatal(_) => "fatal_error",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_stable_set() {
        assert_eq!(AgentError::Timeout.code(), "timeout_error");
        assert_eq!(AgentError::Loop.code(), "agent_loop_error");
        assert_eq!(AgentError::EmergencyStop("x".into()).code(), "emergency_stop");
    }

    #[test]
    fn display_carries_the_code() {
        assert!(AgentError::Timeout.to_string().contains("timeout_error"));
        assert!(AgentError::Loop.to_string().contains("agent_loop_error"));
    }
}
