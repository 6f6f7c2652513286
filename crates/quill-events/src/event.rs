// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// The closed set of event kinds carried on the bus.
///
/// Control signals (emergency stop) and observability share the same
/// fabric; consumers filter by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Prompt,
    ModelResponse,
    ModelError,
    ToolInvocation,
    ToolResult,
    ToolError,
    ToolExecution,
    VfsChange,
    AgentStart,
    AgentStep,
    AgentFinish,
    AgentEmergencyStop,
    Security,
    EventArchive,
    ContextCompression,
    DebugMetrics,
    StopCondition,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Reuse the serde rename so logs and wire agree on one spelling.
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Immutable record of something that happened in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Lexicographically sortable id, strictly increasing within a process
    /// run (zero-padded sequence number).
    pub id: String,
    /// Numeric sequence, the authoritative ordering key.
    pub seq: u64,
    pub kind: EventKind,
    /// Milliseconds since the epoch, monotone non-decreasing across events.
    pub timestamp_ms: u64,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl Event {
    pub(crate) fn stamp(
        seq: u64,
        kind: EventKind,
        timestamp_ms: u64,
        payload: serde_json::Value,
        meta: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: format!("evt-{seq:020}"),
            seq,
            kind,
            timestamp_ms,
            payload,
            meta,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::VfsChange).unwrap();
        assert_eq!(json, "\"vfs_change\"");
        let json = serde_json::to_string(&EventKind::AgentEmergencyStop).unwrap();
        assert_eq!(json, "\"agent_emergency_stop\"");
    }

    #[test]
    fn display_matches_serde_spelling() {
        assert_eq!(EventKind::ToolInvocation.to_string(), "tool_invocation");
    }

    #[test]
    fn ids_sort_lexicographically_with_seq() {
        let a = Event::stamp(9, EventKind::Prompt, 0, serde_json::json!({}), None);
        let b = Event::stamp(10, EventKind::Prompt, 0, serde_json::json!({}), None);
        let c = Event::stamp(100, EventKind::Prompt, 0, serde_json::json!({}), None);
        assert!(a.id < b.id);
        assert!(b.id < c.id);
    }

    #[test]
    fn event_round_trips_through_json() {
        let e = Event::stamp(
            1,
            EventKind::Security,
            42,
            serde_json::json!({"type": "permission_denied"}),
            Some(serde_json::json!({"caller": "a"})),
        );
        let line = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(back.seq, 1);
        assert_eq!(back.kind, EventKind::Security);
        assert_eq!(back.payload["type"], "permission_denied");
        assert_eq!(back.meta.unwrap()["caller"], "a");
    }
}
