// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use uuid::Uuid;

/// One planned step with a hint the prompt builder injects verbatim.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub id: u32,
    pub description: String,
    pub hint: String,
}

/// Produced once per run from the user task; read-only thereafter.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Hint for the given zero-based step index.  Past the end of the plan
    /// the last hint keeps applying.
    pub fn hint_for(&self, step: usize) -> &str {
        let idx = step.min(self.steps.len().saturating_sub(1));
        &self.steps[idx].hint
    }
}

/// Rule-based planner.  Keyword heuristics over the task text pick likely
/// tools; there is always at least one step.
pub struct Planner;

/// `(keywords, description, hint)` rules checked in order.
const RULES: &[(&[&str], &str, &str)] = &[
    (
        &["create", "write", "save", "add"],
        "Create or update file content",
        "Use the fs.write tool with a relative path and the full content.",
    ),
    (
        &["read", "show", "open", "display"],
        "Read file content",
        "Use the fs.read tool with the relative path.",
    ),
    (
        &["delete", "remove"],
        "Delete a file",
        "Use the fs.delete tool with the relative path.",
    ),
    (
        &["list", "enumerate"],
        "List workspace files",
        "Use the fs.list tool to enumerate current paths.",
    ),
    (
        &["diff", "compare"],
        "Compare versions",
        "Use the vfs.diff tool with the two version ids.",
    ),
    (
        &["hash", "checksum"],
        "Hash content",
        "Use the system.hash tool on the text in question.",
    ),
];

impl Planner {
    pub fn plan(task: &str) -> Plan {
        let lower = task.to_lowercase();
        let mut steps = Vec::new();
        for (keywords, description, hint) in RULES {
            if keywords.iter().any(|k| lower.contains(k)) {
                steps.push(PlanStep {
                    id: steps.len() as u32 + 1,
                    description: (*description).to_string(),
                    hint: (*hint).to_string(),
                });
            }
        }
        if steps.is_empty() {
            steps.push(PlanStep {
                id: 1,
                description: "Answer the task".to_string(),
                hint: "Answer directly, or pick the most appropriate tool.".to_string(),
            });
        }
        Plan {
            id: Uuid::new_v4().to_string(),
            steps,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
