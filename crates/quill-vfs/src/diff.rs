// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use similar::{ChangeTag, TextDiff};

/// Line-oriented structural diff between two version contents.
///
/// Returns `{ops: [{tag, line}], insertions, deletions}` — a stable shape
/// tool results and API responses can carry without committing to a
/// rendering.
pub fn structural_diff(old: &str, new: &str) -> serde_json::Value {
    let diff = TextDiff::from_lines(old, new);
    let mut ops = Vec::new();
    let mut insertions = 0u64;
    let mut deletions = 0u64;
    for change in diff.iter_all_changes() {
        let tag = match change.tag() {
            ChangeTag::Equal => "equal",
            ChangeTag::Insert => {
                insertions += 1;
                "insert"
            }
            ChangeTag::Delete => {
                deletions += 1;
                "delete"
            }
        };
        ops.push(serde_json::json!({
            "tag": tag,
            "line": change.value().trim_end_matches('\n'),
        }));
    }
    serde_json::json!({
        "ops": ops,
        "insertions": insertions,
        "deletions": deletions,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
