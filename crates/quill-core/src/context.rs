// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use quill_model::{ContextMessage, Role};

/// Sliding-window message buffer with token and message budgets.
///
/// System messages are never evicted; eviction always removes the oldest
/// non-system message.  When the controller wants a bigger reclaim it calls
/// [`summarize`](Self::summarize), which collapses the middle of the
/// conversation into one synthetic summary message.
#[derive(Debug)]
pub struct BoundedContext {
    messages: Vec<ContextMessage>,
    max_tokens: usize,
    max_messages: usize,
    token_count: usize,
}

impl BoundedContext {
    pub fn new(max_tokens: usize, max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_tokens,
            max_messages: max_messages.max(1),
            token_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    /// Fraction of the token budget consumed (0.0–1.0).
    pub fn fraction(&self) -> f32 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        self.token_count as f32 / self.max_tokens as f32
    }

    /// Append a message, then evict oldest non-system messages until both
    /// budgets hold again.
    pub fn push(&mut self, msg: ContextMessage) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
        self.evict();
    }

    fn evict(&mut self) {
        while self.token_count > self.max_tokens || self.messages.len() > self.max_messages {
            let Some(idx) = self
                .messages
                .iter()
                .position(|m| m.role != Role::System)
            else {
                break;
            };
            let removed = self.messages.remove(idx);
            self.token_count -= removed.approx_tokens();
        }
    }

    /// Collapse everything between the system prefix and the `keep_recent`
    /// most recent non-system messages into one synthetic summary message.
    ///
    /// Deterministic — no model call is made; the summary names the roles
    /// and leading fragments of what it replaced so the agent retains a
    /// trace of the earlier conversation.  Returns the number of messages
    /// collapsed, or `None` when there was nothing to collapse.
    pub fn summarize(&mut self, keep_recent: usize) -> Option<usize> {
        let system: Vec<ContextMessage> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let non_system: Vec<ContextMessage> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();
        if non_system.len() <= keep_recent + 1 {
            return None;
        }

        let split = non_system.len() - keep_recent;
        let collapsed = &non_system[..split];
        let recent = &non_system[split..];

        let mut lines = Vec::with_capacity(collapsed.len() + 1);
        lines.push(format!(
            "[Earlier conversation collapsed: {} messages]",
            collapsed.len()
        ));
        for m in collapsed {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
                Role::Reasoning => "reasoning",
            };
            lines.push(format!("- {role}: {}", first_fragment(&m.content)));
        }

        let summary = ContextMessage::assistant(lines.join("\n")).with_meta(serde_json::json!({
            "summary": true,
            "collapsed": collapsed.len(),
        }));

        let count = collapsed.len();
        self.messages = system;
        self.messages.push(summary);
        self.messages.extend(recent.iter().cloned());
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
        Some(count)
    }

    /// Render the conversation for inclusion in a prompt.
    pub fn serialize(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                    Role::Reasoning => "reasoning",
                };
                format!("{role}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// First line of a message, capped at 80 characters on a char boundary.
fn first_fragment(content: &str) -> &str {
    let line = content.lines().next().unwrap_or("");
    match line.char_indices().nth(80) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(n_chars: usize) -> String {
        "x".repeat(n_chars)
    }

    // ── Budgets ───────────────────────────────────────────────────────────────

    #[test]
    fn token_budget_evicts_oldest_non_system() {
        let mut ctx = BoundedContext::new(10, 100);
        ctx.push(ContextMessage::system("keep me"));
        ctx.push(ContextMessage::user(filler(20))); // 5 tokens
        ctx.push(ContextMessage::user(filler(20))); // 5 tokens
        ctx.push(ContextMessage::user(filler(20))); // over budget now
        assert!(ctx.token_count() <= 10);
        assert_eq!(ctx.messages()[0].role, Role::System);
    }

    #[test]
    fn message_budget_is_enforced() {
        let mut ctx = BoundedContext::new(10_000, 3);
        for i in 0..6 {
            ctx.push(ContextMessage::user(format!("m{i}")));
        }
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn system_messages_survive_any_sequence_of_appends() {
        let mut ctx = BoundedContext::new(8, 4);
        ctx.push(ContextMessage::system("s1"));
        ctx.push(ContextMessage::system("s2"));
        for _ in 0..10 {
            ctx.push(ContextMessage::user(filler(40)));
        }
        let systems = ctx
            .messages()
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        assert_eq!(systems, 2);
    }

    #[test]
    fn token_count_tracks_evictions() {
        let mut ctx = BoundedContext::new(100, 100);
        ctx.push(ContextMessage::user(filler(40))); // 10 tokens
        let before = ctx.token_count();
        ctx.push(ContextMessage::user(filler(40)));
        assert_eq!(ctx.token_count(), before * 2);
    }

    // ── Summarization ─────────────────────────────────────────────────────────

    #[test]
    fn summarize_collapses_middle_and_keeps_recent() {
        let mut ctx = BoundedContext::new(100_000, 1000);
        ctx.push(ContextMessage::system("sys"));
        for i in 0..10 {
            ctx.push(ContextMessage::user(format!("message {i}")));
        }
        let collapsed = ctx.summarize(3).unwrap();
        assert_eq!(collapsed, 7);
        // system + summary + 3 recent
        assert_eq!(ctx.len(), 5);
        assert_eq!(ctx.messages()[0].role, Role::System);
        let summary = &ctx.messages()[1];
        assert_eq!(summary.meta.as_ref().unwrap()["collapsed"], 7);
        assert!(summary.content.contains("collapsed: 7 messages"));
        // The most recent message survived verbatim.
        assert_eq!(ctx.messages()[4].content, "message 9");
    }

    #[test]
    fn summarize_is_noop_when_small() {
        let mut ctx = BoundedContext::new(1000, 100);
        ctx.push(ContextMessage::user("only"));
        assert!(ctx.summarize(4).is_none());
    }

    #[test]
    fn summarize_reduces_token_count() {
        let mut ctx = BoundedContext::new(100_000, 1000);
        for _ in 0..20 {
            ctx.push(ContextMessage::user(filler(400)));
        }
        let before = ctx.token_count();
        ctx.summarize(2).unwrap();
        assert!(ctx.token_count() < before);
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    #[test]
    fn serialize_renders_roles_in_order() {
        let mut ctx = BoundedContext::new(1000, 100);
        ctx.push(ContextMessage::system("be helpful"));
        ctx.push(ContextMessage::user("hi"));
        ctx.push(ContextMessage::assistant("hello"));
        let s = ctx.serialize();
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines[0], "system: be helpful");
        assert_eq!(lines[1], "user: hi");
        assert_eq!(lines[2], "assistant: hello");
    }

    #[test]
    fn first_fragment_caps_long_lines() {
        let long = "y".repeat(200);
        assert_eq!(first_fragment(&long).len(), 80);
        assert_eq!(first_fragment("short\nsecond"), "short");
    }
}
