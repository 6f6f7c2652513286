// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use regex::Regex;

/// Result of a failed pre-registration source check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CheckViolation {
    TooLarge { size: usize, max: usize },
    Forbidden { pattern: String },
}

impl std::fmt::Display for CheckViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { size, max } => {
                write!(f, "source is {size} bytes, limit is {max}")
            }
            Self::Forbidden { pattern } => {
                write!(f, "source matches forbidden pattern: {pattern}")
            }
        }
    }
}

/// Static pre-check applied to every untrusted source-text tool before it
/// is compiled or stored.
///
/// The sandbox itself is the real boundary; this list exists to reject the
/// obvious escapes early and loudly instead of at execution time.
pub(crate) struct StaticCheck {
    max_source_bytes: usize,
    patterns: Vec<(Regex, &'static str)>,
}

/// `(regex, label)` pairs covering the forbidden API surface across the
/// supported script languages.
const FORBIDDEN: &[(&str, &str)] = &[
    // Process / runtime access
    (r"std::process", "process access"),
    (r"\bsubprocess\b", "process access"),
    (r"\bos\s*\.\s*system\b", "process access"),
    (r"\bchild_process\b", "process access"),
    // Dynamic import / module loading
    (r"\bimport\b", "dynamic import"),
    (r"\brequire\s*\(", "dynamic import"),
    (r"__import__", "dynamic import"),
    // Raw buffer types
    (r"\bArrayBuffer\b|\bSharedArrayBuffer\b", "raw buffer type"),
    (r"\bmemoryview\b|\bbytearray\b", "raw buffer type"),
    (r"\bblob\s*\(", "raw buffer type"),
    // Global mutation
    (r"\bglobalThis\b|\bglobal\s*\.", "global mutation"),
    (r"\bglobals\s*\(", "global mutation"),
    // Reflection / proxy primitives
    (r"\bProxy\b|\bReflect\b", "reflection primitive"),
    (r"\bgetattr\s*\(|\bsetattr\s*\(", "reflection primitive"),
    // Dynamic code construction
    (r"\beval\s*\(", "dynamic code construction"),
    (r"\bexec\s*\(", "dynamic code construction"),
    (r"new\s+Function", "dynamic code construction"),
    (r"\bcompile\s*\(", "dynamic code construction"),
    // Unbounded busy loops
    (r"while\s*\(\s*true\s*\)", "unbounded loop"),
    (r"\bwhile\s+true\b", "unbounded loop"),
    (r"\bloop\s*\{", "unbounded loop"),
];

impl StaticCheck {
    pub(crate) fn new(max_source_bytes: usize) -> Self {
        let patterns = FORBIDDEN
            .iter()
            .filter_map(|(p, label)| Regex::new(p).ok().map(|re| (re, *label)))
            .collect();
        Self {
            max_source_bytes,
            patterns,
        }
    }

    pub(crate) fn check(&self, source: &str) -> Result<(), CheckViolation> {
        if source.len() > self.max_source_bytes {
            return Err(CheckViolation::TooLarge {
                size: source.len(),
                max: self.max_source_bytes,
            });
        }
        for (re, label) in &self.patterns {
            if re.is_match(source) {
                return Err(CheckViolation::Forbidden {
                    pattern: (*label).to_string(),
                });
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
