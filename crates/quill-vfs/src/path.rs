// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path};

use crate::VfsError;

/// Validate and normalize a user-supplied relative path.
///
/// Every path entering the VFS routes through this function; callers never
/// bypass it.  The returned string is a normalized `/`-separated relative
/// path guaranteed to stay inside whatever base directory it is later
/// joined onto.
///
/// Rejection rules, applied in order:
/// 1. empty, longer than `max_len`, or containing a NUL byte;
/// 2. after one URI-decode: contains `..`, starts with a separator or a
///    drive-letter prefix, or still carries encoded traversal sequences
///    (`%2e` / `%2f` / `%5c`, case-insensitive — i.e. double encoding);
/// 3. still absolute after stripping leading separators;
/// 4. normalization encounters a parent or root component.
pub fn sanitize_path(user: &str, max_len: usize) -> Result<String, VfsError> {
    if user.is_empty() {
        return Err(VfsError::PathTraversal("empty path".into()));
    }
    if user.len() > max_len {
        return Err(VfsError::PathTraversal(format!(
            "path longer than {max_len} characters"
        )));
    }
    if user.contains('\0') {
        return Err(VfsError::PathTraversal("path contains NUL byte".into()));
    }

    // One URI-decode, no more: a second layer of encoding is treated as an
    // attack, not as data.
    let decoded = percent_decode_once(user);

    if decoded.contains("..") {
        return Err(VfsError::PathTraversal(format!(
            "parent traversal in {user:?}"
        )));
    }
    let lower = decoded.to_ascii_lowercase();
    if lower.contains("%2e") || lower.contains("%2f") || lower.contains("%5c") {
        return Err(VfsError::PathTraversal(format!(
            "double-encoded traversal in {user:?}"
        )));
    }
    if decoded.starts_with('/') || decoded.starts_with('\\') || has_drive_prefix(&decoded) {
        return Err(VfsError::PathTraversal(format!(
            "absolute path {user:?} not allowed"
        )));
    }

    // Defense in depth: strip any leading separators that survived, then
    // re-check absoluteness.
    let stripped = decoded.trim_start_matches(['/', '\\']);
    if stripped.is_empty() {
        return Err(VfsError::PathTraversal("path has no components".into()));
    }
    if Path::new(stripped).is_absolute() || has_drive_prefix(stripped) {
        return Err(VfsError::PathTraversal(format!(
            "absolute path {user:?} not allowed"
        )));
    }

    // Normalize: keep plain components, drop `.`, reject everything that
    // could escape the base.
    let mut parts: Vec<&str> = Vec::new();
    for comp in Path::new(stripped).components() {
        match comp {
            Component::Normal(c) => match c.to_str() {
                Some(s) => parts.push(s),
                None => {
                    return Err(VfsError::PathTraversal(format!(
                        "non-UTF-8 component in {user:?}"
                    )))
                }
            },
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(VfsError::PathTraversal(format!(
                    "escaping component in {user:?}"
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(VfsError::PathTraversal("path has no components".into()));
    }

    Ok(parts.join("/"))
}

/// Decode `%XX` escapes once.  Invalid or truncated escapes are kept
/// verbatim so they cannot smuggle bytes past the later checks.
fn percent_decode_once(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            if let Ok(h) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(v) = u8::from_str_radix(h, 16) {
                    out.push(v);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn has_drive_prefix(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
