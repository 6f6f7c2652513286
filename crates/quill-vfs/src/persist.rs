// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::version::{FileVersion, Snapshot};

/// On-disk layout under `<workspace>/<project_id>/`:
///
/// ```text
/// files/      # file tree, each file's current content (UTF-8)
/// versions/   # <id>.json — FileVersion records
/// snapshots/  # <id>.json — path → content maps
/// ```
///
/// The `history.log` sibling is owned by the event layer, not by the VFS.
pub(crate) struct Backend {
    root: PathBuf,
}

impl Backend {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Create the directory layout and scan `files/` for existing content.
    ///
    /// Returns `(relative path, content, mtime)` per readable UTF-8 file so
    /// the store can synthesize a version for each.  Unreadable or
    /// non-UTF-8 files are skipped with a warning.
    pub(crate) fn init(&self) -> anyhow::Result<Vec<(String, String, DateTime<Utc>)>> {
        for dir in [self.files_dir(), self.versions_dir(), self.snapshots_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }

        let files_dir = self.files_dir();
        let mut loaded = Vec::new();
        for entry in WalkDir::new(&files_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let rel = match entry.path().strip_prefix(&files_dir) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e,
                          "skipping unreadable workspace file");
                    continue;
                }
            };
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            loaded.push((rel, content, mtime));
        }
        debug!(count = loaded.len(), root = %self.root.display(), "workspace scan complete");
        Ok(loaded)
    }

    /// Durable write: content goes to `<target>.tmp-<random>` first, then an
    /// atomic rename replaces the target.  The temp file is unlinked on any
    /// failure so aborted writes leave no debris.
    pub(crate) fn write_file(&self, rel: &str, content: &str) -> std::io::Result<()> {
        let target = self.files_dir().join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        atomic_write(&target, content)
    }

    pub(crate) fn remove_file(&self, rel: &str) -> std::io::Result<()> {
        let target = self.files_dir().join(rel);
        match std::fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn write_version(&self, version: &FileVersion) -> anyhow::Result<()> {
        let target = self.versions_dir().join(format!("{}.json", version.id));
        let json = serde_json::to_string_pretty(version)?;
        atomic_write(&target, &json)
            .with_context(|| format!("persisting version {}", version.id))
    }

    pub(crate) fn write_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let target = self.snapshots_dir().join(format!("{}.json", snapshot.id));
        let json = serde_json::to_string_pretty(snapshot)?;
        atomic_write(&target, &json)
            .with_context(|| format!("persisting snapshot {}", snapshot.id))
    }
}

/// Write `content` to `path.tmp-<random>` and rename over `path`.
fn atomic_write(target: &Path, content: &str) -> std::io::Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = target.with_file_name(format!(
        "{file_name}.tmp-{}",
        uuid::Uuid::new_v4().simple()
    ));
    if let Err(e) = std::fs::write(&tmp, content) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&tmp, target) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
