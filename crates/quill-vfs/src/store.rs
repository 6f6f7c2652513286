// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use tracing::debug;

use quill_config::VfsConfig;
use quill_events::{EventBus, EventKind};

use crate::path::sanitize_path;
use crate::persist::Backend;
use crate::version::{FileVersion, Snapshot};
use crate::{structural_diff, VfsError};

struct VfsState {
    /// Current mapping from normalized path to the id of its latest version.
    files: HashMap<String, u64>,
    versions: HashMap<u64, Arc<FileVersion>>,
    snapshots: HashMap<u64, Arc<Snapshot>>,
    next_version_id: u64,
    next_snapshot_id: u64,
}

/// Versioned virtual file system: path-safe, size-bounded, with immutable
/// versions and atomic persistence.
///
/// All mutations go through one state lock so `write` and `snapshot` always
/// observe a consistent view; a snapshot is atomic with respect to
/// concurrent writes.
pub struct Vfs {
    cfg: VfsConfig,
    bus: Arc<EventBus>,
    state: Mutex<VfsState>,
    backend: Option<Backend>,
}

impl Vfs {
    /// Memory-only store.
    pub fn new(cfg: VfsConfig, bus: Arc<EventBus>) -> Self {
        Self {
            cfg,
            bus,
            state: Mutex::new(VfsState {
                files: HashMap::new(),
                versions: HashMap::new(),
                snapshots: HashMap::new(),
                next_version_id: 1,
                next_snapshot_id: 1,
            }),
            backend: None,
        }
    }

    /// Persistent store rooted at `<workspace_root>/<project_id>`.
    ///
    /// Scans the existing `files/` tree and synthesizes one version per
    /// file (author `disk-load`, timestamp = mtime) so reads work
    /// immediately after restart.
    pub fn open_persistent(cfg: VfsConfig, bus: Arc<EventBus>) -> anyhow::Result<Self> {
        let root = cfg
            .workspace_root
            .clone()
            .context("persistent VFS requires vfs.workspace_root")?
            .join(&cfg.project_id);
        let backend = Backend::new(root);
        let loaded = backend.init()?;

        let mut files = HashMap::new();
        let mut versions = HashMap::new();
        let mut next_id = 1u64;
        for (rel, content, mtime) in loaded {
            let mut version = FileVersion::new(next_id, rel.clone(), content, "disk-load", None);
            version.timestamp = mtime;
            files.insert(rel, next_id);
            versions.insert(next_id, Arc::new(version));
            next_id += 1;
        }
        debug!(files = files.len(), "persistent VFS ready");

        Ok(Self {
            cfg,
            bus,
            state: Mutex::new(VfsState {
                files,
                versions,
                snapshots: HashMap::new(),
                next_version_id: next_id,
                next_snapshot_id: 1,
            }),
            backend: Some(backend),
        })
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Current content at `path`, or `None` when absent.
    pub fn read(&self, path: &str) -> Result<Option<String>, VfsError> {
        let rel = self.sanitize(path)?;
        let st = self.state.lock().unwrap();
        Ok(st
            .files
            .get(&rel)
            .and_then(|id| st.versions.get(id))
            .map(|v| v.content.clone()))
    }

    /// Create a new immutable version and point `files[path]` at it.
    pub fn write(
        &self,
        path: &str,
        content: &str,
        author: Option<&str>,
    ) -> Result<Arc<FileVersion>, VfsError> {
        let rel = self.sanitize(path)?;
        if content.len() > self.cfg.max_file_size_bytes {
            return Err(VfsError::TooLarge {
                size: content.len(),
                max: self.cfg.max_file_size_bytes,
            });
        }

        let version = {
            let mut st = self.state.lock().unwrap();
            let previous = st.files.get(&rel).copied();
            let id = st.next_version_id;
            let version = Arc::new(FileVersion::new(
                id,
                rel.clone(),
                content,
                author.unwrap_or("system"),
                previous,
            ));

            // Disk first: a failed durable write must not leave the in-memory
            // map pointing at content that never landed.
            if let Some(backend) = &self.backend {
                backend.write_file(&rel, content)?;
                if let Err(e) = backend.write_version(&version) {
                    debug!(error = %e, "version record persist failed");
                }
            }

            st.next_version_id += 1;
            st.versions.insert(id, Arc::clone(&version));
            st.files.insert(rel.clone(), id);
            version
        };

        self.bus.emit(
            EventKind::VfsChange,
            serde_json::json!({
                "op": "write",
                "path": rel,
                "version": version.id,
                "author": version.author,
                "hash": version.hash,
            }),
        );
        Ok(version)
    }

    /// Remove the current mapping for `path`.  Past versions are retained.
    /// Returns `true` when a mapping existed.
    pub fn delete(&self, path: &str, author: Option<&str>) -> Result<bool, VfsError> {
        let rel = self.sanitize(path)?;
        let existed = {
            let mut st = self.state.lock().unwrap();
            let existed = st.files.remove(&rel).is_some();
            if existed {
                if let Some(backend) = &self.backend {
                    backend.remove_file(&rel)?;
                }
            }
            existed
        };
        if existed {
            self.bus.emit(
                EventKind::VfsChange,
                serde_json::json!({
                    "op": "delete",
                    "path": rel,
                    "author": author.unwrap_or("system"),
                }),
            );
        }
        Ok(existed)
    }

    /// Sorted list of currently mapped paths.
    pub fn list(&self) -> Vec<String> {
        let st = self.state.lock().unwrap();
        let mut paths: Vec<String> = st.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn get_version(&self, id: u64) -> Option<Arc<FileVersion>> {
        self.state.lock().unwrap().versions.get(&id).cloned()
    }

    /// Structural diff between two stored versions.
    pub fn diff(&self, a: u64, b: u64) -> Result<serde_json::Value, VfsError> {
        let st = self.state.lock().unwrap();
        let va = st
            .versions
            .get(&a)
            .ok_or_else(|| VfsError::NotFound(format!("version {a}")))?;
        let vb = st
            .versions
            .get(&b)
            .ok_or_else(|| VfsError::NotFound(format!("version {b}")))?;
        Ok(structural_diff(&va.content, &vb.content))
    }

    /// Capture the current path → content map atomically.
    pub fn snapshot(&self, author: Option<&str>) -> Result<u64, VfsError> {
        let snapshot = {
            let mut st = self.state.lock().unwrap();
            let mut files = BTreeMap::new();
            for (path, id) in &st.files {
                if let Some(v) = st.versions.get(id) {
                    files.insert(path.clone(), v.content.clone());
                }
            }
            let id = st.next_snapshot_id;
            let snapshot = Arc::new(Snapshot {
                id,
                timestamp: Utc::now(),
                author: author.unwrap_or("system").to_string(),
                files,
            });
            if let Some(backend) = &self.backend {
                if let Err(e) = backend.write_snapshot(&snapshot) {
                    debug!(error = %e, "snapshot record persist failed");
                }
            }
            st.next_snapshot_id += 1;
            st.snapshots.insert(id, Arc::clone(&snapshot));
            snapshot
        };
        self.bus.emit(
            EventKind::VfsChange,
            serde_json::json!({
                "op": "snapshot",
                "snapshot": snapshot.id,
                "author": snapshot.author,
                "files": snapshot.files.len(),
            }),
        );
        Ok(snapshot.id)
    }

    pub fn get_snapshot(&self, id: u64) -> Option<Arc<Snapshot>> {
        self.state.lock().unwrap().snapshots.get(&id).cloned()
    }

    fn sanitize(&self, path: &str) -> Result<String, VfsError> {
        sanitize_path(path, self.cfg.max_path_len)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
