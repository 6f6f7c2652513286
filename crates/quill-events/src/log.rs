// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::warn;

use crate::{Event, EventBus, SubscriptionId};

/// Append-only, line-delimited JSON event log (`history.log`).
///
/// One full [`Event`] record per line.  Best-effort: a failed append is
/// logged and dropped rather than propagated into `emit`.
pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLog {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line.
    pub fn append(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "event not serializable; skipping log append");
                return;
            }
        };
        let mut file = self.file.lock().unwrap();
        if let Err(e) = writeln!(file, "{line}") {
            warn!(error = %e, path = %self.path.display(), "event log append failed");
        }
    }

    /// Subscribe this log to every event on the bus.
    pub fn install(self: Arc<Self>, bus: &EventBus) -> SubscriptionId {
        bus.on(None, move |event| self.append(event))
    }

    /// Read every well-formed event record from a log file.
    ///
    /// Malformed lines are logged and skipped so that a torn final line
    /// (crash mid-append) never prevents startup.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Vec<Event>> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut events = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("reading {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(ev) => events.push(ev),
                Err(e) => {
                    warn!(
                        line = lineno + 1,
                        error = %e,
                        path = %path.display(),
                        "skipping malformed event log line"
                    );
                }
            }
        }
        Ok(events)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
