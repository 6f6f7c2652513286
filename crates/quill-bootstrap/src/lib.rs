// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Engine construction factory.
//!
//! This crate consolidates the wiring concerns: building the event bus,
//! the virtual file system (memory or persistent), and the tool engine
//! with its built-in registry, then handing out controllers that borrow
//! those shared components.  There are no hidden singletons — every
//! consumer receives explicit references from here.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use quill_config::Config;
use quill_core::AgentController;
use quill_events::{EventBus, EventLog, SubscriptionId};
use quill_model::ModelClient;
use quill_tools::{Caller, ToolEngine};
use quill_vfs::Vfs;

/// Initialise process-wide logging with an env-filter override.
///
/// `RUST_LOG` wins when set; `level` is the fallback directive.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// The assembled engine: bus, VFS, and tool engine with built-ins
/// registered and the rate-limiter prune timer running.
pub struct Runtime {
    config: Config,
    pub bus: Arc<EventBus>,
    pub vfs: Arc<Vfs>,
    pub engine: Arc<ToolEngine>,
    event_log: Option<Arc<EventLog>>,
    log_subscription: Option<SubscriptionId>,
}

impl Runtime {
    /// Construct everything in dependency order: bus → VFS → engine.
    ///
    /// With `vfs.workspace_root` configured the VFS scans its on-disk
    /// tree and every bus event is appended to the project's
    /// `history.log`; otherwise the whole runtime is memory-only.
    pub fn init(config: Config) -> anyhow::Result<Self> {
        let bus = Arc::new(EventBus::new(config.events.clone()));

        let (vfs, event_log, log_subscription) = match &config.vfs.workspace_root {
            Some(root) => {
                let vfs = Vfs::open_persistent(config.vfs.clone(), Arc::clone(&bus))
                    .context("opening persistent VFS")?;
                let log_path = root.join(&config.vfs.project_id).join("history.log");
                let log = Arc::new(EventLog::open(log_path).context("opening history.log")?);
                let sub = Arc::clone(&log).install(&bus);
                (vfs, Some(log), Some(sub))
            }
            None => (
                Vfs::new(config.vfs.clone(), Arc::clone(&bus)),
                None,
                None,
            ),
        };
        let vfs = Arc::new(vfs);

        let engine = Arc::new(ToolEngine::new(
            config.tools.clone(),
            Arc::clone(&bus),
            Arc::clone(&vfs),
        ));
        for tool in quill_tools::builtin::all() {
            let id = tool.id().to_string();
            engine
                .register_builtin(tool)
                .map_err(|e| anyhow::anyhow!("registering {id}: {e}"))?;
        }
        engine.start_prune_task();

        Ok(Self {
            config,
            bus,
            vfs,
            engine,
            event_log,
            log_subscription,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path of the persistent event log, when one is attached.
    pub fn event_log_path(&self) -> Option<&std::path::Path> {
        self.event_log.as_deref().map(EventLog::path)
    }

    /// A caller carrying the configured default permission set.
    pub fn default_caller(&self, id: impl Into<String>) -> Caller {
        Caller::from_tokens(id, &self.config.agent.permissions)
    }

    /// Build a controller that borrows the shared bus and engine.
    pub fn controller(&self, model: Arc<dyn ModelClient>, caller: Caller) -> AgentController {
        AgentController::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.engine),
            model,
            self.config.agent.clone(),
            caller,
        )
    }

    /// Stop owned timers and detach the event log.  Safe to call twice;
    /// `Drop` of the engine is the backstop for the prune task.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();
        if let Some(sub) = self.log_subscription.take() {
            self.bus.off(sub);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use quill_events::{EventKind, HistoryFilter};
    use quill_model::ScriptedMockClient;

    use super::*;

    #[tokio::test]
    async fn memory_runtime_runs_a_task_end_to_end() {
        let runtime = Runtime::init(Config::default()).unwrap();
        let model = Arc::new(ScriptedMockClient::tool_then_final(
            "fs.write",
            serde_json::json!({"path": "out.txt", "content": "done"}),
            "wrote it",
        ));
        let caller = Caller::from_tokens("a", &["vfs.read", "vfs.write"]);
        let mut agent = runtime.controller(model, caller);
        let report = agent.run("create out.txt").await;

        assert!(report.ok());
        assert_eq!(runtime.vfs.read("out.txt").unwrap().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn builtins_are_registered() {
        let runtime = Runtime::init(Config::default()).unwrap();
        let ids: Vec<String> = runtime.engine.list().into_iter().map(|d| d.id).collect();
        for expected in [
            "fs.read",
            "fs.write",
            "fs.delete",
            "fs.list",
            "vfs.diff",
            "vfs.snapshot",
            "system.hash",
            "text.uppercase",
            "model.list_installed",
        ] {
            assert!(ids.iter().any(|i| i == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn default_caller_uses_configured_permissions() {
        let runtime = Runtime::init(Config::default()).unwrap();
        let caller = runtime.default_caller("u1");
        assert!(caller.grants(quill_tools::Permission::VfsRead));
        assert!(!caller.grants(quill_tools::Permission::VfsWrite));
    }

    #[tokio::test]
    async fn persistent_runtime_appends_history_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.vfs.workspace_root = Some(dir.path().to_path_buf());
        config.vfs.project_id = "proj".into();

        let mut runtime = Runtime::init(config).unwrap();
        runtime.vfs.write("a.txt", "1", None).unwrap();
        let log_path = runtime.event_log_path().unwrap().to_path_buf();
        runtime.shutdown();

        let events = EventLog::load(&log_path).unwrap();
        assert!(events.iter().any(|e| e.kind == EventKind::VfsChange));
    }

    #[tokio::test]
    async fn shutdown_detaches_the_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.vfs.workspace_root = Some(dir.path().to_path_buf());
        let mut runtime = Runtime::init(config).unwrap();
        let log_path = runtime.event_log_path().unwrap().to_path_buf();
        runtime.shutdown();

        let before = EventLog::load(&log_path).unwrap().len();
        runtime
            .bus
            .emit(EventKind::DebugMetrics, serde_json::json!({}));
        let after = EventLog::load(&log_path).unwrap().len();
        assert_eq!(before, after, "no appends after shutdown");
        // The bus itself still works.
        assert!(runtime.bus.history(HistoryFilter::default()).len() > 0);
    }
}
