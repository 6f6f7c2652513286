// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quill_config::ToolsConfig;
use quill_events::{EventBus, EventKind};
use quill_vfs::Vfs;

use crate::ratelimit::RateLimiter;
use crate::sandbox::{self, CheckViolation, CompiledScript, ScriptLanguage, StaticCheck, SubprocessSpec};
use crate::tool::{BuiltinTool, Runner, ToolCtx, ToolDefinition};
use crate::{Caller, ErrorCode, Permission, ToolError, ToolResult};

struct RegisteredTool {
    def: ToolDefinition,
    runner: Runner,
    /// Compiled once at registration so invocation never re-parses the schema.
    validator: Option<jsonschema::Validator>,
}

/// Central registry, authorization gate, rate limiter, and dispatcher for
/// every side-effecting operation the agent may call.
pub struct ToolEngine {
    bus: Arc<EventBus>,
    vfs: Arc<Vfs>,
    cfg: Arc<ToolsConfig>,
    tools: Mutex<HashMap<String, Arc<RegisteredTool>>>,
    limiter: RateLimiter,
    static_check: StaticCheck,
    prune_task: Mutex<Option<JoinHandle<()>>>,
}

impl ToolEngine {
    pub fn new(cfg: ToolsConfig, bus: Arc<EventBus>, vfs: Arc<Vfs>) -> Self {
        let limiter = RateLimiter::new(
            Duration::from_millis(cfg.rate_limit_window_ms),
            cfg.rate_limit_burst,
        );
        let static_check = StaticCheck::new(cfg.script_max_source_bytes);
        Self {
            bus,
            vfs,
            cfg: Arc::new(cfg),
            tools: Mutex::new(HashMap::new()),
            limiter,
            static_check,
            prune_task: Mutex::new(None),
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Register a tool with an explicit runner.  Rejects duplicate ids and
    /// uncompilable schemas.
    pub fn register(&self, def: ToolDefinition, runner: Runner) -> Result<(), ToolError> {
        let validator = match &def.schema {
            Some(schema) => Some(jsonschema::validator_for(schema).map_err(|e| {
                ToolError::new(
                    ErrorCode::ValidationError,
                    format!("schema for {} does not compile: {e}", def.id),
                )
            })?),
            None => None,
        };

        let mut tools = self.tools.lock().unwrap();
        if tools.contains_key(&def.id) {
            return Err(ToolError::new(
                ErrorCode::ValidationError,
                format!("tool id {} already registered", def.id),
            ));
        }
        debug!(tool = %def.id, runner = runner.kind(), "tool registered");
        tools.insert(
            def.id.clone(),
            Arc::new(RegisteredTool {
                def,
                runner,
                validator,
            }),
        );
        Ok(())
    }

    pub fn register_builtin(&self, tool: Arc<dyn BuiltinTool>) -> Result<(), ToolError> {
        let def = ToolDefinition::from_builtin(tool.as_ref());
        self.register(def, Runner::Builtin(tool))
    }

    /// Register an untrusted in-process scripted tool.
    ///
    /// The source must pass the static pre-check and compile; scripted
    /// tools always require `tool.run` on top of whatever the definition
    /// declares.
    pub fn register_scripted(
        &self,
        def: ToolDefinition,
        source: &str,
    ) -> Result<(), ToolError> {
        self.precheck_source(&def.id, source)?;
        let script = CompiledScript::compile(source)?;
        let def = def.with_permissions([Permission::ToolRun]);
        self.register(def, Runner::Scripted(script))
    }

    /// Register an untrusted subprocess tool.
    ///
    /// The source-size ceiling still applies; isolation comes from the OS
    /// process boundary.  Subprocess python tools always require
    /// `python.execute`.
    pub fn register_subprocess(
        &self,
        def: ToolDefinition,
        source: &str,
        language: ScriptLanguage,
    ) -> Result<(), ToolError> {
        if source.len() > self.cfg.script_max_source_bytes {
            return Err(ToolError::new(
                ErrorCode::ValidationError,
                format!(
                    "source is {} bytes, limit is {}",
                    source.len(),
                    self.cfg.script_max_source_bytes
                ),
            ));
        }
        let def = def.with_permissions([Permission::PythonExecute]);
        self.register(
            def,
            Runner::Subprocess(SubprocessSpec {
                source: source.to_string(),
                language,
            }),
        )
    }

    fn precheck_source(&self, tool_id: &str, source: &str) -> Result<(), ToolError> {
        match self.static_check.check(source) {
            Ok(()) => Ok(()),
            Err(CheckViolation::TooLarge { size, max }) => Err(ToolError::new(
                ErrorCode::ValidationError,
                format!("source is {size} bytes, limit is {max}"),
            )),
            Err(violation @ CheckViolation::Forbidden { .. }) => {
                self.bus.emit(
                    EventKind::Security,
                    serde_json::json!({
                        "type": "forbidden_api_access",
                        "tool": tool_id,
                        "violation": violation.to_string(),
                    }),
                );
                Err(ToolError::new(
                    ErrorCode::ForbiddenApiAccess,
                    violation.to_string(),
                ))
            }
        }
    }

    /// Definitions of every registered tool, sorted by id.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.lock().unwrap();
        let mut defs: Vec<ToolDefinition> = tools.values().map(|t| t.def.clone()).collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    // ── Invocation ────────────────────────────────────────────────────────────

    /// Invoke a tool on behalf of `caller`.
    ///
    /// Always returns a structured [`ToolResult`]; a runner can never crash
    /// the caller.  Pipeline: lookup → rate limit → permissions → schema →
    /// dispatch.
    pub async fn invoke(&self, tool_id: &str, args: Value, caller: &Caller) -> ToolResult {
        // 1. Lookup
        let tool = match self.tools.lock().unwrap().get(tool_id) {
            Some(t) => Arc::clone(t),
            None => {
                return ToolResult::err(ToolError::new(
                    ErrorCode::ToolNotFound,
                    format!("unknown tool: {tool_id}"),
                ));
            }
        };

        // 2. Rate limit
        if let Err(reset_time_ms) = self.limiter.check(&caller.id, tool_id) {
            warn!(tool = tool_id, caller = %caller.id, "rate limit exceeded");
            self.bus.emit(
                EventKind::Security,
                serde_json::json!({
                    "type": "rate_limit_exceeded",
                    "caller": caller.id,
                    "tool": tool_id,
                    "reset_time_ms": reset_time_ms,
                }),
            );
            return ToolResult::err(
                ToolError::new(
                    ErrorCode::RateLimitExceeded,
                    format!("rate limit exceeded for {tool_id}"),
                )
                .with_details(serde_json::json!({ "reset_time_ms": reset_time_ms })),
            );
        }

        // 3. Permission check
        let missing = caller.missing(&tool.def.required_permissions);
        if !missing.is_empty() {
            let missing_tokens: Vec<&str> = missing.iter().map(|p| p.token()).collect();
            warn!(tool = tool_id, caller = %caller.id, ?missing_tokens, "permission denied");
            self.bus.emit(
                EventKind::Security,
                serde_json::json!({
                    "type": "permission_denied",
                    "caller": caller.id,
                    "tool": tool_id,
                    "missing": missing_tokens,
                }),
            );
            return ToolResult::err(
                ToolError::new(
                    ErrorCode::InsufficientPermissions,
                    format!("caller {} lacks permissions for {tool_id}", caller.id),
                )
                .with_details(serde_json::json!({ "missing": missing_tokens })),
            );
        }

        // 4. Schema validation
        if let Some(validator) = &tool.validator {
            let errors: Vec<String> = validator.iter_errors(&args).map(|e| e.to_string()).collect();
            if !errors.is_empty() {
                self.bus.emit(
                    EventKind::ToolError,
                    serde_json::json!({
                        "tool": tool_id,
                        "caller": caller.id,
                        "error": { "code": "validation_failed", "errors": errors },
                    }),
                );
                return ToolResult::err(
                    ToolError::new(
                        ErrorCode::ValidationFailed,
                        format!("arguments for {tool_id} do not match its schema"),
                    )
                    .with_details(serde_json::json!({ "errors": errors })),
                );
            }
        }

        // 5. Dispatch
        self.bus.emit(
            EventKind::ToolInvocation,
            serde_json::json!({
                "tool": tool_id,
                "caller": caller.id,
                "args": args,
            }),
        );

        let ctx = ToolCtx {
            bus: Arc::clone(&self.bus),
            vfs: Arc::clone(&self.vfs),
            cfg: Arc::clone(&self.cfg),
            caller: caller.clone(),
        };

        // The runner executes inside its own task so a panic is contained
        // and reported as a structured error.
        let task = {
            let tool = Arc::clone(&tool);
            let args = args.clone();
            let bus = Arc::clone(&self.bus);
            let cfg = Arc::clone(&self.cfg);
            let id = tool_id.to_string();
            tokio::spawn(async move {
                match &tool.runner {
                    Runner::Builtin(t) => t.execute(&args, &ctx).await,
                    Runner::Scripted(script) => {
                        sandbox::run_script(
                            script,
                            &id,
                            args,
                            bus,
                            Duration::from_millis(cfg.script_timeout_ms),
                        )
                        .await
                    }
                    Runner::Subprocess(spec) => {
                        sandbox::run_subprocess(spec, &id, args, bus, &cfg).await
                    }
                }
            })
        };
        let outcome = match task.await {
            Ok(r) => r,
            Err(e) => Err(ToolError::new(
                ErrorCode::ToolExecutionError,
                format!("tool execution panicked: {e}"),
            )),
        };

        match outcome {
            Ok(data) => {
                self.bus.emit(
                    EventKind::ToolResult,
                    serde_json::json!({
                        "tool": tool_id,
                        "caller": caller.id,
                        "ok": true,
                    }),
                );
                ToolResult::ok(data)
            }
            Err(error) => {
                self.bus.emit(
                    EventKind::ToolError,
                    serde_json::json!({
                        "tool": tool_id,
                        "caller": caller.id,
                        "error": serde_json::to_value(&error).unwrap_or(Value::Null),
                    }),
                );
                ToolResult::err(error)
            }
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Start the periodic rate-limiter prune task.  The task holds only a
    /// weak reference, so dropping the engine also ends the timer.
    pub fn start_prune_task(self: &Arc<Self>) {
        let mut guard = self.prune_task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = Duration::from_millis(self.cfg.rate_limit_prune_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match weak.upgrade() {
                    Some(engine) => engine.limiter.prune(),
                    None => break,
                }
            }
        });
        *guard = Some(handle);
    }

    /// Cancel owned timers.  Called at teardown; `Drop` is the backstop.
    pub fn shutdown(&self) {
        if let Some(handle) = self.prune_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for ToolEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use quill_config::{EventBusConfig, VfsConfig};
    use quill_events::HistoryFilter;

    use super::*;

    struct EchoTool;

    #[async_trait]
    impl BuiltinTool for EchoTool {
        fn id(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its arguments back"
        }
        fn schema(&self) -> Option<Value> {
            Some(serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
                "additionalProperties": false,
            }))
        }
        fn required_permissions(&self) -> Vec<Permission> {
            vec![Permission::VfsRead]
        }
        async fn execute(&self, args: &Value, _ctx: &ToolCtx) -> Result<Value, ToolError> {
            Ok(serde_json::json!({ "echo": args["text"] }))
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl BuiltinTool for PanickyTool {
        fn id(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        async fn execute(&self, _args: &Value, _ctx: &ToolCtx) -> Result<Value, ToolError> {
            panic!("runner bug");
        }
    }

    fn engine() -> (Arc<EventBus>, ToolEngine) {
        engine_with(ToolsConfig::default())
    }

    fn engine_with(cfg: ToolsConfig) -> (Arc<EventBus>, ToolEngine) {
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        let vfs = Arc::new(Vfs::new(VfsConfig::default(), Arc::clone(&bus)));
        let engine = ToolEngine::new(cfg, Arc::clone(&bus), vfs);
        (bus, engine)
    }

    fn caller(perms: &[&str]) -> Caller {
        Caller::from_tokens("a", perms)
    }

    fn security_events(bus: &EventBus) -> Vec<quill_events::Event> {
        bus.history(HistoryFilter {
            kind: Some(EventKind::Security),
            ..Default::default()
        })
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn register_then_list_contains_tool() {
        let (_bus, engine) = engine();
        engine.register_builtin(Arc::new(EchoTool)).unwrap();
        let defs = engine.list();
        assert!(defs.iter().any(|d| d.id == "echo"));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (_bus, engine) = engine();
        engine.register_builtin(Arc::new(EchoTool)).unwrap();
        let err = engine.register_builtin(Arc::new(EchoTool)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(engine.list().len(), 1);
    }

    #[tokio::test]
    async fn scripted_registration_compiles_and_adds_tool_run() {
        let (_bus, engine) = engine();
        engine
            .register_scripted(ToolDefinition::new("calc.double", "doubles n"), "args.n * 2")
            .unwrap();
        let def = engine.list().into_iter().find(|d| d.id == "calc.double").unwrap();
        assert!(def.required_permissions.contains(&Permission::ToolRun));
    }

    #[tokio::test]
    async fn forbidden_source_fails_registration_with_security_event() {
        let (bus, engine) = engine();
        let err = engine
            .register_scripted(ToolDefinition::new("bad", "evil"), "eval(args.code)")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenApiAccess);
        let sec = security_events(&bus);
        assert_eq!(sec.len(), 1);
        assert_eq!(sec[0].payload["type"], "forbidden_api_access");
        assert!(engine.list().is_empty());
    }

    #[tokio::test]
    async fn oversized_scripted_source_is_rejected() {
        let (bus, engine) = engine_with(ToolsConfig {
            script_max_source_bytes: 16,
            ..Default::default()
        });
        let err = engine
            .register_scripted(
                ToolDefinition::new("big", "too big"),
                "args.a + args.b + args.c",
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(security_events(&bus).is_empty(), "size is not a security event");
    }

    // ── Invocation pipeline ───────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_tool_is_tool_not_found() {
        let (_bus, engine) = engine();
        let r = engine
            .invoke("nope", serde_json::json!({}), &caller(&["vfs.read"]))
            .await;
        assert_eq!(r.code(), Some(ErrorCode::ToolNotFound));
    }

    #[tokio::test]
    async fn missing_permission_is_denied_with_event() {
        let (bus, engine) = engine();
        engine.register_builtin(Arc::new(EchoTool)).unwrap();
        let r = engine
            .invoke("echo", serde_json::json!({"text": "x"}), &caller(&[]))
            .await;
        assert_eq!(r.code(), Some(ErrorCode::InsufficientPermissions));
        assert_eq!(
            r.error.unwrap().details.unwrap()["missing"],
            serde_json::json!(["vfs.read"])
        );
        let sec = security_events(&bus);
        assert_eq!(sec[0].payload["type"], "permission_denied");
    }

    #[tokio::test]
    async fn schema_violation_is_validation_failed() {
        let (bus, engine) = engine();
        engine.register_builtin(Arc::new(EchoTool)).unwrap();
        let r = engine
            .invoke("echo", serde_json::json!({"wrong": 1}), &caller(&["vfs.read"]))
            .await;
        assert_eq!(r.code(), Some(ErrorCode::ValidationFailed));
        let errors = bus.history(HistoryFilter {
            kind: Some(EventKind::ToolError),
            ..Default::default()
        });
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn successful_invoke_emits_invocation_then_result() {
        let (bus, engine) = engine();
        engine.register_builtin(Arc::new(EchoTool)).unwrap();
        let r = engine
            .invoke("echo", serde_json::json!({"text": "hi"}), &caller(&["vfs.read"]))
            .await;
        assert!(r.ok);
        assert_eq!(r.data.unwrap()["echo"], "hi");

        let inv = bus.history(HistoryFilter {
            kind: Some(EventKind::ToolInvocation),
            ..Default::default()
        });
        let res = bus.history(HistoryFilter {
            kind: Some(EventKind::ToolResult),
            ..Default::default()
        });
        assert_eq!(inv.len(), 1);
        assert_eq!(res.len(), 1);
        assert!(inv[0].seq < res[0].seq, "invocation precedes result");
    }

    #[tokio::test]
    async fn rate_limit_kicks_in_after_burst() {
        let (bus, engine) = engine_with(ToolsConfig {
            rate_limit_burst: 2,
            rate_limit_window_ms: 60_000,
            ..Default::default()
        });
        engine.register_builtin(Arc::new(EchoTool)).unwrap();
        let c = caller(&["vfs.read"]);
        for _ in 0..2 {
            let r = engine.invoke("echo", serde_json::json!({"text": "x"}), &c).await;
            assert!(r.ok);
        }
        let r = engine.invoke("echo", serde_json::json!({"text": "x"}), &c).await;
        assert_eq!(r.code(), Some(ErrorCode::RateLimitExceeded));
        assert!(r.error.unwrap().details.unwrap()["reset_time_ms"].is_u64());
        let sec = security_events(&bus);
        assert_eq!(sec.last().unwrap().payload["type"], "rate_limit_exceeded");
    }

    #[tokio::test]
    async fn panicking_runner_is_contained() {
        let (bus, engine) = engine();
        engine.register_builtin(Arc::new(PanickyTool)).unwrap();
        let r = engine.invoke("panic", serde_json::json!({}), &caller(&[])).await;
        assert_eq!(r.code(), Some(ErrorCode::ToolExecutionError));
        let errors = bus.history(HistoryFilter {
            kind: Some(EventKind::ToolError),
            ..Default::default()
        });
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn scripted_tool_invokes_end_to_end() {
        let (_bus, engine) = engine();
        engine
            .register_scripted(ToolDefinition::new("calc.double", "doubles n"), "args.n * 2")
            .unwrap();
        let r = engine
            .invoke(
                "calc.double",
                serde_json::json!({"n": 8}),
                &caller(&["tool.run"]),
            )
            .await;
        assert!(r.ok, "{:?}", r.error);
        assert_eq!(r.data.unwrap(), serde_json::json!(16));
    }

    #[tokio::test]
    async fn pure_builtin_is_deterministic() {
        let (_bus, engine) = engine();
        engine.register_builtin(Arc::new(EchoTool)).unwrap();
        let c = caller(&["vfs.read"]);
        let a = engine.invoke("echo", serde_json::json!({"text": "same"}), &c).await;
        let b = engine.invoke("echo", serde_json::json!({"text": "same"}), &c).await;
        assert_eq!(a.data, b.data);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn prune_task_starts_once_and_shuts_down() {
        let (_bus, engine) = engine();
        let engine = Arc::new(engine);
        engine.start_prune_task();
        engine.start_prune_task(); // idempotent
        assert!(engine.prune_task.lock().unwrap().is_some());
        engine.shutdown();
        assert!(engine.prune_task.lock().unwrap().is_none());
    }
}
