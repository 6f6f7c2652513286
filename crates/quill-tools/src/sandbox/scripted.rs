// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::Dynamic;
use serde_json::Value;
use tracing::debug;

use quill_events::{EventBus, EventKind};

use crate::{ErrorCode, ToolError};

/// Hard ceilings for one scripted evaluation, independent of the wall-clock
/// deadline.  They bound memory growth inside the interpreter itself.
const MAX_OPERATIONS: u64 = 1_000_000;
const MAX_CALL_LEVELS: usize = 32;
const MAX_STRING_SIZE: usize = 1024 * 1024;
const MAX_ARRAY_SIZE: usize = 16 * 1024;
const MAX_MAP_SIZE: usize = 16 * 1024;

/// A scripted tool compiled once at registration.
///
/// The interpreter exposes no host filesystem, process, network, or module
/// loader; the only inbound surface is the `args` value and the only
/// outbound surface is the narrow `emit` shim plus the returned value.
#[derive(Clone)]
pub struct CompiledScript {
    ast: rhai::AST,
}

impl CompiledScript {
    /// Compile source text.  A parse failure rejects registration.
    pub(crate) fn compile(source: &str) -> Result<Self, ToolError> {
        let engine = sandbox_engine();
        let ast = engine.compile(source).map_err(|e| {
            ToolError::new(
                ErrorCode::ValidationError,
                format!("script does not compile: {e}"),
            )
        })?;
        Ok(Self { ast })
    }
}

/// Build an engine restricted to pure in-memory evaluation.
fn sandbox_engine() -> rhai::Engine {
    let mut engine = rhai::Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_array_size(MAX_ARRAY_SIZE);
    engine.set_max_map_size(MAX_MAP_SIZE);
    // No modules may be resolved, statically or at runtime.
    engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());
    engine
}

/// Execute a compiled script with `args` in scope.
///
/// Runs on the blocking pool; the wall-clock deadline is enforced between
/// interpreter operations via the progress hook, so even a compute-heavy
/// script cannot overrun `timeout` by more than one operation.
pub(crate) async fn run_script(
    script: &CompiledScript,
    tool_id: &str,
    args: serde_json::Value,
    bus: Arc<EventBus>,
    timeout: Duration,
) -> Result<Value, ToolError> {
    let ast = script.ast.clone();
    let tool = tool_id.to_string();
    let started = Instant::now();

    let result = tokio::task::spawn_blocking(move || {
        let mut engine = sandbox_engine();

        let deadline = Instant::now() + timeout;
        engine.on_progress(move |_ops| {
            if Instant::now() >= deadline {
                Some(Dynamic::from("deadline"))
            } else {
                None
            }
        });

        // Narrow event-emit shim: the only side channel a script gets.
        let shim_bus = Arc::clone(&bus);
        let shim_tool = tool.clone();
        engine.register_fn("emit", move |payload: Dynamic| {
            let value = rhai::serde::from_dynamic::<serde_json::Value>(&payload)
                .unwrap_or(serde_json::Value::Null);
            shim_bus.emit(
                EventKind::ToolExecution,
                serde_json::json!({
                    "tool": shim_tool,
                    "runner": "scripted-inprocess",
                    "script_event": value,
                }),
            );
        });

        let mut scope = rhai::Scope::new();
        let args_dynamic = rhai::serde::to_dynamic(&args)
            .unwrap_or_else(|_| Dynamic::UNIT);
        scope.push_dynamic("args", args_dynamic);

        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| match *e {
                // Both the wall-clock deadline and the operation budget are
                // resource exhaustion, reported with the same stable code.
                rhai::EvalAltResult::ErrorTerminated(..)
                | rhai::EvalAltResult::ErrorTooManyOperations(..) => ToolError::new(
                    ErrorCode::TimeoutError,
                    format!("script exceeded its execution budget ({} ms)", timeout.as_millis()),
                ),
                ref other => ToolError::new(
                    ErrorCode::ToolExecutionError,
                    format!("script failed: {other}"),
                ),
            })
    })
    .await
    .map_err(|e| {
        ToolError::new(ErrorCode::ToolExecutionError, format!("script panicked: {e}"))
    })??;

    debug!(
        tool = tool_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "script evaluation finished"
    );

    // Round-trip through serde enforces JSON-serializability of the result;
    // anything the interpreter cannot express as JSON becomes a summary.
    let value = rhai::serde::from_dynamic::<serde_json::Value>(&result).unwrap_or_else(|_| {
        serde_json::json!({
            "unserializable": result.type_name(),
        })
    });
    Ok(value)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
