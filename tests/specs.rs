// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios for the assembled engine: one controller driving
//! the scripted mock model against the real bus, tool engine, and VFS.

use std::sync::Arc;
use std::time::{Duration, Instant};

use quill_bootstrap::Runtime;
use quill_config::Config;
use quill_core::TerminationReason;
use quill_events::{EventKind, HistoryFilter};
use quill_model::{ModelOutput, ScriptedMockClient};
use quill_tools::{Caller, ErrorCode, ToolDefinition};

fn runtime() -> Runtime {
    Runtime::init(Config::default()).unwrap()
}

fn caller(runtime: &Runtime, perms: &[&str]) -> Caller {
    let _ = runtime;
    Caller::from_tokens("a", perms)
}

// ── Scenario 1: happy path, final answer ─────────────────────────────────────

#[tokio::test]
async fn happy_path_final_answer() {
    let rt = runtime();
    let model = Arc::new(ScriptedMockClient::new(vec![Ok(ModelOutput::final_text(
        "Hi.",
    ))]));
    let mut agent = rt.controller(model, caller(&rt, &["vfs.read"]));
    let report = agent.run("hello").await;

    assert_eq!(report.reason, TerminationReason::FinalAnswer);
    let api = report.api_response();
    assert_eq!(api["ok"], true);
    assert_eq!(api["value"]["answer"], "Hi.");
    assert_eq!(api["value"]["ok"], true);

    let events = rt.bus.history(HistoryFilter::default());
    let pos = |kind: EventKind| events.iter().position(|e| e.kind == kind).unwrap();
    assert!(pos(EventKind::AgentStart) < pos(EventKind::AgentStep));
    assert!(pos(EventKind::AgentStep) < pos(EventKind::ModelResponse));
    assert!(pos(EventKind::ModelResponse) < pos(EventKind::AgentFinish));
    assert_eq!(
        events
            .iter()
            .find(|e| e.kind == EventKind::AgentFinish)
            .unwrap()
            .payload["answer"],
        "Hi."
    );
}

// ── Scenario 2: tool call completes ──────────────────────────────────────────

#[tokio::test]
async fn tool_call_writes_file_between_steps() {
    let rt = runtime();
    let model = Arc::new(ScriptedMockClient::tool_then_final(
        "fs.write",
        serde_json::json!({"path": "foo.txt", "content": "x"}),
        "done",
    ));
    let mut agent = rt.controller(model, caller(&rt, &["vfs.read", "vfs.write"]));
    let report = agent.run("create foo").await;

    assert_eq!(report.reason, TerminationReason::FinalAnswer);
    assert_eq!(rt.vfs.read("foo.txt").unwrap().as_deref(), Some("x"));

    let events = rt.bus.history(HistoryFilter::default());
    let step = |n: u64| {
        events
            .iter()
            .position(|e| e.kind == EventKind::AgentStep && e.payload["step"] == n)
            .unwrap()
    };
    let change = events
        .iter()
        .position(|e| e.kind == EventKind::VfsChange && e.payload["path"] == "foo.txt")
        .unwrap();
    assert!(step(1) < change && change < step(2));
}

// ── Scenario 3: permission denied ────────────────────────────────────────────

#[tokio::test]
async fn permission_denied_emits_security_and_continues() {
    let rt = runtime();
    let model = Arc::new(ScriptedMockClient::tool_then_final(
        "fs.write",
        serde_json::json!({"path": "foo.txt", "content": "x"}),
        "could not write",
    ));
    let mut agent = rt.controller(model, caller(&rt, &["vfs.read"]));
    let report = agent.run("create foo").await;

    // The denial is step-local; the model's follow-up decides the outcome.
    assert_eq!(report.reason, TerminationReason::FinalAnswer);
    assert!(rt.vfs.read("foo.txt").unwrap().is_none());

    let security = rt.bus.history(HistoryFilter {
        kind: Some(EventKind::Security),
        ..Default::default()
    });
    assert_eq!(security.len(), 1);
    assert_eq!(security[0].payload["type"], "permission_denied");
    assert_eq!(security[0].payload["missing"], serde_json::json!(["vfs.write"]));
}

#[tokio::test]
async fn direct_invoke_reports_missing_permissions() {
    let rt = runtime();
    let result = rt
        .engine
        .invoke(
            "fs.write",
            serde_json::json!({"path": "foo.txt", "content": "x"}),
            &caller(&rt, &["vfs.read"]),
        )
        .await;
    assert!(!result.ok);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::InsufficientPermissions);
    assert_eq!(error.details.unwrap()["missing"], serde_json::json!(["vfs.write"]));
}

// ── Scenario 4: loop detected ────────────────────────────────────────────────

#[tokio::test]
async fn fourth_identical_tool_call_terminates_run() {
    let rt = runtime();
    let repeat = || {
        Ok(ModelOutput::tool_call(
            "text.uppercase",
            serde_json::json!({"text": "same"}),
        ))
    };
    let model = Arc::new(ScriptedMockClient::new(vec![
        repeat(),
        repeat(),
        repeat(),
        repeat(),
    ]));
    let mut agent = rt.controller(model, caller(&rt, &[]));
    let report = agent.run("shout").await;

    assert_eq!(report.reason, TerminationReason::LoopDetected);
    assert!(report.last_error.unwrap().contains("agent_loop_error"));

    // First three invocations produced normal results; the fourth never
    // reached the engine.
    let results = rt.bus.history(HistoryFilter {
        kind: Some(EventKind::ToolResult),
        ..Default::default()
    });
    assert_eq!(results.len(), 3);
    let flagged = rt
        .bus
        .history(HistoryFilter {
            kind: Some(EventKind::AgentStep),
            ..Default::default()
        })
        .into_iter()
        .filter(|e| e.payload["action"] == "loop_detected")
        .count();
    assert_eq!(flagged, 1);
}

// ── Scenario 5: global timeout ───────────────────────────────────────────────

#[tokio::test]
async fn global_timeout_rejects_promptly() {
    let mut config = Config::default();
    config.agent.global_timeout_ms = 100;
    let rt = Runtime::init(config).unwrap();
    let model = Arc::new(
        ScriptedMockClient::new(vec![Ok(ModelOutput::final_text("too late"))])
            .with_delay(Duration::from_millis(500)),
    );
    let mut agent = rt.controller(model, caller(&rt, &[]));

    let started = Instant::now();
    let report = agent.run("slow").await;
    assert_eq!(report.reason, TerminationReason::GlobalTimeout);
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "rejected within budget, took {:?}",
        started.elapsed()
    );

    let finish = rt
        .bus
        .history(HistoryFilter {
            kind: Some(EventKind::AgentFinish),
            ..Default::default()
        })
        .pop()
        .unwrap();
    assert!(!finish.payload["last_error"].is_null());
    assert_eq!(report.api_response()["error"]["code"], "timeout_error");
}

// ── Scenario 6: path traversal blocked ───────────────────────────────────────

#[tokio::test]
async fn path_traversal_is_blocked_at_every_surface() {
    let rt = runtime();

    for bad in ["../etc/passwd", "%2e%2e%2fetc"] {
        let err = rt.vfs.write(bad, "x", None).unwrap_err();
        assert_eq!(err.code(), "path_traversal", "{bad} must be rejected");
    }
    assert!(rt.vfs.list().is_empty(), "files unchanged");

    // The same rejection surfaces through the tool engine.
    let result = rt
        .engine
        .invoke(
            "fs.write",
            serde_json::json!({"path": "../etc/passwd", "content": "x"}),
            &caller(&rt, &["vfs.write"]),
        )
        .await;
    assert_eq!(result.error.unwrap().code, ErrorCode::PathTraversal);

    // A normal nested path still works.
    rt.vfs.write("src/main.ts", "ok", None).unwrap();
    assert_eq!(rt.vfs.read("src/main.ts").unwrap().as_deref(), Some("ok"));
}

// ── Boundary behaviors ───────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_write_reports_size_detail() {
    let mut config = Config::default();
    config.vfs.max_file_size_bytes = 4;
    let rt = Runtime::init(config).unwrap();
    let err = rt.vfs.write("big.txt", "12345", None).unwrap_err();
    assert_eq!(err.code(), "vfs_error");
    assert!(err.to_string().contains("5 bytes"));
    assert!(rt.vfs.read("big.txt").unwrap().is_none());
}

#[tokio::test]
async fn register_list_and_double_register() {
    let rt = runtime();
    rt.engine
        .register_scripted(
            ToolDefinition::new("demo.add", "adds two numbers"),
            "args.a + args.b",
        )
        .unwrap();
    assert!(rt.engine.list().iter().any(|d| d.id == "demo.add"));

    let err = rt
        .engine
        .register_scripted(
            ToolDefinition::new("demo.add", "adds two numbers"),
            "args.a + args.b",
        )
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);
}

#[tokio::test]
async fn scripted_tool_runs_through_the_engine() {
    let rt = runtime();
    rt.engine
        .register_scripted(
            ToolDefinition::new("demo.add", "adds two numbers"),
            "args.a + args.b",
        )
        .unwrap();
    let result = rt
        .engine
        .invoke(
            "demo.add",
            serde_json::json!({"a": 20, "b": 22}),
            &caller(&rt, &["tool.run"]),
        )
        .await;
    assert!(result.ok, "{:?}", result.error);
    assert_eq!(result.data.unwrap(), serde_json::json!(42));
}

#[tokio::test]
async fn snapshot_survives_later_mutations() {
    let rt = runtime();
    rt.vfs.write("a.txt", "original", None).unwrap();
    let snap = rt.vfs.snapshot(Some("spec")).unwrap();
    rt.vfs.write("a.txt", "mutated", None).unwrap();
    rt.vfs.delete("a.txt", None).unwrap();

    let snapshot = rt.vfs.get_snapshot(snap).unwrap();
    assert_eq!(snapshot.files["a.txt"], "original");
}

#[tokio::test]
async fn pure_builtins_are_deterministic_through_invoke() {
    let rt = runtime();
    let c = caller(&rt, &[]);
    let a = rt
        .engine
        .invoke("system.hash", serde_json::json!({"text": "abc"}), &c)
        .await;
    let b = rt
        .engine
        .invoke("system.hash", serde_json::json!({"text": "abc"}), &c)
        .await;
    assert_eq!(a.data, b.data);

    let upper = rt
        .engine
        .invoke("text.uppercase", serde_json::json!({"text": "abc"}), &c)
        .await;
    assert_eq!(upper.data.unwrap()["text"], "ABC");
}

#[tokio::test]
async fn event_history_stays_bounded_with_increasing_ids() {
    let mut config = Config::default();
    config.events.max_history = 16;
    let rt = Runtime::init(config).unwrap();

    for i in 0..100 {
        rt.bus
            .emit(EventKind::DebugMetrics, serde_json::json!({ "i": i }));
    }
    let events = rt.bus.history(HistoryFilter::default());
    assert!(events.len() <= 16);
    for pair in events.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
        assert!(pair[0].id < pair[1].id);
        assert!(pair[0].timestamp_ms <= pair[1].timestamp_ms);
    }
}
