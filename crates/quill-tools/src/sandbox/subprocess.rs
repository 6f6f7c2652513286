// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use quill_config::ToolsConfig;
use quill_events::{EventBus, EventKind};

use crate::{ErrorCode, ToolError};

/// Interpreter used by an out-of-process tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    /// In-process embedded interpreter (never used for subprocess runs).
    Rhai,
    Python,
}

/// Source text plus language for a subprocess tool, stored at registration.
#[derive(Debug, Clone)]
pub struct SubprocessSpec {
    pub source: String,
    pub language: ScriptLanguage,
}

/// Wrapper program: reads one JSON object from stdin, calls the
/// user-provided `run(args)` entry function, prints exactly one JSON
/// result object to stdout, and exits.
const PYTHON_WRAPPER: &str = r#"import json
import sys

import tool

result = tool.run(json.load(sys.stdin))
sys.stdout.write(json.dumps(result))
"#;

/// Execute a subprocess tool: materialize a temp directory with the user
/// source and the wrapper, run the interpreter under rlimits, enforce the
/// wall-clock budget with a graceful-stop-then-kill sequence, and always
/// clean the temp directory up.
pub(crate) async fn run_subprocess(
    spec: &SubprocessSpec,
    tool_id: &str,
    args: serde_json::Value,
    bus: Arc<EventBus>,
    cfg: &ToolsConfig,
) -> Result<serde_json::Value, ToolError> {
    if spec.language != ScriptLanguage::Python {
        return Err(ToolError::new(
            ErrorCode::RunnerDisabled,
            format!("no subprocess interpreter for {:?}", spec.language),
        ));
    }

    let timeout = Duration::from_millis(cfg.subprocess_timeout_ms);
    let grace = Duration::from_millis(cfg.subprocess_grace_ms);

    // The TempDir guard lives until the end of this function, so the
    // directory is removed on every exit path, including timeouts.
    let dir = tempfile::tempdir().map_err(|e| {
        ToolError::new(ErrorCode::ToolExecutionError, format!("temp dir: {e}"))
    })?;
    std::fs::write(dir.path().join("tool.py"), &spec.source).map_err(|e| {
        ToolError::new(ErrorCode::ToolExecutionError, format!("materialize source: {e}"))
    })?;
    std::fs::write(dir.path().join("main.py"), PYTHON_WRAPPER).map_err(|e| {
        ToolError::new(ErrorCode::ToolExecutionError, format!("materialize wrapper: {e}"))
    })?;

    let mut cmd = Command::new(&cfg.python_bin);
    cmd.arg("main.py")
        .current_dir(dir.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // New session detaches the child from any controlling terminal and
    // makes it a process-group leader, so the stop signal reaches the whole
    // group.  Memory ceilings are best-effort: address space first, then
    // resident set, then data segment.
    #[cfg(unix)]
    {
        let mem = cfg.subprocess_memory_limit_bytes;
        unsafe {
            cmd.pre_exec(move || {
                libc::setsid();
                let limit = libc::rlimit {
                    rlim_cur: mem,
                    rlim_max: mem,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0
                    && libc::setrlimit(libc::RLIMIT_RSS, &limit) != 0
                {
                    let _ = libc::setrlimit(libc::RLIMIT_DATA, &limit);
                }
                Ok(())
            });
        }
    }
    #[cfg(not(unix))]
    bus.emit(
        EventKind::DebugMetrics,
        serde_json::json!({
            "tool": tool_id,
            "note": "subprocess memory limits unsupported on this platform",
        }),
    );

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        ToolError::new(
            ErrorCode::ToolExecutionError,
            format!("spawn {}: {e}", cfg.python_bin),
        )
    })?;
    let pid = child.id();

    bus.emit(
        EventKind::ToolExecution,
        serde_json::json!({
            "tool": tool_id,
            "runner": "subprocess",
            "pid": pid,
        }),
    );

    // Hand the args over and close stdin so the wrapper's json.load returns.
    let args_json = args.to_string();
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(args_json.as_bytes()).await {
            warn!(tool = tool_id, error = %e, "subprocess stdin write failed");
        }
        drop(stdin);
    }

    // Drain stdout/stderr concurrently so a chatty child can never fill a
    // pipe and deadlock against our wait.
    let stdout_task = tokio::spawn(slurp(child.stdout.take()));
    let stderr_task = tokio::spawn(slurp(child.stderr.take()));

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| {
            ToolError::new(ErrorCode::ToolExecutionError, format!("wait: {e}"))
        })?,
        _ = tokio::time::sleep(timeout) => {
            stop_child(&mut child, pid, grace).await;
            let stderr = String::from_utf8_lossy(
                &stderr_task.await.unwrap_or_default(),
            )
            .into_owned();
            return Err(ToolError::new(
                ErrorCode::TimeoutError,
                format!("subprocess exceeded {} ms", timeout.as_millis()),
            )
            .with_details(serde_json::json!({ "stderr": tail(&stderr) })));
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();
    let exit_code = status.code().unwrap_or(-1);

    bus.emit(
        EventKind::ToolExecution,
        serde_json::json!({
            "tool": tool_id,
            "runner": "subprocess",
            "pid": pid,
            "exit_code": exit_code,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        }),
    );
    debug!(tool = tool_id, exit_code, "subprocess finished");

    if exit_code != 0 {
        return Err(ToolError::new(
            ErrorCode::ToolExecutionError,
            format!("subprocess exited with code {exit_code}"),
        )
        .with_details(serde_json::json!({ "stderr": tail(&stderr) })));
    }

    serde_json::from_str(stdout.trim()).map_err(|e| {
        ToolError::new(
            ErrorCode::ToolExecutionError,
            format!("subprocess produced non-JSON output: {e}"),
        )
        .with_details(serde_json::json!({ "stdout": tail(&stdout) }))
    })
}

/// Graceful stop: SIGTERM to the process group, a grace period, then
/// SIGKILL.  The child never outlives its controller.
async fn stop_child(child: &mut tokio::process::Child, pid: Option<u32>, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
        }
        let stopped = tokio::time::timeout(grace, child.wait()).await.is_ok();
        if stopped {
            return;
        }
    }
    #[cfg(not(unix))]
    let _ = (pid, grace);

    if let Err(e) = child.start_kill() {
        warn!(error = %e, "kill after grace period failed");
    }
    let _ = child.wait().await;
}

async fn slurp(reader: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut r) = reader {
        let _ = r.read_to_end(&mut buf).await;
    }
    buf
}

/// Keep the last 2 KB of a stream for error details.
fn tail(s: &str) -> &str {
    let mut start = s.len().saturating_sub(2048);
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use quill_config::EventBusConfig;
    use quill_events::HistoryFilter;

    use super::*;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok()
    }

    fn cfg_with_timeout(timeout_ms: u64) -> ToolsConfig {
        ToolsConfig {
            subprocess_timeout_ms: timeout_ms,
            subprocess_grace_ms: 200,
            ..Default::default()
        }
    }

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(EventBusConfig::default()))
    }

    fn spec(source: &str) -> SubprocessSpec {
        SubprocessSpec {
            source: source.to_string(),
            language: ScriptLanguage::Python,
        }
    }

    #[tokio::test]
    async fn runs_entry_function_and_parses_result() {
        if !python_available() {
            return;
        }
        let out = run_subprocess(
            &spec("def run(args):\n    return {\"sum\": args[\"a\"] + args[\"b\"]}\n"),
            "py.sum",
            serde_json::json!({"a": 4, "b": 5}),
            bus(),
            &cfg_with_timeout(30_000),
        )
        .await
        .unwrap();
        assert_eq!(out["sum"], 9);
    }

    #[tokio::test]
    async fn nonzero_exit_is_execution_error_with_stderr() {
        if !python_available() {
            return;
        }
        let err = run_subprocess(
            &spec("def run(args):\n    raise RuntimeError(\"deliberate\")\n"),
            "py.raise",
            serde_json::json!({}),
            bus(),
            &cfg_with_timeout(30_000),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolExecutionError);
        let stderr = err.details.unwrap()["stderr"].as_str().unwrap().to_string();
        assert!(stderr.contains("deliberate"));
    }

    #[tokio::test]
    async fn sleeping_child_is_killed_at_timeout() {
        if !python_available() {
            return;
        }
        let started = Instant::now();
        let err = run_subprocess(
            &spec("import time\n\ndef run(args):\n    time.sleep(60)\n    return {}\n"),
            "py.sleep",
            serde_json::json!({}),
            bus(),
            &cfg_with_timeout(500),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::TimeoutError);
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "kill happened promptly"
        );
    }

    #[tokio::test]
    async fn execution_events_are_emitted() {
        if !python_available() {
            return;
        }
        let b = bus();
        run_subprocess(
            &spec("def run(args):\n    return 1\n"),
            "py.one",
            serde_json::json!({}),
            Arc::clone(&b),
            &cfg_with_timeout(30_000),
        )
        .await
        .unwrap();
        let events = b.history(HistoryFilter {
            kind: Some(EventKind::ToolExecution),
            ..Default::default()
        });
        assert_eq!(events.len(), 2, "spawn + completion");
        assert!(events[1].payload["exit_code"].is_i64() || events[1].payload["exit_code"].is_u64());
    }

    #[tokio::test]
    async fn non_json_stdout_is_rejected() {
        if !python_available() {
            return;
        }
        // Valid JSON result but extra noise printed first corrupts the
        // single-object protocol.
        let err = run_subprocess(
            &spec("def run(args):\n    print(\"noise\")\n    return {}\n"),
            "py.noise",
            serde_json::json!({}),
            bus(),
            &cfg_with_timeout(30_000),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolExecutionError);
    }

    #[tokio::test]
    async fn rhai_spec_is_runner_disabled() {
        let err = run_subprocess(
            &SubprocessSpec {
                source: "1".into(),
                language: ScriptLanguage::Rhai,
            },
            "bad",
            serde_json::json!({}),
            bus(),
            &cfg_with_timeout(1000),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::RunnerDisabled);
    }
}
