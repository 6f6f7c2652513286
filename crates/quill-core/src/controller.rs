// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use quill_config::AgentConfig;
use quill_events::{EventBus, EventKind};
use quill_model::{ContextMessage, GenerateOptions, ModelClient, ModelInput, ModelOutput, ToolSpec};
use quill_tools::{Caller, ToolEngine};

use crate::context::BoundedContext;
use crate::planner::{Plan, Planner};
use crate::report::{RunReport, TerminationReason};
use crate::AgentError;

const SYSTEM_PROMPT: &str = "You are a coding agent operating inside a workspace. \
     Use the provided tools to inspect and modify files. \
     When the task is complete, answer with the final result instead of another tool call.";

/// What one loop iteration decided.
enum StepOutcome {
    Continue,
    Final(String),
}

/// Mutable bookkeeping for one run.
#[derive(Default)]
struct RunState {
    /// Occurrences of each tool+args signature, accumulated per run.
    signatures: HashMap<String, u32>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

/// Drives a bounded reason-act loop over a model client and the tool
/// engine, with robust termination: step cap, global deadline, per-step
/// deadline, repeated-call detection, failure threshold, and cooperative
/// emergency stop.
///
/// Each controller instance exclusively owns its bounded context and run
/// state; the bus, engine, and model are shared references.
pub struct AgentController {
    bus: Arc<EventBus>,
    engine: Arc<ToolEngine>,
    model: Arc<dyn ModelClient>,
    cfg: AgentConfig,
    caller: Caller,
    context: BoundedContext,
    agent_id: String,
    steps_taken: u32,
}

impl AgentController {
    pub fn new(
        bus: Arc<EventBus>,
        engine: Arc<ToolEngine>,
        model: Arc<dyn ModelClient>,
        cfg: AgentConfig,
        caller: Caller,
    ) -> Self {
        let context = BoundedContext::new(cfg.max_context_tokens, cfg.max_context_messages);
        Self {
            bus,
            engine,
            model,
            cfg,
            caller,
            context,
            agent_id: Uuid::new_v4().to_string(),
            steps_taken: 0,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn context(&self) -> &BoundedContext {
        &self.context
    }

    /// Execute one task to a terminal outcome.
    ///
    /// Emits `AgentStart`, one `AgentStep` per iteration, and exactly one
    /// `AgentFinish` after the last step on every exit path.
    pub async fn run(&mut self, task: &str) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        self.steps_taken = 0;

        self.bus.emit(
            EventKind::AgentStart,
            serde_json::json!({
                "run": run_id,
                "agent": self.agent_id,
                "task": task,
                "caller": self.caller.id,
            }),
        );

        // Emergency-stop handshake: subscribe for the duration of the run,
        // deregister on finish.  The listener only flips a watch channel;
        // the loop's suspension points react to it.
        let (stop_tx, stop_rx) = watch::channel(false);
        let target_id = self.agent_id.clone();
        let subscription = self.bus.on(Some(EventKind::AgentEmergencyStop), move |event| {
            let target = event
                .payload
                .get("agent_id")
                .and_then(|v| v.as_str())
                .unwrap_or("all");
            if target == "all" || target == target_id {
                let _ = stop_tx.send(true);
            }
        });

        let deadline = Duration::from_millis(self.cfg.global_timeout_ms);
        let outcome = tokio::time::timeout(deadline, self.run_loop(task, &run_id, stop_rx)).await;
        self.bus.off(subscription);

        let report = match outcome {
            Ok(report) => report,
            Err(_elapsed) => {
                warn!(run = %run_id, "global deadline fired; aborting run");
                RunReport {
                    run_id: run_id.clone(),
                    reason: TerminationReason::GlobalTimeout,
                    steps: self.steps_taken,
                    answer: None,
                    last_error: Some("timeout_error: global deadline exceeded".to_string()),
                }
            }
        };

        self.bus.emit(
            EventKind::AgentFinish,
            serde_json::json!({
                "run": run_id,
                "agent": self.agent_id,
                "reason": report.reason,
                "steps": report.steps,
                "answer": report.answer,
                "last_error": report.last_error,
            }),
        );
        self.bus.emit(
            EventKind::DebugMetrics,
            serde_json::json!({
                "run": run_id,
                "steps": report.steps,
                "duration_ms": started.elapsed().as_millis() as u64,
            }),
        );
        report
    }

    async fn run_loop(
        &mut self,
        task: &str,
        run_id: &str,
        mut stop_rx: watch::Receiver<bool>,
    ) -> RunReport {
        if self.context.is_empty() {
            self.context.push(ContextMessage::system(SYSTEM_PROMPT));
        }
        self.context.push(ContextMessage::user(task));
        let plan = Planner::plan(task);
        let mut state = RunState::default();

        loop {
            if self.steps_taken >= self.cfg.max_steps {
                self.bus.emit(
                    EventKind::StopCondition,
                    serde_json::json!({
                        "run": run_id,
                        "type": "max_steps",
                        "steps": self.steps_taken,
                    }),
                );
                return self.report(run_id, TerminationReason::MaxSteps, None, &state);
            }
            if *stop_rx.borrow() {
                return self.report(
                    run_id,
                    TerminationReason::EmergencyStop,
                    None,
                    &state,
                );
            }

            self.bus.emit(
                EventKind::AgentStep,
                serde_json::json!({ "run": run_id, "step": self.steps_taken + 1 }),
            );

            let step_result = self
                .execute_step(task, run_id, &plan, &mut state, &mut stop_rx)
                .await;
            // The increment holds on every path out of the step body,
            // including errors — skipping it could loop forever.
            self.steps_taken += 1;

            match step_result {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Final(answer)) => {
                    return self.report(run_id, TerminationReason::FinalAnswer, Some(answer), &state);
                }
                Err(e) => {
                    let reason = match &e {
                        AgentError::Timeout => TerminationReason::GlobalTimeout,
                        AgentError::Loop => TerminationReason::LoopDetected,
                        AgentError::EmergencyStop(_) => TerminationReason::EmergencyStop,
                        AgentError::ConsecutiveFailures(_) => {
                            TerminationReason::ConsecutiveFailures
                        }
                        AgentError::Fatal(_) => TerminationReason::FatalError,
                    };
                    let mut report = self.report(run_id, reason, None, &state);
                    report.last_error = Some(e.to_string());
                    return report;
                }
            }
        }
    }

    async fn execute_step(
        &mut self,
        task: &str,
        run_id: &str,
        plan: &Plan,
        state: &mut RunState,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<StepOutcome, AgentError> {
        // Proactive compression before the model call so a large tool
        // result from the previous step cannot overflow this one.
        if self.context.fraction() >= self.cfg.compaction_threshold {
            let tokens_before = self.context.token_count();
            if let Some(collapsed) = self.context.summarize(self.cfg.summarize_keep_recent) {
                self.bus.emit(
                    EventKind::ContextCompression,
                    serde_json::json!({
                        "run": run_id,
                        "collapsed": collapsed,
                        "tokens_before": tokens_before,
                        "tokens_after": self.context.token_count(),
                    }),
                );
            }
        }

        let hint = plan.hint_for(self.steps_taken as usize);
        let prompt = format!(
            "Task: {task}\n\nPlan hint: {hint}\n\nConversation so far:\n{}",
            self.context.serialize()
        );
        self.bus.emit(
            EventKind::Prompt,
            serde_json::json!({
                "run": run_id,
                "step": self.steps_taken + 1,
                "hint": hint,
                "chars": prompt.len(),
            }),
        );

        let tools: Vec<ToolSpec> = self
            .engine
            .list()
            .into_iter()
            .map(|def| ToolSpec {
                name: def.id,
                description: Some(def.description),
                parameters: def.schema,
            })
            .collect();
        let input = ModelInput {
            prompt,
            context: Vec::new(),
            options: GenerateOptions {
                temperature: self.cfg.temperature,
                max_tokens: self.cfg.max_tokens,
                tools,
            },
        };

        let step_timeout = Duration::from_millis(self.cfg.step_timeout_ms);
        let model = Arc::clone(&self.model);
        let generated = guard(
            async move { model.generate(input).await },
            stop_rx,
            step_timeout,
        )
        .await?;

        match generated {
            Err(model_err) => {
                warn!(run = run_id, error = %model_err, "model call failed");
                self.bus.emit(
                    EventKind::ModelError,
                    serde_json::json!({
                        "run": run_id,
                        "code": model_err.code(),
                        "message": model_err.to_string(),
                    }),
                );
                self.context
                    .push(ContextMessage::assistant(format!("[model error: {model_err}]")));
                state.consecutive_failures += 1;
                state.last_error = Some(format!("model_error: {model_err}"));
                self.check_failures(run_id, state)?;
                Ok(StepOutcome::Continue)
            }
            Ok(ModelOutput::Final { content, .. }) => {
                self.bus.emit(
                    EventKind::ModelResponse,
                    serde_json::json!({
                        "run": run_id,
                        "kind": "final",
                        "chars": content.len(),
                    }),
                );
                if content.trim().is_empty() {
                    // Nothing actionable came back; this counts as a
                    // non-useful step and the loop continues.
                    return Ok(StepOutcome::Continue);
                }
                self.context.push(ContextMessage::assistant(content.clone()));
                Ok(StepOutcome::Final(content))
            }
            Ok(ModelOutput::Tool { tool, arguments, .. }) => {
                self.bus.emit(
                    EventKind::ModelResponse,
                    serde_json::json!({
                        "run": run_id,
                        "kind": "tool",
                        "tool": tool,
                    }),
                );

                let signature = format!("{tool}:{}", canonical_json(&arguments));
                let count = state.signatures.entry(signature).or_insert(0);
                *count += 1;
                if *count > self.cfg.max_identical_tool_calls {
                    self.bus.emit(
                        EventKind::AgentStep,
                        serde_json::json!({
                            "run": run_id,
                            "step": self.steps_taken + 1,
                            "action": "loop_detected",
                            "tool": tool,
                        }),
                    );
                    self.bus.emit(
                        EventKind::StopCondition,
                        serde_json::json!({
                            "run": run_id,
                            "type": "loop_detected",
                            "tool": tool,
                        }),
                    );
                    return Err(AgentError::Loop);
                }

                let engine = Arc::clone(&self.engine);
                let caller = self.caller.clone();
                let invoke_tool = tool.clone();
                let invoke_args = arguments.clone();
                let result = guard(
                    async move { engine.invoke(&invoke_tool, invoke_args, &caller).await },
                    stop_rx,
                    step_timeout,
                )
                .await?;

                let rendered = if result.ok {
                    format!("{tool} succeeded")
                } else {
                    format!(
                        "{tool} failed: {}",
                        result
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_default()
                    )
                };
                debug!(run = run_id, tool = %tool, ok = result.ok, "tool call finished");
                self.context.push(ContextMessage::tool(
                    rendered,
                    serde_json::json!({
                        "tool": tool,
                        "args": arguments,
                        "result": result,
                    }),
                ));

                if result.ok {
                    state.consecutive_failures = 0;
                } else {
                    state.consecutive_failures += 1;
                    state.last_error = result.error.as_ref().map(|e| e.to_string());
                    self.check_failures(run_id, state)?;
                }
                Ok(StepOutcome::Continue)
            }
        }
    }

    fn check_failures(&self, run_id: &str, state: &RunState) -> Result<(), AgentError> {
        if state.consecutive_failures >= self.cfg.max_consecutive_failures {
            self.bus.emit(
                EventKind::StopCondition,
                serde_json::json!({
                    "run": run_id,
                    "type": "consecutive_failures",
                    "count": state.consecutive_failures,
                }),
            );
            return Err(AgentError::ConsecutiveFailures(state.consecutive_failures));
        }
        Ok(())
    }

    fn report(
        &self,
        run_id: &str,
        reason: TerminationReason,
        answer: Option<String>,
        state: &RunState,
    ) -> RunReport {
        RunReport {
            run_id: run_id.to_string(),
            reason,
            steps: self.steps_taken,
            answer,
            last_error: state.last_error.clone(),
        }
    }
}

/// Wrap a suspension point so that the per-step deadline or a raised stop
/// flag resolves the await promptly instead of letting it linger.
async fn guard<T>(
    fut: impl Future<Output = T>,
    stop_rx: &mut watch::Receiver<bool>,
    step_timeout: Duration,
) -> Result<T, AgentError> {
    tokio::select! {
        biased;
        _ = wait_stopped(stop_rx) => Err(AgentError::EmergencyStop("stop flag raised".into())),
        r = tokio::time::timeout(step_timeout, fut) => r.map_err(|_| AgentError::Timeout),
    }
}

async fn wait_stopped(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    loop {
        if rx.changed().await.is_err() {
            // Sender gone: a stop can never arrive; park forever so the
            // select! resolves through the guarded future instead.
            std::future::pending::<()>().await;
        }
        if *rx.borrow() {
            return;
        }
    }
}

/// Canonical serialization for repeated-call signatures: object keys are
/// emitted in sorted order at every level, so semantically identical args
/// always produce the same signature.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        serde_json::Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
