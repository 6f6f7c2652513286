// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{ModelClient, ModelError, ModelInput, ModelOutput};

/// Deterministic mock client for tests.  Echoes the prompt back as a final
/// answer.
#[derive(Default)]
pub struct MockClient;

#[async_trait]
impl ModelClient for MockClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, input: ModelInput) -> Result<ModelOutput, ModelError> {
        Ok(ModelOutput::final_text(format!("MOCK: {}", input.prompt)))
    }
}

/// A pre-scripted mock client.  Each call to `generate` pops the next
/// response from the front of the queue.  This lets tests specify exact
/// output sequences — including tool calls and errors — without a real
/// model.
pub struct ScriptedMockClient {
    scripts: Arc<Mutex<Vec<Result<ModelOutput, ModelError>>>>,
    /// The last `ModelInput` seen by this client.
    /// Written on each `generate` call so tests can inspect what was sent.
    pub last_input: Arc<Mutex<Option<ModelInput>>>,
    /// Returned once the script queue is empty.
    fallback: String,
    /// Artificial latency applied before answering.  Used by timeout tests.
    delay: Option<Duration>,
}

impl ScriptedMockClient {
    /// Build a client from an ordered list of responses.
    pub fn new(scripts: Vec<Result<ModelOutput, ModelError>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_input: Arc::new(Mutex::new(None)),
            fallback: "[no more scripts]".to_string(),
            delay: None,
        }
    }

    /// Convenience: client that always answers with the same final text.
    pub fn always_final(text: impl Into<String>) -> Self {
        let mut c = Self::new(Vec::new());
        c.fallback = text.into();
        c
    }

    /// Convenience: a tool request followed by a final answer.
    pub fn tool_then_final(
        tool: impl Into<String>,
        arguments: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Ok(ModelOutput::tool_call(tool, arguments)),
            Ok(ModelOutput::final_text(final_text)),
        ])
    }

    /// Sleep this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn generate(&self, input: ModelInput) -> Result<ModelOutput, ModelError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        *self.last_input.lock().unwrap() = Some(input);
        let next = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed.
                Ok(ModelOutput::final_text(self.fallback.clone()))
            } else {
                scripts.remove(0)
            }
        };
        next
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
