// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::{ModelClient, ModelError, ModelInput, ModelOutput};

/// Exponential back-off schedule: 200ms → 400ms → 800ms → 1600ms, with
/// ±20% jitter so a herd of callers does not retry in lockstep.
fn backoff(attempt: u32) -> Duration {
    let base_delay_ms = 200u64 * (1u64 << (attempt - 1).min(6));
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}

/// Decorator that retries transient failures with exponential backoff.
///
/// Wrap any concrete client in this to satisfy the contract clause that the
/// client — not the controller — owns retries.  Non-transient errors are
/// returned after the first attempt.
pub struct RetryingClient<C> {
    inner: C,
    max_attempts: u32,
}

impl<C: ModelClient> RetryingClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_attempts: 4,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for RetryingClient<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, input: ModelInput) -> Result<ModelOutput, ModelError> {
        let mut attempt = 1u32;
        loop {
            match self.inner.generate(input.clone()).await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient model error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
