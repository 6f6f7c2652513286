// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Token bucket keyed by `(caller id, tool id)`.
///
/// Each bucket allows `burst` invocations per `window`; the map is
/// self-cleaning — expired buckets are purged on access and by the
/// engine's periodic prune task.
pub(crate) struct RateLimiter {
    window: Duration,
    burst: u32,
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

struct Bucket {
    count: u32,
    /// Epoch milliseconds at which this bucket's window resets.
    reset_time_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl RateLimiter {
    pub(crate) fn new(window: Duration, burst: u32) -> Self {
        Self {
            window,
            burst: burst.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Record one invocation attempt.  `Ok(())` admits the call;
    /// `Err(reset_time_ms)` reports when the caller's window opens again.
    pub(crate) fn check(&self, caller_id: &str, tool_id: &str) -> Result<(), u64> {
        let now = now_ms();
        let window_ms = self.window.as_millis() as u64;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry((caller_id.to_string(), tool_id.to_string()))
            .or_insert(Bucket {
                count: 0,
                reset_time_ms: now + window_ms,
            });
        if now >= bucket.reset_time_ms {
            bucket.count = 0;
            bucket.reset_time_ms = now + window_ms;
        }
        if bucket.count >= self.burst {
            return Err(bucket.reset_time_ms);
        }
        bucket.count += 1;
        Ok(())
    }

    /// Drop every bucket whose window has already reset.
    pub(crate) fn prune(&self) {
        let now = now_ms();
        self.buckets
            .lock()
            .unwrap()
            .retain(|_, b| b.reset_time_ms > now);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
