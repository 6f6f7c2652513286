// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors a model client may return from `generate` / `stream`.
///
/// Transient classes are the ones the retry decorator backs off on;
/// everything else is returned after the first attempt.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server overloaded: {0}")]
    ServerOverloaded(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("model error: {0}")]
    Other(String),
}

impl ModelError {
    /// `true` for error classes worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Network(_) | Self::ServerOverloaded(_)
        )
    }

    /// Stable code string used in event payloads and API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limit_exceeded",
            Self::Network(_) => "network_error",
            Self::ServerOverloaded(_) => "server_overloaded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Protocol(_) => "protocol_error",
            Self::Other(_) => "model_error",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
