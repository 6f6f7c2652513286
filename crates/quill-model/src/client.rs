// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{stream, Stream};

use crate::{ModelError, ModelInput, ModelOutput};

/// A partial chunk of streamed model output.
///
/// The final chunk carries the resolved [`ModelOutput`] so that a streaming
/// consumer always ends up with the same value a `generate` caller would get.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Incremental text content.
    Content(String),
    /// End of stream with the fully resolved output.
    Done(ModelOutput),
}

pub type OutputStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ModelError>> + Send>>;

/// The model client contract the core depends on.
///
/// Concrete clients (local subprocess model, remote HTTP model) live outside
/// the engine; the core only ever sees this trait.  Clients are expected to
/// perform their own retries for transient failures — see [`crate::RetryingClient`]
/// for the standard decorator.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Human-readable client name for status display and event payloads.
    fn name(&self) -> &str;

    /// Produce one completion for the given input.
    async fn generate(&self, input: ModelInput) -> Result<ModelOutput, ModelError>;

    /// Optional streaming variant.
    ///
    /// The default implementation resolves `generate` into a single
    /// `Content` chunk (when the output is final text) followed by `Done`,
    /// so every client is stream-contract-compatible even without native
    /// streaming support.  The core does not use this, but fan-out
    /// consumers may.
    async fn stream(&self, input: ModelInput) -> Result<OutputStream, ModelError> {
        let output = self.generate(input).await?;
        let mut chunks = Vec::new();
        if let ModelOutput::Final { content, .. } = &output {
            chunks.push(Ok(StreamChunk::Content(content.clone())));
        }
        chunks.push(Ok(StreamChunk::Done(output)));
        Ok(Box::pin(stream::iter(chunks)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
