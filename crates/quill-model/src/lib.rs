// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod error;
mod mock;
mod retry;
mod types;

pub use client::{ModelClient, OutputStream, StreamChunk};
pub use error::ModelError;
pub use mock::{MockClient, ScriptedMockClient};
pub use retry::RetryingClient;
pub use types::*;
