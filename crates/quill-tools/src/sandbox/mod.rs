// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod scripted;
mod static_check;
mod subprocess;

pub(crate) use scripted::run_script;
pub(crate) use static_check::{CheckViolation, StaticCheck};
pub(crate) use subprocess::run_subprocess;

pub use scripted::CompiledScript;
pub use subprocess::{ScriptLanguage, SubprocessSpec};
