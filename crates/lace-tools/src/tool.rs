// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::executor::ExecContext;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model; unique within the turn.
    pub id: String,
    pub name: String,
    /// Parsed JSON input object
    pub input: Value,
}

/// A single content item in a tool's output.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutputPart {
    /// Plain UTF-8 text.
    Text(String),
    /// Reference to an image (URL or data URL).
    ImageRef(String),
    /// Structured JSON data for tools with machine-readable output.
    Structured(Value),
}

/// The raw result of running a tool body.
///
/// A tool reports its own failures through `is_error` with a message in the
/// parts; the executor wraps everything else (unknown tool, bad input,
/// denial, timeout, cancellation) around this.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub parts: Vec<ToolOutputPart>,
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(content: impl Into<String>) -> Self {
        Self { parts: vec![ToolOutputPart::Text(content.into())], is_error: false }
    }

    /// Error result containing a plain-text message.
    pub fn err(msg: impl Into<String>) -> Self {
        Self { parts: vec![ToolOutputPart::Text(msg.into())], is_error: true }
    }

    /// Successful result with arbitrary parts.
    pub fn with_parts(parts: Vec<ToolOutputPart>) -> Self {
        Self { parts, is_error: false }
    }

    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ToolOutputPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Behavioral declarations of a tool, consumed by the approval gate and the
/// dispatch scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolAnnotations {
    /// Never mutates anything observable.
    pub read_only: bool,
    /// May destroy data or state irreversibly.
    pub destructive: bool,
    /// Repeating the call with identical input gives the identical result.
    pub idempotent: bool,
    /// Safe to run concurrently with other parallel-safe calls of the same turn.
    pub parallel_safe: bool,
    /// Always routed through the ask path unless a policy list overrides it.
    pub requires_approval: bool,
}

impl ToolAnnotations {
    /// Common shape for harmless inspection tools.
    pub fn read_only() -> Self {
        Self { read_only: true, idempotent: true, parallel_safe: true, ..Self::default() }
    }

    /// Common shape for irreversible mutation tools.
    pub fn destructive() -> Self {
        Self { destructive: true, ..Self::default() }
    }
}

/// Trait every tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the input object.  Validation is exact: fields not
    /// declared here are rejected.
    fn input_schema(&self) -> Value;
    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations::default()
    }
    /// Per-tool timeout override.  `None` uses the executor default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
    /// Run the tool.  Failures the tool itself detects should be wrapped in
    /// [`ToolOutput::err`], not panicked or returned as transport errors.
    async fn execute(&self, call: &ToolCall, ctx: &ExecContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
