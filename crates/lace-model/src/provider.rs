// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::ProviderError;
use crate::types::{
    Completion, CompletionRequest, ContentBlock, Message, Role, StopReason, StreamEvent, Usage,
};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Static capabilities a provider adapter advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCaps {
    pub supports_streaming: bool,
    /// Total context window in tokens
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
}

/// Contract every provider adapter implements.
///
/// The adapter is the only component allowed to hold vendor-specific types;
/// both directions of the wire conversion live behind this trait and yield
/// only the generic message / stream-event shapes.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Adapter name for selection and status display.
    fn name(&self) -> &str;

    /// Model identifier passed opaquely to the backend.
    fn model_name(&self) -> &str;

    fn capabilities(&self) -> ProviderCaps;

    /// Full streamed exchange, yielding normalized events terminated by
    /// [`StreamEvent::Finished`].
    async fn stream(&self, req: CompletionRequest) -> Result<EventStream, ProviderError>;

    /// Non-streaming exchange.  The default implementation drains the
    /// streaming path and assembles the result; adapters with a dedicated
    /// non-streaming endpoint override this.
    async fn respond(&self, req: CompletionRequest) -> Result<Completion, ProviderError> {
        let stream = self.stream(req).await?;
        collect_completion(stream).await
    }
}

/// Drain a normalized event stream into a [`Completion`].
///
/// Blocks are ordered reasoning → text → tool calls (by index), which is the
/// order providers emit them within one assistant turn.
pub async fn collect_completion(mut stream: EventStream) -> Result<Completion, ProviderError> {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut usage = Usage::default();
    let mut stop_reason = StopReason::End;
    // BTreeMap keeps tool calls ordered by their emission index even when a
    // backend interleaves argument chunks for different calls.
    let mut pending: BTreeMap<u32, (String, String, String)> = BTreeMap::new();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta(t) => text.push_str(&t),
            StreamEvent::ReasoningDelta(t) => reasoning.push_str(&t),
            StreamEvent::ToolCallDelta { index, id, name, arguments } => {
                let entry = pending.entry(index).or_default();
                if !id.is_empty() {
                    entry.0 = id;
                }
                if !name.is_empty() {
                    entry.1 = name;
                }
                entry.2.push_str(&arguments);
            }
            StreamEvent::Usage { input_tokens, output_tokens } => {
                usage.input_tokens = usage.input_tokens.max(input_tokens);
                usage.output_tokens = usage.output_tokens.max(output_tokens);
            }
            StreamEvent::Finished(reason) => {
                stop_reason = reason;
                break;
            }
        }
    }

    let mut blocks = Vec::new();
    if !reasoning.is_empty() {
        blocks.push(ContentBlock::Thinking { text: reasoning });
    }
    if !text.is_empty() {
        blocks.push(ContentBlock::Text { text });
    }
    for (_, (id, name, args)) in pending {
        let input: serde_json::Value = if args.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&args).map_err(|e| {
                ProviderError::Semantic(format!("tool call {name} has invalid arguments: {e}"))
            })?
        };
        blocks.push(ContentBlock::ToolUse { call_id: id, name, input });
    }

    Ok(Completion {
        message: Message { role: Role::Assistant, blocks },
        usage,
        stop_reason,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
