// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;

use crate::error::ProviderError;
use crate::provider::{EventStream, Provider, ProviderCaps};
use crate::types::{CompletionRequest, StopReason, StreamEvent};

/// A pre-scripted provider.  Each call to `stream` pops the next response
/// script from the front of the queue, so tests can specify exact normalized
/// event sequences — including tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Script>>>,
    caps: ProviderCaps,
    /// The last request seen by this provider, for request-shape assertions.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Number of `stream`/`respond` calls served so far.
    pub calls: Arc<Mutex<usize>>,
}

enum Script {
    /// Emit these events, then end the stream.
    Events(Vec<StreamEvent>),
    /// Emit these events, then hang until the consumer drops the stream.
    /// Used to exercise cancellation mid-stream.
    Stall(Vec<StreamEvent>),
    /// Fail the request before any event is produced.
    ConnectError(String),
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self::from_scripts(scripts.into_iter().map(Script::Events).collect())
    }

    fn from_scripts(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            caps: ProviderCaps {
                supports_streaming: true,
                context_window: 128_000,
                max_output_tokens: 4_096,
            },
            last_request: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Shrink the advertised context window (for budget / compaction tests).
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.caps.context_window = tokens;
        self
    }

    /// Advertise no streaming support, forcing consumers down the
    /// non-streaming path.  Scripts still feed `respond` through the default
    /// stream collection.
    pub fn without_streaming(mut self) -> Self {
        self.caps.supports_streaming = false;
        self
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            StreamEvent::TextDelta(r),
            StreamEvent::Usage { input_tokens: 5, output_tokens: 1 },
            StreamEvent::Finished(StopReason::End),
        ]])
    }

    /// Convenience: provider that returns one tool call, then a text reply
    /// on the follow-up request.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                StreamEvent::ToolCallDelta {
                    index: 0,
                    id: call_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                StreamEvent::Usage { input_tokens: 8, output_tokens: 2 },
                StreamEvent::Finished(StopReason::ToolUse),
            ],
            vec![
                StreamEvent::TextDelta(final_text.into()),
                StreamEvent::Usage { input_tokens: 12, output_tokens: 2 },
                StreamEvent::Finished(StopReason::End),
            ],
        ])
    }

    /// Queue an ordinary script at the end of the queue.
    pub fn push_script(self, events: Vec<StreamEvent>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Script::Events(events));
        self
    }

    /// Queue a script that emits `events` and then never finishes.
    pub fn push_stalling(self, events: Vec<StreamEvent>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Script::Stall(events));
        self
    }

    /// Queue a script that fails at connect time with a transport error.
    pub fn push_connect_error(self, message: impl Into<String>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Script::ConnectError(message.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }

    fn capabilities(&self) -> ProviderCaps {
        self.caps
    }

    async fn stream(&self, req: CompletionRequest) -> Result<EventStream, ProviderError> {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(req);
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        let script = {
            let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed.
                Script::Events(vec![
                    StreamEvent::TextDelta("[no more scripts]".into()),
                    StreamEvent::Finished(StopReason::End),
                ])
            } else {
                scripts.remove(0)
            }
        };

        match script {
            Script::Events(events) => {
                let wrapped: Vec<Result<StreamEvent, ProviderError>> =
                    events.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(wrapped)))
            }
            Script::Stall(events) => {
                let wrapped: Vec<Result<StreamEvent, ProviderError>> =
                    events.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(wrapped).chain(stream::pending())))
            }
            Script::ConnectError(msg) => Err(ProviderError::Transport(msg)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
