// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Identifier of one conversation thread.
///
/// Also used as the canonical identifier: an uncompacted thread is its own
/// canonical id, and every compaction successor inherits the canonical id of
/// its source so external references survive compaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ─── Thread metadata ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    /// Stable across the compaction chain; equals `id` for original threads.
    pub canonical_id: ThreadId,
    /// Set when this thread is a delegate child.
    pub parent_id: Option<ThreadId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// One immutable entry in a thread's event log.
///
/// `id` is assigned by the store: strictly monotonic and contiguous within
/// the owning thread, starting at 1.  Events are never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub thread_id: ThreadId,
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

/// Token usage reported by the provider for one assistant message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Inclusive span of event ids in a source thread, recorded by a
/// compaction marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSpan {
    pub first_event_id: i64,
    pub last_event_id: i64,
}

/// Terminal outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success,
    Error { kind: ToolErrorKind, message: String },
    Denied,
    Timeout,
    Cancelled,
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        !matches!(self, ToolOutcome::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    BadInput,
    Runtime,
}

/// A typed content block inside a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageRef { url: String },
    Structured { data: serde_json::Value },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Plain-text rendering; image refs and structured data are flattened
    /// to their JSON/url form.
    pub fn render(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::ImageRef { url } => url.clone(),
            Self::Structured { data } => data.to_string(),
        }
    }
}

/// Kind-specific payload of a [`ThreadEvent`].
///
/// Persisted as internally-tagged JSON; the tag doubles as the `kind` column
/// so the store can filter without deserializing payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    UserMessage {
        text: String,
    },
    AgentMessage {
        text: String,
        /// Verbatim reasoning-block text when the provider produced one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        usage: TokenUsage,
    },
    ToolCall {
        /// Unique within the turn; pairs this call with its result.
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        outcome: ToolOutcome,
        content: Vec<ContentBlock>,
        duration_ms: u64,
    },
    SystemPrompt {
        text: String,
        role: String,
    },
    CompactionMarker {
        source_thread_id: ThreadId,
        summary: String,
        span: EventSpan,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::UserMessage { .. } => EventKind::UserMessage,
            Self::AgentMessage { .. } => EventKind::AgentMessage,
            Self::ToolCall { .. } => EventKind::ToolCall,
            Self::ToolResult { .. } => EventKind::ToolResult,
            Self::SystemPrompt { .. } => EventKind::SystemPrompt,
            Self::CompactionMarker { .. } => EventKind::CompactionMarker,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    UserMessage,
    AgentMessage,
    ToolCall,
    ToolResult,
    SystemPrompt,
    CompactionMarker,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "USER_MESSAGE",
            Self::AgentMessage => "AGENT_MESSAGE",
            Self::ToolCall => "TOOL_CALL",
            Self::ToolResult => "TOOL_RESULT",
            Self::SystemPrompt => "SYSTEM_PROMPT",
            Self::CompactionMarker => "COMPACTION_MARKER",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
