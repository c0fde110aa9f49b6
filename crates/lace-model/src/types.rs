// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Roles and content blocks ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// A typed content block inside a generic message.
///
/// Providers serialize these into their API-specific wire format and must
/// preserve block order and `call_id` pairing in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Reasoning output.  Stored verbatim; adapters that cannot represent it
    /// on the wire drop it when building requests.
    Thinking {
        text: String,
    },
    ToolUse {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        is_error: bool,
        content: Vec<ResultBlock>,
    },
}

/// Content inside a tool-result block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultBlock {
    Text { text: String },
    ImageRef { url: String },
    Structured { data: serde_json::Value },
}

impl ResultBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Plain-text rendering used for wire formats without structured
    /// tool-result content.
    pub fn render(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::ImageRef { url } => url.clone(),
            Self::Structured { data } => data.to_string(),
        }
    }
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// A single message in the generic conversation shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, blocks: vec![ContentBlock::Text { text: text.into() }] }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, blocks: vec![ContentBlock::Text { text: text.into() }] }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, blocks: vec![ContentBlock::Text { text: text.into() }] }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        is_error: bool,
        content: Vec<ResultBlock>,
    ) -> Self {
        Self {
            role: Role::ToolResult,
            blocks: vec![ContentBlock::ToolResult {
                call_id: call_id.into(),
                is_error,
                content,
            }],
        }
    }

    /// Concatenated text of all plain text blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool-use blocks in order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { call_id, name, input } => {
                    Some((call_id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

// ─── Requests and responses ──────────────────────────────────────────────────

/// A tool schema offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the input object
    pub input_schema: serde_json::Value,
}

/// Request sent to a provider adapter.  The system prompt travels as a
/// `Role::System` message; adapters lift it into whatever top-level field
/// their wire format uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// Token usage from one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Why the provider stopped producing output.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Natural end of the assistant turn
    End,
    /// The model wants tool results before continuing
    ToolUse,
    /// Output-token limit reached; trailing content may be truncated
    MaxOutput,
    /// The consumer cancelled the stream
    Cancelled,
    /// The provider reported a terminal error mid-response
    Error(String),
}

/// A fully assembled (non-streaming) provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Assistant message with text / thinking / tool-use blocks in order.
    pub message: Message,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

/// A single normalized event from a provider stream.
///
/// Every adapter yields exactly this shape regardless of backend, so nothing
/// outside the adapter ever sees vendor-specific types.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk of assistant text
    TextDelta(String),
    /// A chunk of reasoning output
    ReasoningDelta(String),
    /// Part of a tool call.  `id`/`name` arrive on the first delta for an
    /// index; `arguments` may be split across many deltas and concatenate to
    /// one JSON document.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Usage counters; may arrive more than once and is cumulative per field
    Usage { input_tokens: u32, output_tokens: u32 },
    /// Terminal event of every well-formed stream
    Finished(StopReason),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::tool_result("c", false, vec![]).role, Role::ToolResult);
    }

    #[test]
    fn text_concatenates_only_text_blocks() {
        let m = Message {
            role: Role::Assistant,
            blocks: vec![
                ContentBlock::Thinking { text: "hidden".into() },
                ContentBlock::Text { text: "a".into() },
                ContentBlock::Text { text: "b".into() },
            ],
        };
        assert_eq!(m.text(), "ab");
    }

    #[test]
    fn tool_uses_preserve_order() {
        let m = Message {
            role: Role::Assistant,
            blocks: vec![
                ContentBlock::ToolUse {
                    call_id: "c1".into(),
                    name: "first".into(),
                    input: serde_json::json!({}),
                },
                ContentBlock::Text { text: "between".into() },
                ContentBlock::ToolUse {
                    call_id: "c2".into(),
                    name: "second".into(),
                    input: serde_json::json!({}),
                },
            ],
        };
        let uses = m.tool_uses();
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].0, "c1");
        assert_eq!(uses[1].0, "c2");
    }

    #[test]
    fn content_block_serde_round_trip() {
        let b = ContentBlock::ToolUse {
            call_id: "c1".into(),
            name: "read_file".into(),
            input: serde_json::json!({"path": "foo.txt"}),
        };
        let json = serde_json::to_string(&b).unwrap();
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::ToolResult).unwrap();
        assert_eq!(json, "\"tool_result\"");
    }

    #[test]
    fn result_block_render_flattens() {
        assert_eq!(ResultBlock::text("x").render(), "x");
        assert_eq!(
            ResultBlock::Structured { data: serde_json::json!({"k": 1}) }.render(),
            "{\"k\":1}"
        );
    }
}
