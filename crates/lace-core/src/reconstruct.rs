// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
//! Deterministic event-log → conversation reconstruction.
//!
//! The event log is the only durable state; this module turns it back into
//! the generic message list handed to provider adapters.  Given identical
//! event sequences the output is identical — nothing here consults clocks,
//! randomness, or caches.

use lace_model::{ContentBlock, Message, ResultBlock, Role};
use lace_store::{ContentBlock as StoredBlock, EventPayload, ThreadEvent};

/// Convert a thread's ordered events into generic messages.
///
/// An `AGENT_MESSAGE` and the `TOOL_CALL`s persisted directly after it form
/// one assistant message (text first, tool-use blocks in call order), which
/// is how providers expect a tool-calling assistant turn to look.
pub fn messages_from_events(events: &[ThreadEvent]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::new();
    let mut assistant: Option<Message> = None;

    let flush = |assistant: &mut Option<Message>, out: &mut Vec<Message>| {
        if let Some(m) = assistant.take() {
            if !m.blocks.is_empty() {
                out.push(m);
            }
        }
    };

    for event in events {
        match &event.payload {
            EventPayload::SystemPrompt { text, .. } => {
                flush(&mut assistant, &mut out);
                out.push(Message::system(text.clone()));
            }
            EventPayload::UserMessage { text } => {
                flush(&mut assistant, &mut out);
                out.push(Message::user(text.clone()));
            }
            EventPayload::AgentMessage { text, reasoning, .. } => {
                flush(&mut assistant, &mut out);
                let mut blocks = Vec::new();
                if let Some(r) = reasoning {
                    if !r.is_empty() {
                        blocks.push(ContentBlock::Thinking { text: r.clone() });
                    }
                }
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text: text.clone() });
                }
                assistant = Some(Message { role: Role::Assistant, blocks });
            }
            EventPayload::ToolCall { call_id, tool_name, input } => {
                // Belongs to the assistant message persisted just before it.
                let msg = assistant
                    .get_or_insert_with(|| Message { role: Role::Assistant, blocks: vec![] });
                msg.blocks.push(ContentBlock::ToolUse {
                    call_id: call_id.clone(),
                    name: tool_name.clone(),
                    input: input.clone(),
                });
            }
            EventPayload::ToolResult { call_id, outcome, content, .. } => {
                flush(&mut assistant, &mut out);
                out.push(Message::tool_result(
                    call_id.clone(),
                    outcome.is_error(),
                    content.iter().map(stored_to_result_block).collect(),
                ));
            }
            EventPayload::CompactionMarker { summary, .. } => {
                flush(&mut assistant, &mut out);
                out.push(Message::assistant(summary.clone()));
            }
        }
    }
    flush(&mut assistant, &mut out);
    out
}

fn stored_to_result_block(block: &StoredBlock) -> ResultBlock {
    match block {
        StoredBlock::Text { text } => ResultBlock::Text { text: text.clone() },
        StoredBlock::ImageRef { url } => ResultBlock::ImageRef { url: url.clone() },
        StoredBlock::Structured { data } => ResultBlock::Structured { data: data.clone() },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use lace_store::{ThreadId, TokenUsage, ToolOutcome};

    use super::*;

    fn ev(id: i64, payload: EventPayload) -> ThreadEvent {
        ThreadEvent {
            thread_id: ThreadId::from("t"),
            id,
            timestamp: Utc::now(),
            payload,
        }
    }

    fn agent_msg(text: &str) -> EventPayload {
        EventPayload::AgentMessage {
            text: text.into(),
            reasoning: None,
            usage: TokenUsage::default(),
        }
    }

    #[test]
    fn simple_exchange_maps_one_to_one() {
        let events = vec![
            ev(1, EventPayload::SystemPrompt { text: "be terse".into(), role: "system".into() }),
            ev(2, EventPayload::UserMessage { text: "hi".into() }),
            ev(3, agent_msg("hello")),
        ];
        let msgs = messages_from_events(&events);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].text(), "hi");
        assert_eq!(msgs[2].text(), "hello");
    }

    #[test]
    fn tool_calls_merge_into_preceding_assistant_message() {
        let events = vec![
            ev(1, EventPayload::UserMessage { text: "read it".into() }),
            ev(2, agent_msg("")),
            ev(3, EventPayload::ToolCall {
                call_id: "c1".into(),
                tool_name: "read_file".into(),
                input: serde_json::json!({"path": "foo.txt"}),
            }),
            ev(4, EventPayload::ToolResult {
                call_id: "c1".into(),
                outcome: ToolOutcome::Success,
                content: vec![lace_store::ContentBlock::text("XYZ")],
                duration_ms: 3,
            }),
            ev(5, agent_msg("got it")),
        ];
        let msgs = messages_from_events(&events);
        assert_eq!(msgs.len(), 4);
        // user, assistant(tool_use), tool_result, assistant(text)
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].tool_uses().len(), 1);
        assert_eq!(msgs[1].tool_uses()[0].0, "c1");
        assert_eq!(msgs[2].role, Role::ToolResult);
        assert_eq!(msgs[3].text(), "got it");
    }

    #[test]
    fn assistant_text_precedes_its_tool_uses() {
        let events = vec![
            ev(1, agent_msg("let me look")),
            ev(2, EventPayload::ToolCall {
                call_id: "c1".into(),
                tool_name: "list_dir".into(),
                input: serde_json::json!({}),
            }),
        ];
        let msgs = messages_from_events(&events);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0].blocks[0], ContentBlock::Text { .. }));
        assert!(matches!(msgs[0].blocks[1], ContentBlock::ToolUse { .. }));
    }

    #[test]
    fn reasoning_becomes_thinking_block() {
        let events = vec![ev(1, EventPayload::AgentMessage {
            text: "answer".into(),
            reasoning: Some("chain of thought".into()),
            usage: TokenUsage::default(),
        })];
        let msgs = messages_from_events(&events);
        assert!(matches!(&msgs[0].blocks[0], ContentBlock::Thinking { text } if text == "chain of thought"));
        assert!(matches!(&msgs[0].blocks[1], ContentBlock::Text { text } if text == "answer"));
    }

    #[test]
    fn failed_result_sets_error_flag() {
        let events = vec![ev(1, EventPayload::ToolResult {
            call_id: "c1".into(),
            outcome: ToolOutcome::Timeout,
            content: vec![lace_store::ContentBlock::text("timed out")],
            duration_ms: 60_000,
        })];
        let msgs = messages_from_events(&events);
        match &msgs[0].blocks[0] {
            ContentBlock::ToolResult { call_id, is_error, .. } => {
                assert_eq!(call_id, "c1");
                assert!(is_error);
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn compaction_marker_becomes_assistant_summary() {
        let events = vec![
            ev(1, EventPayload::CompactionMarker {
                source_thread_id: ThreadId::from("old"),
                summary: "previously: things happened".into(),
                span: lace_store::EventSpan { first_event_id: 1, last_event_id: 10 },
            }),
            ev(2, EventPayload::UserMessage { text: "continue".into() }),
        ];
        let msgs = messages_from_events(&events);
        assert_eq!(msgs[0].role, Role::Assistant);
        assert!(msgs[0].text().contains("previously"));
    }

    #[test]
    fn empty_assistant_turn_disappears() {
        // An all-empty agent message with no tool calls maps to nothing.
        let events = vec![ev(1, agent_msg(""))];
        assert!(messages_from_events(&events).is_empty());
    }

    #[test]
    fn reconstruction_is_deterministic() {
        let events = vec![
            ev(1, EventPayload::UserMessage { text: "a".into() }),
            ev(2, agent_msg("b")),
            ev(3, EventPayload::UserMessage { text: "c".into() }),
        ];
        let a = messages_from_events(&events);
        let b = messages_from_events(&events);
        assert_eq!(a, b);
    }
}
