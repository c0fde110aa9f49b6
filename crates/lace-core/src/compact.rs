// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::{debug, warn};

use lace_model::{CompletionRequest, Message, Provider};
use lace_store::{EventKind, EventPayload, EventSpan, ThreadEvent, ThreadId, ThreadManager};

use crate::error::CompactError;

const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve all technical details, decisions, file \
     names, tool call ids, and tool outputs that may be relevant to future work. \
     The summary will replace the original history to free up context space.";

/// Summarizes a thread onto a successor that shares its canonical id.
///
/// The designated provider may differ from the conversation's own (typically
/// a cheaper model).  The source thread is never deleted; the chain stays
/// discoverable through the canonical id.
pub struct Compactor {
    provider: Arc<dyn Provider>,
}

impl Compactor {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Compact `thread_id`, carrying the last `carry_tail_turns` user turns
    /// over verbatim.  Returns the successor thread id.
    ///
    /// The successor log starts with a `COMPACTION_MARKER` recording the
    /// summarized span, followed by the latest system prompt (if any) and
    /// the carried tail.
    pub async fn compact(
        &self,
        threads: &ThreadManager,
        thread_id: &ThreadId,
        carry_tail_turns: usize,
    ) -> Result<ThreadId, CompactError> {
        let events = threads.get_or_load(thread_id)?;
        if events.is_empty() {
            return Err(CompactError::EmptyThread);
        }

        let tail_start = tail_split_point(&events, carry_tail_turns);
        let to_summarize = &events[..tail_start];
        if to_summarize.is_empty() {
            // Everything would be carried; summarizing nothing frees nothing.
            // Summarize the whole log instead and carry no tail.
            return self.compact_all(threads, thread_id, &events).await;
        }

        let summary = self.summarize(to_summarize).await?;
        let span = EventSpan {
            first_event_id: to_summarize[0].id,
            last_event_id: to_summarize[to_summarize.len() - 1].id,
        };

        let successor = threads.create_successor(thread_id)?;
        threads.append_event(
            &successor.id,
            EventPayload::CompactionMarker {
                source_thread_id: thread_id.clone(),
                summary,
                span,
            },
        )?;

        // The active persona survives the compaction even when its event
        // falls inside the summarized span.
        if let Some(prompt) = latest_system_prompt(&events[..tail_start]) {
            if !events[tail_start..]
                .iter()
                .any(|e| e.payload.kind() == EventKind::SystemPrompt)
            {
                threads.append_event(&successor.id, prompt)?;
            }
        }

        for event in &events[tail_start..] {
            threads.append_event(&successor.id, event.payload.clone())?;
        }

        debug!(
            source = %thread_id,
            successor = %successor.id,
            summarized = to_summarize.len(),
            carried = events.len() - tail_start,
            "compacted thread"
        );
        Ok(successor.id)
    }

    /// Degenerate path: the whole log is summarized and nothing is carried.
    async fn compact_all(
        &self,
        threads: &ThreadManager,
        thread_id: &ThreadId,
        events: &[ThreadEvent],
    ) -> Result<ThreadId, CompactError> {
        let summary = self.summarize(events).await?;
        let span = EventSpan {
            first_event_id: events[0].id,
            last_event_id: events[events.len() - 1].id,
        };
        let successor = threads.create_successor(thread_id)?;
        threads.append_event(
            &successor.id,
            EventPayload::CompactionMarker {
                source_thread_id: thread_id.clone(),
                summary,
                span,
            },
        )?;
        if let Some(prompt) = latest_system_prompt(events) {
            threads.append_event(&successor.id, prompt)?;
        }
        Ok(successor.id)
    }

    async fn summarize(&self, events: &[ThreadEvent]) -> Result<String, CompactError> {
        let history = serialize_events(events);
        let req = CompletionRequest {
            messages: vec![Message::user(format!("{SUMMARIZE_PROMPT}\n\n---\n\n{history}"))],
            // No tools: the summarizer should write, not act.
            tools: vec![],
        };
        let completion = self.provider.respond(req).await?;
        let summary = completion.message.text();
        if summary.trim().is_empty() {
            warn!("compaction provider returned an empty summary");
            return Err(CompactError::EmptySummary);
        }
        Ok(summary)
    }
}

/// Index where the carried tail begins: the Nth-from-last user message.
///
/// Splitting at a user message keeps every tool-interaction group intact; a
/// defensive scan still walks the split point back over any tool call or
/// result so the carried tail can never open with an orphaned pairing.
fn tail_split_point(events: &[ThreadEvent], carry_tail_turns: usize) -> usize {
    if carry_tail_turns == 0 {
        return events.len();
    }
    let user_indexes: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.payload.kind() == EventKind::UserMessage)
        .map(|(i, _)| i)
        .collect();
    let mut split = if user_indexes.len() > carry_tail_turns {
        user_indexes[user_indexes.len() - carry_tail_turns]
    } else {
        // Fewer turns than the tail size: nothing would be summarized.
        0
    };
    while split > 0
        && matches!(
            events[split].payload.kind(),
            EventKind::ToolResult | EventKind::ToolCall
        )
    {
        split -= 1;
    }
    split
}

/// Most recent system prompt payload within `events`.
fn latest_system_prompt(events: &[ThreadEvent]) -> Option<EventPayload> {
    events
        .iter()
        .rev()
        .find(|e| e.payload.kind() == EventKind::SystemPrompt)
        .map(|e| e.payload.clone())
}

/// Plain-text rendering of a log for the summary prompt.  Call ids are kept
/// so the summary can reference tool interactions precisely.
fn serialize_events(events: &[ThreadEvent]) -> String {
    let mut out = String::new();
    for e in events {
        match &e.payload {
            EventPayload::SystemPrompt { text, .. } => {
                out.push_str(&format!("[system]: {text}\n"));
            }
            EventPayload::UserMessage { text } => {
                out.push_str(&format!("[user]: {text}\n"));
            }
            EventPayload::AgentMessage { text, .. } => {
                if !text.is_empty() {
                    out.push_str(&format!("[assistant]: {text}\n"));
                }
            }
            EventPayload::ToolCall { call_id, tool_name, input } => {
                out.push_str(&format!("[tool call {call_id}] {tool_name}: {input}\n"));
            }
            EventPayload::ToolResult { call_id, outcome, content, .. } => {
                let text = content
                    .iter()
                    .map(|b| b.render())
                    .collect::<Vec<_>>()
                    .join("\n");
                out.push_str(&format!("[tool result {call_id}] {outcome:?}: {text}\n"));
            }
            EventPayload::CompactionMarker { summary, .. } => {
                out.push_str(&format!("[earlier summary]: {summary}\n"));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
