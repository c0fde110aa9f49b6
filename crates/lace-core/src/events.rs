// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use lace_store::{ThreadId, ToolOutcome};
use lace_tools::ApprovalTicket;

use crate::budget::BudgetLevel;

/// Observable turn state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    /// A provider request is being prepared or awaited
    Thinking,
    /// Deltas are arriving from the provider
    Streaming,
    /// Tool calls from the last completion are running
    ToolExecution,
    ConversationComplete,
    Errored,
}

/// Events emitted by the agent during a turn.
///
/// Deltas are ephemeral — they are never persisted; the durable record is
/// the event log.  Consumers (UIs, the delegate tool) subscribe per turn.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    StateChanged(AgentState),
    /// A text chunk streamed from the provider
    TextDelta(String),
    /// A reasoning chunk streamed from the provider
    ReasoningDelta(String),
    /// A tool call was persisted and handed to the executor
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    /// A tool call reached a terminal outcome and its result was persisted
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        outcome: ToolOutcome,
        content: String,
    },
    /// A tool call is suspended on human approval
    ApprovalRequested(ApprovalTicket),
    /// The token budget crossed a threshold; compaction happens at the next
    /// turn boundary
    TokenThreshold {
        level: BudgetLevel,
        used_tokens: u32,
        context_window: u32,
    },
    /// The thread was compacted onto a successor
    ContextCompacted {
        source: ThreadId,
        successor: ThreadId,
    },
    /// The turn finished normally with this assistant text
    ResponseComplete(String),
    /// The turn was cancelled; all in-flight work has drained
    TurnAborted,
    /// The turn failed; the agent has returned to idle
    Error(String),
}
