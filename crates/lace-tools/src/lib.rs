// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
pub mod approval;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod tool;

pub use approval::{ApprovalGate, ApprovalTicket, Decision, TurnApprovals};
pub use executor::{ExecContext, ExecErrorKind, ExecOutcome, ExecutionRecord, ToolExecutor};
pub use registry::{ToolRegistry, ToolSchema};
pub use schema::validate_input;
pub use tool::{Tool, ToolAnnotations, ToolCall, ToolOutput, ToolOutputPart};
