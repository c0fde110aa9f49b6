// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
mod error;
mod manager;
mod store;
mod types;

pub use error::StoreError;
pub use manager::ThreadManager;
pub use store::EventStore;
pub use types::{
    ContentBlock, EventKind, EventPayload, EventSpan, Thread, ThreadEvent, ThreadId,
    TokenUsage, ToolErrorKind, ToolOutcome,
};
