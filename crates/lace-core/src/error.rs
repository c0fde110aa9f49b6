// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use lace_model::ProviderError;
use lace_store::StoreError;

/// Failures surfaced by the agent turn machinery.
///
/// Tool failures never appear here — they are captured as result events and
/// fed back to the model.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A new message arrived while a turn was running.  Caller-visible and
    /// non-fatal; retry after the current turn finishes.
    #[error("a turn is already in progress")]
    Busy,

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),

    /// The provider stream reported a terminal error or exceeded the
    /// per-turn timeout.
    #[error("provider stream failed: {0}")]
    Stream(String),

    #[error("tool iteration limit ({0}) exceeded")]
    IterationLimit(u32),

    #[error(transparent)]
    Compaction(#[from] CompactError),
}

/// Failures of the thread compaction pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CompactError {
    #[error("thread has no events to compact")]
    EmptyThread,

    #[error("compaction summary was empty")]
    EmptySummary,

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("summary provider failed: {0}")]
    Provider(#[from] ProviderError),
}
