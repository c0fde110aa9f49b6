// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use crate::types::ThreadId;

/// Failures surfaced by the event store and thread manager.
///
/// Storage failures are always fatal to the turn that triggered them; the
/// event log itself is left untouched by a failed append.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("thread already exists: {0}")]
    DuplicateThread(ThreadId),

    #[error("unknown thread: {0}")]
    UnknownThread(ThreadId),

    #[error("no thread in chain for canonical id: {0}")]
    UnknownCanonical(ThreadId),

    #[error("corrupt event payload in thread {thread_id} event {event_id}: {source}")]
    CorruptPayload {
        thread_id: ThreadId,
        event_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage backend failure: {0}")]
    Storage(#[from] rusqlite::Error),
}
