// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::StoreError;
use crate::store::EventStore;
use crate::types::{EventPayload, Thread, ThreadEvent, ThreadId};

#[derive(Default)]
struct CacheState {
    entries: HashMap<ThreadId, Arc<Vec<ThreadEvent>>>,
    /// Bumped on every invalidation.  A reload that started before the bump
    /// must not insert its result — it may have scanned the pre-append log.
    versions: HashMap<ThreadId, u64>,
}

/// Creates and loads threads, caching reconstructed event lists.
///
/// The cache is purely an O(n)-scan saver: every entry can be rebuilt from
/// the store at any time.  Coherence rule: the entry for a thread is dropped
/// immediately after an append commits, and a reload only installs its
/// result if no invalidation happened while it was scanning, so a rebuilt
/// list always reflects every committed append.
pub struct ThreadManager {
    store: Arc<EventStore>,
    cache: Mutex<CacheState>,
}

impl ThreadManager {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store, cache: Mutex::new(CacheState::default()) }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    fn cache_lock(&self) -> MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Thread creation ──────────────────────────────────────────────────────

    /// Create a fresh root thread; its canonical id is itself.
    pub fn create_thread(&self) -> Result<Thread, StoreError> {
        let id = ThreadId::new();
        self.store.create_thread(&id, &id, None)
    }

    /// Create a delegate child thread linked to `parent`.
    pub fn create_child(&self, parent: &ThreadId) -> Result<Thread, StoreError> {
        // Resolve the parent first so a bogus id fails here, not on append.
        let _ = self.store.get_thread(parent)?;
        let id = ThreadId::new();
        self.store.create_thread(&id, &id, Some(parent))
    }

    /// Create a compaction successor: a new thread sharing the canonical id
    /// of `source` so references through the canonical id survive.
    pub fn create_successor(&self, source: &ThreadId) -> Result<Thread, StoreError> {
        let src = self.store.get_thread(source)?;
        let id = ThreadId::new();
        self.store.create_thread(&id, &src.canonical_id, src.parent_id.as_ref())
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    pub fn thread(&self, id: &ThreadId) -> Result<Thread, StoreError> {
        self.store.get_thread(id)
    }

    /// Newest thread of a compaction chain.
    pub fn resolve_canonical(&self, canonical_id: &ThreadId) -> Result<ThreadId, StoreError> {
        let chain = self.store.find_by_canonical(canonical_id)?;
        chain
            .into_iter()
            .last()
            .ok_or_else(|| StoreError::UnknownCanonical(canonical_id.clone()))
    }

    /// Cached ordered event list for a thread; reconstructs on miss.
    pub fn get_or_load(&self, id: &ThreadId) -> Result<Arc<Vec<ThreadEvent>>, StoreError> {
        let version = {
            let mut state = self.cache_lock();
            if let Some(hit) = state.entries.get(id).cloned() {
                return Ok(hit);
            }
            *state.versions.entry(id.clone()).or_insert(0)
        };

        // Scan outside the cache lock so loading one thread never blocks
        // readers of another.
        let events = Arc::new(self.store.events_for_thread(id)?);
        debug!(thread_id = %id, events = events.len(), "reconstructed thread");

        let mut state = self.cache_lock();
        // An invalidation raced with the scan: this list may predate a
        // committed append, so it must not be installed.  The caller still
        // gets a snapshot that was valid when the scan ran.
        if state.versions.get(id).copied().unwrap_or(0) == version {
            state.entries.insert(id.clone(), Arc::clone(&events));
        }
        Ok(events)
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    /// Append an event through the store, keeping the cache coherent.  The
    /// entry is dropped only once the write has committed; a read rebuilt
    /// after that point is guaranteed to include this event.
    pub fn append_event(
        &self,
        id: &ThreadId,
        payload: EventPayload,
    ) -> Result<ThreadEvent, StoreError> {
        let event = self.store.append(id, payload)?;
        self.invalidate(id);
        Ok(event)
    }

    pub fn invalidate(&self, id: &ThreadId) {
        let mut state = self.cache_lock();
        state.entries.remove(id);
        *state.versions.entry(id.clone()).or_insert(0) += 1;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
