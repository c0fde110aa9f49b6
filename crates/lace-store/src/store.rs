// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::StoreError;
use crate::types::{EventPayload, Thread, ThreadEvent, ThreadId};

/// Append-only persistent log of [`ThreadEvent`]s keyed by thread.
///
/// Two tables: `threads` (metadata + canonical chain) and `events`
/// (per-thread monotonic log).  `(thread_id, id)` is the primary key of
/// `events`; ids are assigned inside the append transaction, which is what
/// makes them contiguous per thread.  The connection runs in WAL mode with
/// `synchronous=FULL` so an append is durable before it returns.
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock();
        // journal_mode reports the resulting mode as a row, so it is read
        // back explicitly instead of going through the batch.  In-memory
        // databases stay on their own journal mode.
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                canonical_id TEXT NOT NULL,
                parent_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                thread_id TEXT NOT NULL,
                id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (thread_id, id),
                FOREIGN KEY (thread_id) REFERENCES threads(id)
            );

            CREATE INDEX IF NOT EXISTS idx_threads_canonical ON threads(canonical_id);
            "#,
        )?;
        Ok(())
    }

    // ── Threads ──────────────────────────────────────────────────────────────

    /// Register a new thread.  Fails with [`StoreError::DuplicateThread`]
    /// when the id is already taken.
    pub fn create_thread(
        &self,
        id: &ThreadId,
        canonical_id: &ThreadId,
        parent_id: Option<&ThreadId>,
    ) -> Result<Thread, StoreError> {
        let now = Utc::now();
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO threads (id, canonical_id, parent_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                canonical_id.as_str(),
                parent_id.map(|p| p.as_str()),
                now,
                now
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::DuplicateThread(id.clone()));
        }
        debug!(thread_id = %id, canonical_id = %canonical_id, "created thread");
        Ok(Thread {
            id: id.clone(),
            canonical_id: canonical_id.clone(),
            parent_id: parent_id.cloned(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_thread(&self, id: &ThreadId) -> Result<Thread, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, canonical_id, parent_id, created_at, updated_at
             FROM threads WHERE id = ?1",
            params![id.as_str()],
            row_to_thread,
        )
        .optional()?
        .ok_or_else(|| StoreError::UnknownThread(id.clone()))
    }

    /// All thread ids sharing a canonical id, oldest first.  The last entry
    /// is the newest link of the compaction chain.
    pub fn find_by_canonical(&self, canonical_id: &ThreadId) -> Result<Vec<ThreadId>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM threads WHERE canonical_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let ids = stmt
            .query_map(params![canonical_id.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids.into_iter().map(ThreadId::from).collect())
    }

    /// Delegate children of a thread, oldest first.
    pub fn find_children(&self, parent_id: &ThreadId) -> Result<Vec<ThreadId>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM threads WHERE parent_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let ids = stmt
            .query_map(params![parent_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids.into_iter().map(ThreadId::from).collect())
    }

    /// Remove a thread and its whole event log.  Compaction never does this;
    /// deletion is an explicit maintenance operation.
    pub fn delete_thread(&self, id: &ThreadId) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events WHERE thread_id = ?1", params![id.as_str()])?;
        let removed = tx.execute("DELETE FROM threads WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;
        if removed == 0 {
            return Err(StoreError::UnknownThread(id.clone()));
        }
        Ok(())
    }

    // ── Events ───────────────────────────────────────────────────────────────

    /// Append one event.  Assigns the next per-thread id and the timestamp
    /// inside a single transaction; the write is durable before return.
    pub fn append(
        &self,
        thread_id: &ThreadId,
        payload: EventPayload,
    ) -> Result<ThreadEvent, StoreError> {
        let payload_json = serde_json::to_string(&payload).map_err(|source| {
            StoreError::CorruptPayload { thread_id: thread_id.clone(), event_id: 0, source }
        })?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let known: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM threads WHERE id = ?1",
                params![thread_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Err(StoreError::UnknownThread(thread_id.clone()));
        }

        let next_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM events WHERE thread_id = ?1",
            params![thread_id.as_str()],
            |row| row.get(0),
        )?;
        let now = Utc::now();
        tx.execute(
            "INSERT INTO events (thread_id, id, timestamp, kind, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                thread_id.as_str(),
                next_id,
                now,
                payload.kind().as_str(),
                payload_json
            ],
        )?;
        tx.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            params![now, thread_id.as_str()],
        )?;
        tx.commit()?;

        Ok(ThreadEvent { thread_id: thread_id.clone(), id: next_id, timestamp: now, payload })
    }

    /// Full ordered scan of a thread's log.
    pub fn events_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<ThreadEvent>, StoreError> {
        self.events_after(thread_id, 0)
    }

    /// Ordered scan starting after `after_id`.  Restartable: a caller that
    /// remembers the last id it saw can resume the scan from there.
    pub fn events_after(
        &self,
        thread_id: &ThreadId,
        after_id: i64,
    ) -> Result<Vec<ThreadEvent>, StoreError> {
        // Unknown threads are an error, an empty log is not.
        let _ = self.get_thread(thread_id)?;

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, payload_json FROM events
             WHERE thread_id = ?1 AND id > ?2 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![thread_id.as_str(), after_id], |row| {
                let id: i64 = row.get(0)?;
                let timestamp: DateTime<Utc> = row.get(1)?;
                let payload_json: String = row.get(2)?;
                Ok((id, timestamp, payload_json))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for (id, timestamp, payload_json) in rows {
            let payload: EventPayload =
                serde_json::from_str(&payload_json).map_err(|source| {
                    StoreError::CorruptPayload {
                        thread_id: thread_id.clone(),
                        event_id: id,
                        source,
                    }
                })?;
            events.push(ThreadEvent { thread_id: thread_id.clone(), id, timestamp, payload });
        }
        Ok(events)
    }

    /// Highest assigned event id, or `None` for an empty log.
    pub fn latest_event_id(&self, thread_id: &ThreadId) -> Result<Option<i64>, StoreError> {
        let conn = self.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(id) FROM events WHERE thread_id = ?1",
            params![thread_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(max)
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    let id: String = row.get(0)?;
    let canonical_id: String = row.get(1)?;
    let parent_id: Option<String> = row.get(2)?;
    let created_at: DateTime<Utc> = row.get(3)?;
    let updated_at: DateTime<Utc> = row.get(4)?;
    Ok(Thread {
        id: id.into(),
        canonical_id: canonical_id.into(),
        parent_id: parent_id.map(ThreadId::from),
        created_at,
        updated_at,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
