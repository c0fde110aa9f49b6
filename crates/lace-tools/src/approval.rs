// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
//! Tool approval gate.
//!
//! Static policy (auto-allow / auto-deny lists plus annotation-derived
//! defaults) decides most calls immediately.  Calls that need a human land in
//! a pending-ticket store and block on a oneshot channel until an
//! out-of-core subscriber resolves the ticket or the turn is cancelled.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use lace_config::{ApprovalConfig, DestructiveDefault};

use crate::tool::ToolAnnotations;

/// Immediate verdict of the static policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run without asking
    Allow,
    /// Suspend and wait for an asynchronous ticket resolution
    Ask,
    /// Refuse without asking
    Deny,
}

/// Serializable snapshot of a pending approval, handed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalTicket {
    pub id: Uuid,
    pub tool_name: String,
    pub input: Value,
    pub requested_at: DateTime<Utc>,
}

/// Policy engine plus pending-ticket store.
///
/// Process-wide policy state: concurrent reads are free, the rare resolve
/// takes the pending lock briefly.
pub struct ApprovalGate {
    auto_allow: Vec<Regex>,
    auto_deny: Vec<Regex>,
    default_for_destructive: DestructiveDefault,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
}

impl ApprovalGate {
    pub fn from_config(cfg: &ApprovalConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self {
            auto_allow: compile(&cfg.auto_allow),
            auto_deny: compile(&cfg.auto_deny),
            default_for_destructive: cfg.default_for_destructive,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending_lock(&self) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<bool>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Static decision for one tool call.  Deny wins over allow; the lists
    /// win over annotation defaults.
    pub fn decide(&self, tool_name: &str, annotations: &ToolAnnotations) -> Decision {
        for re in &self.auto_deny {
            if re.is_match(tool_name) {
                return Decision::Deny;
            }
        }
        for re in &self.auto_allow {
            if re.is_match(tool_name) {
                return Decision::Allow;
            }
        }
        if annotations.requires_approval {
            return Decision::Ask;
        }
        if annotations.destructive {
            return match self.default_for_destructive {
                DestructiveDefault::Ask => Decision::Ask,
                DestructiveDefault::Deny => Decision::Deny,
            };
        }
        Decision::Allow
    }

    /// Open an ask ticket.  The returned receiver resolves to the reviewer's
    /// verdict; dropping the sender side (ticket discarded) reads as denial.
    pub fn open_ticket(
        &self,
        tool_name: &str,
        input: &Value,
    ) -> (ApprovalTicket, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let ticket = ApprovalTicket {
            id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            input: input.clone(),
            requested_at: Utc::now(),
        };
        self.pending_lock().insert(ticket.id, tx);
        debug!(ticket = %ticket.id, tool = tool_name, "approval requested");
        (ticket, rx)
    }

    /// Resolve a pending ticket.  Returns `false` when the ticket is unknown
    /// (already resolved, discarded, or never issued).
    pub fn resolve(&self, id: &Uuid, approved: bool) -> bool {
        if let Some(tx) = self.pending_lock().remove(id) {
            let _ = tx.send(approved);
            return true;
        }
        false
    }

    /// Drop a ticket without an answer (turn cancelled).  The waiting side
    /// observes a closed channel.
    pub fn discard(&self, id: &Uuid) {
        self.pending_lock().remove(id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending_lock().len()
    }
}

/// Per-turn memory of granted approvals.
///
/// An identical `(tool, input)` pair asked twice within one turn reuses the
/// first allow instead of re-prompting.
#[derive(Default)]
pub struct TurnApprovals {
    granted: Mutex<HashSet<String>>,
}

impl TurnApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tool_name: &str, input: &Value) -> String {
        format!("{tool_name}\u{0}{input}")
    }

    pub fn remember(&self, tool_name: &str, input: &Value) {
        self.granted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(Self::key(tool_name, input));
    }

    pub fn is_granted(&self, tool_name: &str, input: &Value) -> bool {
        self.granted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&Self::key(tool_name, input))
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
