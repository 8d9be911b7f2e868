//! In-memory sandbox record store with per-session locking.
//!
//! Every session id owns a slot guarded by its own async mutex. The
//! lifecycle manager holds a slot guard for the whole check-then-act
//! sequence of an operation (including the runtime I/O), so operations
//! on the same session are serialized while different sessions proceed
//! independently. The outer table lock is only held to find or insert a
//! slot, never across an await on the runtime.
//!
//! Whole-table passes (listing, the expiry sweep) use
//! [`SandboxStore::try_lock_existing`] and skip slots that are busy, so a
//! long provisioning step in one session never stalls them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::runtime::RuntimeInfo;

/// One live isolated environment bound to a session.
#[derive(Debug, Clone)]
pub struct SandboxRecord {
    pub session_id: String,
    pub container_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub runtime_info: RuntimeInfo,
}

impl SandboxRecord {
    /// A record whose expiry instant has been reached is no longer live.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn summary(&self) -> SandboxSummary {
        SandboxSummary {
            session_id: self.session_id.clone(),
            container_id: self.container_id.clone(),
            status: self.runtime_info.status.clone(),
            runtime_info: self.runtime_info.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Session-facing view of a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxSummary {
    pub session_id: String,
    pub container_id: String,
    pub status: String,
    pub runtime_info: RuntimeInfo,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<Option<SandboxRecord>>>;

/// Exclusive access to one session's record for the lifetime of the guard.
pub type SlotGuard = OwnedMutexGuard<Option<SandboxRecord>>;

#[derive(Default)]
pub struct SandboxStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl SandboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the slot for `session_id`, creating an empty one if needed.
    pub async fn lock(&self, session_id: &str) -> SlotGuard {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Locks the slot for `session_id` only if one exists.
    pub async fn lock_existing(&self, session_id: &str) -> Option<SlotGuard> {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(session_id).cloned()
        }?;
        Some(slot.lock_owned().await)
    }

    /// Locks the slot for `session_id` if it exists and no other operation
    /// currently holds it.
    pub async fn try_lock_existing(&self, session_id: &str) -> Option<SlotGuard> {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(session_id).cloned()
        }?;
        slot.try_lock_owned().ok()
    }

    /// Releases a guard and drops the slot if it is empty and unused.
    pub async fn release(&self, session_id: &str, guard: SlotGuard) {
        let empty = guard.is_none();
        drop(guard);
        if !empty {
            return;
        }

        let mut slots = self.slots.lock().await;
        let unused = slots.get(session_id).is_some_and(|slot| {
            // Waiters hold a clone, so a count of one means only the table sees it
            Arc::strong_count(slot) == 1
                && slot.try_lock().map(|record| record.is_none()).unwrap_or(false)
        });
        if unused {
            slots.remove(session_id);
        }
    }

    /// Snapshot of the session ids that currently have a slot.
    pub async fn session_ids(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut ids: Vec<String> = slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of slots in the table (live records plus in-flight operations).
    #[cfg(test)]
    pub async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}
