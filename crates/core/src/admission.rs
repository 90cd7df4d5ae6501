//! Bounded-concurrency admission queue.
//!
//! At most [`AdmissionConfig::max_concurrent`] accounts are admitted at a
//! time. Everyone else waits, ranked by arrival. Every entry carries a
//! last-seen heartbeat; entries whose heartbeat is older than the timeout
//! are purged before any decision, which is how crashed or closed clients
//! give their slot back.
//!
//! Waiting entries keep their original arrival time when they refresh their
//! heartbeat, so keep-alives never cost a waiter its place in line.

use std::collections::HashMap;

use crate::types::{AccountId, Timestamp};

/// Maximum number of accounts processing at the same time.
pub const MAX_CONCURRENT: usize = 3;

/// Seconds without a heartbeat after which an entry is abandoned.
pub const QUEUE_TIMEOUT_SECS: i64 = 300;

/// Tunable limits for an [`AdmissionQueue`].
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    pub max_concurrent: usize,
    pub timeout: chrono::Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT,
            timeout: chrono::Duration::seconds(QUEUE_TIMEOUT_SECS),
        }
    }
}

/// Outcome of an [`AdmissionQueue::admit`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// 1-based rank among waiting entries; `None` once admitted.
    pub position: Option<usize>,
    /// Admitted plus waiting entries after this call. May be zero.
    pub queue_size: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
struct WaitingEntry {
    id: AccountId,
    arrived_at: Timestamp,
    last_seen: Timestamp,
}

/// Admitted slots plus an arrival-ordered waiting line.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    config: AdmissionConfig,
    /// Admitted accounts and their last heartbeat.
    admitted: HashMap<AccountId, Timestamp>,
    /// Waiting accounts in arrival order.
    waiting: Vec<WaitingEntry>,
}

impl AdmissionQueue {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            admitted: HashMap::new(),
            waiting: Vec::new(),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Ask for (or keep) an admitted slot for `id`.
    ///
    /// Purges stale entries first. An admitted account just refreshes its
    /// heartbeat. Otherwise the account joins (or stays in) the waiting line
    /// and is admitted when its rank fits into the free slots.
    pub fn admit(&mut self, id: &AccountId, now: Timestamp) -> Admission {
        self.purge_stale(now);

        if let Some(last_seen) = self.admitted.get_mut(id) {
            *last_seen = now;
            return Admission {
                allowed: true,
                position: None,
                queue_size: self.len(),
                message: "Processing".to_string(),
            };
        }

        let index = match self.waiting.iter().position(|w| &w.id == id) {
            Some(index) => {
                self.waiting[index].last_seen = now;
                index
            }
            None => {
                self.waiting.push(WaitingEntry {
                    id: id.clone(),
                    arrived_at: now,
                    last_seen: now,
                });
                self.waiting.len() - 1
            }
        };

        let rank = index + 1;
        let free = self.config.max_concurrent.saturating_sub(self.admitted.len());
        if rank <= free {
            let entry = self.waiting.remove(index);
            tracing::debug!(
                account = %entry.id,
                waited_secs = (now - entry.arrived_at).num_seconds(),
                "Account admitted",
            );
            self.admitted.insert(entry.id, now);
            return Admission {
                allowed: true,
                position: None,
                queue_size: self.len(),
                message: "Entered the queue".to_string(),
            };
        }

        Admission {
            allowed: false,
            position: Some(rank),
            queue_size: self.len(),
            message: format!("Queue full. Your position: {rank}"),
        }
    }

    /// Refresh the heartbeat of an existing entry without changing its
    /// admission state. Returns `false` if `id` is not queued.
    pub fn heartbeat(&mut self, id: &AccountId, now: Timestamp) -> bool {
        if let Some(last_seen) = self.admitted.get_mut(id) {
            *last_seen = now;
            return true;
        }
        if let Some(entry) = self.waiting.iter_mut().find(|w| &w.id == id) {
            entry.last_seen = now;
            return true;
        }
        false
    }

    /// Remove `id` from the queue, admitted or waiting. Never fails.
    pub fn remove(&mut self, id: &AccountId) -> bool {
        let was_admitted = self.admitted.remove(id).is_some();
        let before = self.waiting.len();
        self.waiting.retain(|w| &w.id != id);
        was_admitted || self.waiting.len() != before
    }

    /// Drop every entry whose heartbeat age is at least the timeout.
    ///
    /// Returns the admitted accounts that were purged so their holders can
    /// release any lock still attached to them.
    pub fn purge_stale(&mut self, now: Timestamp) -> Vec<AccountId> {
        let timeout = self.config.timeout;
        let mut purged: Vec<AccountId> = self
            .admitted
            .iter()
            .filter(|(_, last_seen)| now - **last_seen >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        purged.sort();
        for id in &purged {
            self.admitted.remove(id);
        }
        self.waiting.retain(|w| now - w.last_seen < timeout);

        if !purged.is_empty() {
            tracing::info!(count = purged.len(), "Purged abandoned admission slots");
        }
        purged
    }

    pub fn is_admitted(&self, id: &AccountId) -> bool {
        self.admitted.contains_key(id)
    }

    /// 1-based waiting rank of `id`, if it is waiting.
    pub fn position(&self, id: &AccountId) -> Option<usize> {
        self.waiting.iter().position(|w| &w.id == id).map(|i| i + 1)
    }

    pub fn admitted_count(&self) -> usize {
        self.admitted.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn len(&self) -> usize {
        self.admitted.len() + self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
