//! Process-wide coordination state shared by every operator session.
//!
//! The lock table and the admission queue are the only structures visible
//! across sessions. Each sits behind its own async mutex; the two are never
//! held at the same time.

use std::sync::Arc;

use cobra_core::admission::{Admission, AdmissionConfig, AdmissionQueue};
use cobra_core::clock::{Clock, SystemClock};
use cobra_core::error::CoreError;
use cobra_core::locks::{InstanceLocks, LockStatus};
use cobra_core::types::{AccountId, SessionId, Timestamp};
use tokio::sync::Mutex;

/// What [`CoordinationHub::release_slot`] actually freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotRelease {
    pub lock_released: bool,
    pub queue_removed: bool,
}

impl SlotRelease {
    /// Whether anything was held before the call.
    pub fn freed_anything(&self) -> bool {
        self.lock_released || self.queue_removed
    }
}

/// Shared lock table plus admission queue.
///
/// Designed to be wrapped in `Arc` and handed to every session.
pub struct CoordinationHub {
    locks: Mutex<InstanceLocks>,
    queue: Mutex<AdmissionQueue>,
    clock: Arc<dyn Clock>,
}

impl CoordinationHub {
    pub fn new(config: AdmissionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: Mutex::new(InstanceLocks::new()),
            queue: Mutex::new(AdmissionQueue::new(config)),
            clock,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // -- admission ----------------------------------------------------------

    /// Ask for an execution slot for `account`.
    ///
    /// Locks of admitted accounts purged as stale during this call are
    /// released as well.
    pub async fn admit(&self, account: &AccountId) -> Admission {
        let now = self.now();
        let (admission, purged) = {
            let mut queue = self.queue.lock().await;
            let purged = queue.purge_stale(now);
            (queue.admit(account, now), purged)
        };
        self.release_locks(&purged).await;
        admission
    }

    /// Refresh the queue heartbeat of `account`. Returns `false` if the
    /// account has no queue entry.
    pub async fn heartbeat(&self, account: &AccountId) -> bool {
        let now = self.now();
        self.queue.lock().await.heartbeat(account, now)
    }

    pub async fn is_admitted(&self, account: &AccountId) -> bool {
        self.queue.lock().await.is_admitted(account)
    }

    /// `(admitted, waiting)` counts.
    pub async fn queue_counts(&self) -> (usize, usize) {
        let queue = self.queue.lock().await;
        (queue.admitted_count(), queue.waiting_count())
    }

    // -- locks --------------------------------------------------------------

    pub async fn lock_status(&self, account: &AccountId) -> LockStatus {
        self.locks.lock().await.status(account)
    }

    /// Take the instance lock for `account` on behalf of `owner`.
    ///
    /// Check and set happen under one mutex guard, so two sessions can never
    /// both acquire the same account.
    pub async fn acquire(&self, account: &AccountId, owner: SessionId) -> Result<(), CoreError> {
        self.locks.lock().await.acquire(account, owner)
    }

    pub async fn lock_holder(&self, account: &AccountId) -> Option<SessionId> {
        self.locks.lock().await.holder(account)
    }

    // -- release ------------------------------------------------------------

    /// Release what `owner` holds on `account`: its instance lock and the
    /// account's queue entry.
    ///
    /// When another session holds the lock nothing is touched, since the
    /// queue entry is that session's admitted slot. Never fails and is safe
    /// to call when nothing is held.
    pub async fn release_slot(&self, account: &AccountId, owner: SessionId) -> SlotRelease {
        let lock_released = {
            let mut locks = self.locks.lock().await;
            match locks.holder(account) {
                Some(holder) if holder != owner => {
                    tracing::debug!(account = %account, session = %owner, "Slot held by another session, not released");
                    return SlotRelease::default();
                }
                Some(_) => locks.release(account),
                None => false,
            }
        };
        let queue_removed = self.queue.lock().await.remove(account);
        let release = SlotRelease {
            lock_released,
            queue_removed,
        };
        if release.freed_anything() {
            tracing::info!(account = %account, session = %owner, lock_released, queue_removed, "Released execution slot");
        }
        release
    }

    /// Purge stale queue entries and release the locks of purged admitted
    /// accounts. Returns the purged admitted accounts.
    pub async fn sweep_stale(&self) -> Vec<AccountId> {
        let now = self.now();
        let purged = self.queue.lock().await.purge_stale(now);
        self.release_locks(&purged).await;
        purged
    }

    async fn release_locks(&self, accounts: &[AccountId]) {
        if accounts.is_empty() {
            return;
        }
        let mut locks = self.locks.lock().await;
        for account in accounts {
            if locks.release(account) {
                tracing::warn!(account = %account, "Released lock of abandoned session");
            }
        }
    }
}
