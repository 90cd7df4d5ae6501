//! Per-operator session state.
//!
//! A [`SessionContext`] holds everything one operator session owns: the
//! connected account, the loaded batch, validation progress and the job
//! ticket. Contexts are created on first access and live until removed.

use std::collections::HashMap;
use std::sync::Arc;

use cobra_core::batch::DebtorBatch;
use cobra_core::job::JobTicket;
use cobra_core::types::{AccountId, SessionId, Timestamp};
use cobra_core::validation::{ValidationCursor, ValidationRecords};
use tokio::sync::{Mutex, RwLock};

/// State owned by one operator session.
#[derive(Debug)]
pub struct SessionContext {
    pub id: SessionId,
    pub created_at: Timestamp,
    /// Connected sending account, set by a successful connection check.
    pub account: Option<AccountId>,
    pub batch: Option<DebtorBatch>,
    pub cursor: Option<ValidationCursor>,
    pub records: ValidationRecords,
    pub ticket: JobTicket,
    /// The one instance lock this session holds, if any.
    pub held_lock: Option<AccountId>,
}

impl SessionContext {
    pub fn new(id: SessionId, now: Timestamp) -> Self {
        Self {
            id,
            created_at: now,
            account: None,
            batch: None,
            cursor: None,
            records: ValidationRecords::new(),
            ticket: JobTicket::new(),
            held_lock: None,
        }
    }

    /// Clear batch, validation and job state. The connected account stays.
    ///
    /// Returns the lock the session was holding; the caller must release it
    /// through the coordination hub.
    pub fn reset(&mut self) -> Option<AccountId> {
        self.batch = None;
        self.cursor = None;
        self.records = ValidationRecords::new();
        self.ticket = JobTicket::new();
        self.held_lock.take()
    }

    /// Forget validation progress (used when a different batch is loaded).
    pub fn reset_validation(&mut self) {
        self.cursor = None;
        self.records = ValidationRecords::new();
    }
}

/// Shared handle to one session's state.
pub type SessionHandle = Arc<Mutex<SessionContext>>;

/// All live sessions, keyed by id.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc`.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session `id`, creating it on first access.
    pub async fn get_or_create(&self, id: SessionId, now: Timestamp) -> SessionHandle {
        if let Some(existing) = self.sessions.read().await.get(&id) {
            return Arc::clone(existing);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(SessionContext::new(id, now)))),
        )
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Reset session `id`. Returns the lock it was holding, if any.
    pub async fn reset(&self, id: SessionId) -> Option<AccountId> {
        let handle = self.get(id).await?;
        let mut ctx = handle.lock().await;
        ctx.reset()
    }

    /// Drop session `id` from the store.
    pub async fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
