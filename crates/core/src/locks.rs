//! Instance lock table.
//!
//! Advisory, in-process record of which accounts currently hold an
//! exclusive execution slot and which session holds each one. The table is
//! plain data; the console wraps it in a mutex so check-and-set is atomic
//! across sessions.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::types::{AccountId, SessionId};

/// Reason reported when an account is already occupied.
pub const REASON_IN_USE: &str = "Instance in use";

/// Answer to [`InstanceLocks::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub available: bool,
    pub reason: Option<&'static str>,
}

/// Occupied flags keyed by account, with the owning session.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    occupied: HashMap<AccountId, SessionId>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is free to be acquired.
    pub fn status(&self, id: &AccountId) -> LockStatus {
        if self.occupied.contains_key(id) {
            LockStatus {
                available: false,
                reason: Some(REASON_IN_USE),
            }
        } else {
            LockStatus {
                available: true,
                reason: None,
            }
        }
    }

    /// Mark `id` as occupied by `owner`.
    ///
    /// Re-acquiring a lock the same session already holds is a no-op.
    /// Acquiring a lock held by another session is a conflict.
    pub fn acquire(&mut self, id: &AccountId, owner: SessionId) -> Result<(), CoreError> {
        match self.occupied.get(id) {
            Some(holder) if *holder == owner => Ok(()),
            Some(_) => Err(CoreError::Conflict(format!("{REASON_IN_USE}: {id}"))),
            None => {
                self.occupied.insert(id.clone(), owner);
                Ok(())
            }
        }
    }

    /// Clear the occupied flag for `id`. Never fails.
    ///
    /// Returns whether a lock was actually held.
    pub fn release(&mut self, id: &AccountId) -> bool {
        self.occupied.remove(id).is_some()
    }

    pub fn holder(&self, id: &AccountId) -> Option<SessionId> {
        self.occupied.get(id).copied()
    }

    pub fn held_count(&self) -> usize {
        self.occupied.len()
    }
}
