//! Debtor batches and the capacity limits applied to them.
//!
//! Capacity checks run synchronously before any lock or queue slot is
//! taken, so a rejected batch never leaves side effects behind.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::phone;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of rows accepted in one batch.
pub const MAX_RECORDS: usize = 500;

/// Maximum number of distinct client codes accepted in one batch.
pub const MAX_CLIENTS: usize = 100;

/// Maximum number of reachable numbers a single job may target.
pub const MAX_MESSAGES: usize = 500;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One debtor row as uploaded by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtorRow {
    /// Client code (first digits of the tax id); several rows may share one.
    pub client_code: String,
    pub name: String,
    /// Open amount, kept verbatim as typed in the sheet.
    pub amount: String,
    /// Due date, kept verbatim as typed in the sheet.
    pub due_date: String,
    pub phone: String,
}

/// A named batch of debtor rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtorBatch {
    /// Identifies the upload; a new name resets validation progress.
    pub name: String,
    pub rows: Vec<DebtorRow>,
}

/// Counts derived while checking a batch against the capacity limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub rows: usize,
    pub distinct_clients: usize,
}

impl DebtorBatch {
    /// Check the batch against [`MAX_RECORDS`] and [`MAX_CLIENTS`].
    pub fn check_capacity(&self) -> Result<BatchSummary, CoreError> {
        if self.rows.is_empty() {
            return Err(CoreError::Validation(format!(
                "Batch \"{}\" has no rows",
                self.name
            )));
        }
        if self.rows.len() > MAX_RECORDS {
            return Err(CoreError::Capacity(format!(
                "Batch has {} rows, the limit is {MAX_RECORDS}",
                self.rows.len()
            )));
        }

        let distinct_clients = self
            .rows
            .iter()
            .map(|r| r.client_code.as_str())
            .collect::<HashSet<_>>()
            .len();
        if distinct_clients > MAX_CLIENTS {
            return Err(CoreError::Capacity(format!(
                "Batch has {distinct_clients} distinct clients, the limit is {MAX_CLIENTS}"
            )));
        }

        Ok(BatchSummary {
            rows: self.rows.len(),
            distinct_clients,
        })
    }

    /// Raw phone cells of the batch, cleaned and deduplicated.
    ///
    /// First-seen order is preserved so validation progress is stable
    /// across re-invocations. Blank cells are dropped.
    pub fn phone_list(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .map(|r| phone::clean_cell(&r.phone))
            .filter(|p| !p.is_empty())
            .filter(|p| seen.insert(p.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
