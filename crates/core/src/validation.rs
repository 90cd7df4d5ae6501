//! Resumable, chunked validation of phone numbers against the registry.
//!
//! [`BatchValidator::step`] processes at most one chunk of a
//! [`ValidationCursor`] per call and hands control back to the caller, so a
//! long list is validated across many short invocations. Results land in
//! [`ValidationRecords`], a memo that is never overwritten: a number that
//! already has a record is not queried again, which makes an interrupted run
//! safe to resume from the persisted index.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::error::CoreError;
use crate::phone;
use crate::types::AccountId;

/// Numbers processed per [`BatchValidator::step`] call.
pub const VALIDATION_CHUNK: usize = 5;

/// Default timeout for a single registry lookup.
pub const REGISTRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between two registry lookups inside a chunk.
pub const QUERY_SPACING: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Registry seam
// ---------------------------------------------------------------------------

/// External directory that knows which numbers have a WhatsApp account.
pub trait PhoneRegistry: Send + Sync {
    /// Whether `number` (already normalized) is reachable from `account`.
    fn is_registered(
        &self,
        account: &AccountId,
        number: &str,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Records & cursor
// ---------------------------------------------------------------------------

/// Registry verdict for one normalized number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRecord {
    pub reachable: bool,
}

/// Memo of registry verdicts keyed by normalized number.
#[derive(Debug, Clone, Default)]
pub struct ValidationRecords {
    by_number: HashMap<String, ValidationRecord>,
}

impl ValidationRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, normalized: &str) -> Option<&ValidationRecord> {
        self.by_number.get(normalized)
    }

    pub fn contains(&self, normalized: &str) -> bool {
        self.by_number.contains_key(normalized)
    }

    /// Record a verdict unless one already exists. Returns whether it was
    /// inserted.
    pub fn insert(&mut self, normalized: String, record: ValidationRecord) -> bool {
        if self.by_number.contains_key(&normalized) {
            return false;
        }
        self.by_number.insert(normalized, record);
        true
    }

    /// Whether a raw batch cell is known to be reachable.
    ///
    /// Unknown numbers count as unreachable.
    pub fn is_reachable(&self, raw: &str) -> bool {
        let key = phone::record_key(raw);
        self.by_number.get(&key).is_some_and(|r| r.reachable)
    }

    pub fn reachable_count(&self) -> usize {
        self.by_number.values().filter(|r| r.reachable).count()
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

/// Progress through a deduplicated list of raw numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationCursor {
    source: Vec<String>,
    next_index: usize,
    done: bool,
}

impl ValidationCursor {
    /// Start a cursor over `numbers`. Exact duplicates are dropped, keeping
    /// the first occurrence.
    pub fn new(numbers: Vec<String>) -> Self {
        let mut source: Vec<String> = Vec::with_capacity(numbers.len());
        for n in numbers {
            if !source.contains(&n) {
                source.push(n);
            }
        }
        let done = source.is_empty();
        Self {
            source,
            next_index: 0,
            done,
        }
    }

    pub fn source(&self) -> &[String] {
        &self.source
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Share of the source list already processed, `0..=100`.
    pub fn progress_percent(&self) -> u8 {
        if self.source.is_empty() {
            return 100;
        }
        ((self.next_index * 100) / self.source.len()).min(100) as u8
    }

    fn advance(&mut self, to: usize) {
        self.next_index = self.next_index.max(to.min(self.source.len()));
        self.done = self.next_index >= self.source.len();
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Summary of one [`BatchValidator::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    /// Raw numbers looked at in this chunk.
    pub examined: usize,
    /// Registry lookups actually issued.
    pub queried: usize,
    pub progress_percent: u8,
    pub done: bool,
}

/// Drives a [`ValidationCursor`] one chunk at a time.
#[derive(Debug, Clone, Copy)]
pub struct BatchValidator {
    pub chunk_size: usize,
    pub query_timeout: Duration,
    pub query_spacing: Duration,
}

impl Default for BatchValidator {
    fn default() -> Self {
        Self {
            chunk_size: VALIDATION_CHUNK,
            query_timeout: REGISTRY_TIMEOUT,
            query_spacing: QUERY_SPACING,
        }
    }
}

impl BatchValidator {
    /// Validate the next chunk of `cursor`, recording verdicts in `records`.
    ///
    /// Never fails: a registry error or timeout records the number as
    /// unreachable. Calling this on a finished cursor is a no-op.
    pub async fn step<R: PhoneRegistry>(
        &self,
        cursor: &mut ValidationCursor,
        records: &mut ValidationRecords,
        registry: &R,
        account: &AccountId,
    ) -> StepReport {
        let start = cursor.next_index;
        let end = (start + self.chunk_size.max(1)).min(cursor.source.len());
        let mut queried = 0;

        for raw in &cursor.source[start..end] {
            let key = phone::record_key(raw);
            if key.is_empty() || records.contains(&key) {
                continue;
            }

            if queried > 0 && !self.query_spacing.is_zero() {
                tokio::time::sleep(self.query_spacing).await;
            }
            queried += 1;

            let reachable = match tokio::time::timeout(
                self.query_timeout,
                registry.is_registered(account, &key),
            )
            .await
            {
                Ok(Ok(exists)) => exists,
                Ok(Err(e)) => {
                    tracing::warn!(account = %account, number = %key, error = %e, "Registry lookup failed, treating number as unreachable");
                    false
                }
                Err(_) => {
                    tracing::warn!(account = %account, number = %key, "Registry lookup timed out, treating number as unreachable");
                    false
                }
            };
            records.insert(key, ValidationRecord { reachable });
        }

        cursor.advance(end);

        tracing::debug!(
            account = %account,
            examined = end - start,
            queried,
            next_index = cursor.next_index,
            total = cursor.source.len(),
            "Validation step complete",
        );

        StepReport {
            examined: end - start,
            queried,
            progress_percent: cursor.progress_percent(),
            done: cursor.done,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
