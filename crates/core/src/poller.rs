//! Single-step polling of the result store for a dispatched job.
//!
//! [`JobProgressPoller::poll_once`] performs at most one fetch and returns.
//! The caller decides when to call it again (normally after
//! [`JobProgressPoller::interval`]) and is responsible for releasing the
//! account's slot when the outcome says so.

use std::time::Duration;

use crate::dispatch::{ResultLocation, ResultStore};
use crate::job::{JobTicket, PollTransition};
use crate::types::Timestamp;

/// Default delay between two polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Fewer results than expected; poll again later.
    Pending { received: usize, expected: usize },
    /// The expected count was reached on this poll. Release the slot.
    Completed { received: usize },
    /// The job ran past its max wait and was abandoned. Release the slot.
    GaveUp { received: usize, expected: usize },
    /// The store could not be read; state is unchanged, poll again later.
    FetchFailed { error: String },
    /// The ticket is not being polled (idle or already terminal).
    Inactive,
}

impl PollOutcome {
    /// Whether this poll ended the job and the slot must be released.
    pub fn releases_slot(&self) -> bool {
        matches!(self, PollOutcome::Completed { .. } | PollOutcome::GaveUp { .. })
    }
}

/// Polling policy for dispatched jobs.
#[derive(Debug, Clone, Copy)]
pub struct JobProgressPoller {
    pub interval: Duration,
    /// Give up after this long; `None` polls until done or abandoned.
    pub max_wait: Option<Duration>,
}

impl Default for JobProgressPoller {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_wait: None,
        }
    }
}

impl JobProgressPoller {
    /// Fetch the current result set once and advance `ticket`.
    pub async fn poll_once<S: ResultStore>(
        &self,
        ticket: &mut JobTicket,
        store: &S,
        location: &ResultLocation,
        now: Timestamp,
    ) -> PollOutcome {
        if !ticket.state().is_active() {
            return PollOutcome::Inactive;
        }

        let max_wait = self.max_wait.and_then(|d| chrono::Duration::from_std(d).ok());
        let overdue = ticket.is_overdue(now, max_wait);

        // Fetch even when overdue; a complete result set wins over the deadline.
        let results = match store.fetch_results(location).await {
            Ok(results) => results,
            Err(e) if overdue => {
                tracing::warn!(location = %location, error = %e, "Result fetch failed past max wait");
                return Self::give_up(ticket, location);
            }
            Err(e) => {
                tracing::warn!(location = %location, error = %e, "Result fetch failed, retrying next tick");
                return PollOutcome::FetchFailed {
                    error: e.to_string(),
                };
            }
        };

        match ticket.observe(results) {
            PollTransition::Pending { .. } if overdue => Self::give_up(ticket, location),
            PollTransition::Pending { received, expected } => {
                tracing::debug!(location = %location, received, expected, "Job still generating");
                PollOutcome::Pending { received, expected }
            }
            PollTransition::Completed { received } => {
                tracing::info!(location = %location, received, "Job generation complete");
                PollOutcome::Completed { received }
            }
            PollTransition::Ignored => PollOutcome::Inactive,
        }
    }

    fn give_up(ticket: &mut JobTicket, location: &ResultLocation) -> PollOutcome {
        ticket.abandon();
        tracing::warn!(
            location = %location,
            received = ticket.results().len(),
            expected = ticket.expected(),
            "Job exceeded max wait, giving up",
        );
        PollOutcome::GaveUp {
            received: ticket.results().len(),
            expected: ticket.expected(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
