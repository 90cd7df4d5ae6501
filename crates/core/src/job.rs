//! Generation job bookkeeping and its state machine.
//!
//! A [`JobTicket`] is created idle, becomes dispatched when the generation
//! backend accepts the job, and then collects results through polling until
//! the expected count is reached (done) or the caller gives up (abandoned).
//! Both terminal states are reported exactly once so the caller releases its
//! slot exactly once.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

/// Message tone offered to the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Empathetic,
    Formal,
    Urgent,
}

impl Tone {
    /// Value the generation backend expects on the wire.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Tone::Empathetic => "empático",
            Tone::Formal => "formal",
            Tone::Urgent => "urgente",
        }
    }
}

/// One message produced by the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedMessage {
    pub recipient_name: String,
    pub recipient_phone: String,
    pub message_text: String,
    pub client_code: String,
}

/// Lifecycle of a [`JobTicket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Dispatched,
    Polling,
    Done,
    Abandoned,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Abandoned)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobState::Dispatched | JobState::Polling)
    }
}

/// Result of feeding one fetched result set into a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTransition {
    /// Still waiting for more results.
    Pending { received: usize, expected: usize },
    /// The expected count was reached by this observation.
    Completed { received: usize },
    /// The ticket was already terminal or never dispatched; nothing changed.
    Ignored,
}

/// Bookkeeping for one dispatched generation job.
#[derive(Debug, Clone)]
pub struct JobTicket {
    state: JobState,
    expected: usize,
    results: Vec<GeneratedMessage>,
    dispatched_at: Option<Timestamp>,
    polls: u32,
}

impl Default for JobTicket {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTicket {
    pub fn new() -> Self {
        Self {
            state: JobState::Idle,
            expected: 0,
            results: Vec::new(),
            dispatched_at: None,
            polls: 0,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn results(&self) -> &[GeneratedMessage] {
        &self.results
    }

    pub fn dispatched_at(&self) -> Option<Timestamp> {
        self.dispatched_at
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// IDLE -> DISPATCHED.
    pub fn dispatch(&mut self, expected: usize, now: Timestamp) -> Result<(), CoreError> {
        if self.state != JobState::Idle {
            return Err(CoreError::Conflict(format!(
                "Cannot dispatch a job in state {:?}",
                self.state
            )));
        }
        if expected == 0 {
            return Err(CoreError::Validation(
                "Expected result count must be positive".to_string(),
            ));
        }
        self.state = JobState::Dispatched;
        self.expected = expected;
        self.results.clear();
        self.dispatched_at = Some(now);
        self.polls = 0;
        Ok(())
    }

    /// Feed the complete result set fetched from the store.
    ///
    /// Each fetch replaces the previous one; the store always returns the
    /// full set, never a delta.
    pub fn observe(&mut self, results: Vec<GeneratedMessage>) -> PollTransition {
        if !self.state.is_active() {
            return PollTransition::Ignored;
        }
        self.polls += 1;
        self.results = results;
        let received = self.results.len();

        if received >= self.expected {
            self.state = JobState::Done;
            PollTransition::Completed { received }
        } else {
            self.state = JobState::Polling;
            PollTransition::Pending {
                received,
                expected: self.expected,
            }
        }
    }

    /// DISPATCHED/POLLING -> ABANDONED.
    ///
    /// Returns `true` only when this call performed the transition. An idle
    /// ticket stays idle so it can still be dispatched.
    pub fn abandon(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = JobState::Abandoned;
        true
    }

    /// Whether the job has been running longer than `max_wait`.
    pub fn is_overdue(&self, now: Timestamp, max_wait: Option<chrono::Duration>) -> bool {
        match (max_wait, self.dispatched_at) {
            (Some(limit), Some(at)) if self.state.is_active() => now - at >= limit,
            _ => false,
        }
    }

    /// Received over expected, `0..=100`. Zero when nothing is expected.
    pub fn progress_percent(&self) -> u8 {
        if self.expected == 0 {
            return 0;
        }
        ((self.results.len() * 100) / self.expected).min(100) as u8
    }

    /// Results ordered by recipient name for operator review.
    pub fn review_list(&self) -> Vec<GeneratedMessage> {
        let mut list = self.results.clone();
        list.sort_by(|a, b| a.recipient_name.cmp(&b.recipient_name));
        list
    }

    /// Consume the results and go back to idle.
    pub fn take_results(&mut self) -> Vec<GeneratedMessage> {
        let results = std::mem::take(&mut self.results);
        *self = Self::new();
        results
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
