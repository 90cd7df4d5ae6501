//! Seams to the external automation backend and WhatsApp gateway.
//!
//! The coordination core only sees these traits; `cobra-gateway` provides
//! the HTTP implementations and tests provide in-memory doubles.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::batch::DebtorRow;
use crate::error::CoreError;
use crate::job::{GeneratedMessage, Tone};
use crate::types::{AccountId, Timestamp};

/// Base name of the result sheet; the account id is appended per account.
pub const RESULT_SHEET_BASE: &str = "Dados de Cobrança";

/// Seconds the delivery backend waits between two messages.
pub const DELIVERY_INTERVAL_SECS: u64 = 21;

/// Maximum characters kept per delivered field.
pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_PHONE_CHARS: usize = 20;
pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_CLIENT_CODE_CHARS: usize = 50;

// ---------------------------------------------------------------------------
// Result location
// ---------------------------------------------------------------------------

/// Where generated results for one account are written and read back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultLocation(String);

impl ResultLocation {
    /// Per-account partition of the result store.
    pub fn for_account(account: &AccountId) -> Self {
        Self(format!("{RESULT_SHEET_BASE} - {account}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to start message generation for a staged batch.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub tone: Tone,
    pub total_targets: usize,
    pub dispatched_at: Timestamp,
    pub result_location: ResultLocation,
    pub sender: AccountId,
}

/// Backend acknowledgement of a [`GenerationRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationAccepted {
    pub expected_result_count: usize,
}

/// One approved message handed to the delivery backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryItem {
    pub recipient: String,
    pub message: String,
    pub client_code: String,
    pub name: String,
}

impl DeliveryItem {
    /// Build an item from a generated message, truncating every field.
    pub fn from_message(m: &GeneratedMessage) -> Self {
        Self {
            recipient: truncate_chars(&m.recipient_phone, MAX_PHONE_CHARS),
            message: truncate_chars(&m.message_text, MAX_MESSAGE_CHARS),
            client_code: truncate_chars(&m.client_code, MAX_CLIENT_CODE_CHARS),
            name: truncate_chars(&m.recipient_name, MAX_NAME_CHARS),
        }
    }
}

/// Request to deliver approved messages from `sender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub sender: AccountId,
    pub items: Vec<DeliveryItem>,
    pub interval_seconds: u64,
}

/// Keep at most `max` characters (not bytes) of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// WhatsApp session state of a sending account as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Connecting,
    Closed,
    NotFound,
    Unknown,
}

impl ConnectionState {
    pub fn from_wire(state: &str) -> Self {
        match state {
            "open" => ConnectionState::Open,
            "connecting" => ConnectionState::Connecting,
            "close" | "closed" => ConnectionState::Closed,
            _ => ConnectionState::Unknown,
        }
    }

    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Reports whether a sending account's WhatsApp session is usable.
pub trait ConnectionProbe: Send + Sync {
    fn connection_state(
        &self,
        account: &AccountId,
    ) -> impl Future<Output = Result<ConnectionState, CoreError>> + Send;
}

/// Starts generation jobs on the automation backend.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<GenerationAccepted, CoreError>> + Send;
}

/// Hands approved messages to the delivery backend.
pub trait DeliveryDispatcher: Send + Sync {
    /// Resolves `Ok` only when the backend accepted the whole request.
    fn deliver(&self, request: &DeliveryRequest)
        -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// Storage shared with the generation backend: staged input rows go in,
/// generated messages come out.
pub trait ResultStore: Send + Sync {
    /// Replace the rows the generator will read for `location`.
    fn stage_rows(
        &self,
        location: &ResultLocation,
        rows: &[DebtorRow],
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Read every message generated so far for `location`.
    ///
    /// Must return an empty list, not an error, before any result exists.
    fn fetch_results(
        &self,
        location: &ResultLocation,
    ) -> impl Future<Output = Result<Vec<GeneratedMessage>, CoreError>> + Send;
}
