use cobra_core::dispatch::ConnectionState;
use cobra_core::error::CoreError;
use cobra_core::types::AccountId;

use crate::config::ConfigError;

/// Errors surfaced by the job workflow and the session driver.
///
/// Wraps [`CoreError`] for domain failures and adds the workflow states an
/// operator has to act on.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// A domain-level error from `cobra_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The operator's WhatsApp session is not usable.
    #[error("Account {account} is not connected (state: {state:?})")]
    NotConnected {
        account: AccountId,
        state: ConnectionState,
    },

    /// An operation needs a connected account first.
    #[error("No account connected for this session")]
    NoAccount,

    /// An operation needs a loaded batch first.
    #[error("No batch loaded for this session")]
    NoBatch,

    #[error("Validation still running ({progress_percent}%)")]
    ValidationPending { progress_percent: u8 },

    /// Nothing reachable is left after filtering the batch.
    #[error("No reachable number in the batch")]
    NoReachableNumbers,

    #[error("Not admitted yet: position {position} of {queue_size}")]
    NotAdmitted { position: usize, queue_size: usize },

    /// The session already has a job (or a lock on another account).
    #[error("A job is already in progress for this session")]
    JobInProgress,

    #[error("Generation has not finished")]
    JobNotFinished,

    /// Delivery was asked for without a completed generation job.
    #[error("No generated messages to deliver")]
    NothingGenerated,

    /// Staging the batch rows failed; the slot was released.
    #[error("Staging failed: {0}")]
    Staging(String),

    /// The generation backend rejected or never answered; the slot was released.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("No message approved for delivery")]
    EmptyDelivery,

    /// The delivery backend did not accept the messages; state is kept.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Job manifest error: {0}")]
    Manifest(String),

    #[error("Session cancelled")]
    Cancelled,
}

impl ConsoleError {
    /// Stable machine-readable code for logs and run summaries.
    pub fn code(&self) -> &'static str {
        match self {
            ConsoleError::Core(core) => match core {
                CoreError::Validation(_) => "VALIDATION_ERROR",
                CoreError::Capacity(_) => "CAPACITY_EXCEEDED",
                CoreError::Conflict(_) => "CONFLICT",
                CoreError::Transport(_) => "TRANSPORT_ERROR",
                CoreError::Internal(_) => "INTERNAL_ERROR",
            },
            ConsoleError::Config(_) => "CONFIG_ERROR",
            ConsoleError::NotConnected { .. } => "NOT_CONNECTED",
            ConsoleError::NoAccount => "NO_ACCOUNT",
            ConsoleError::NoBatch => "NO_BATCH",
            ConsoleError::ValidationPending { .. } => "VALIDATION_PENDING",
            ConsoleError::NoReachableNumbers => "NO_REACHABLE_NUMBERS",
            ConsoleError::NotAdmitted { .. } => "NOT_ADMITTED",
            ConsoleError::JobInProgress => "JOB_IN_PROGRESS",
            ConsoleError::JobNotFinished => "JOB_NOT_FINISHED",
            ConsoleError::NothingGenerated => "NOTHING_GENERATED",
            ConsoleError::Staging(_) => "STAGING_FAILED",
            ConsoleError::Dispatch(_) => "DISPATCH_FAILED",
            ConsoleError::EmptyDelivery => "EMPTY_DELIVERY",
            ConsoleError::Delivery(_) => "DELIVERY_FAILED",
            ConsoleError::Manifest(_) => "MANIFEST_ERROR",
            ConsoleError::Cancelled => "CANCELLED",
        }
    }
}

/// Convenience alias for workflow return values.
pub type ConsoleResult<T> = Result<T, ConsoleError>;
