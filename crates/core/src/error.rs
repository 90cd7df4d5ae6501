/// Domain error shared by every crate in the workspace.
///
/// Variants follow the failure taxonomy of the coordination core: bad input
/// data, capacity limits, contention on a shared slot, and failures talking
/// to an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
