//! Error type shared by all hypervisor backends.

use thiserror::Error;

/// Errors reported by a hypervisor backend.
///
/// Backends map their native failures onto these variants; the lifecycle
/// layer decides what each one means for the VM state machine.
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// The host cannot provide a requested capability.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The backend rejected the runtime configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A start/stop/pause/resume primitive failed.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// The backend did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Failure inside the host framework itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
