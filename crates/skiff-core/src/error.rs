//! Error types for the lifecycle core.

use std::path::PathBuf;
use std::time::Duration;

use skiff_hypervisor::HypervisorError;
use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::LifecycleState;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors from shared folder definitions.
#[derive(Debug, Error)]
pub enum SharedFolderError {
    /// Name contains characters outside letters, digits, `-`, and `_`.
    #[error("invalid shared folder name: {0:?}")]
    InvalidName(String),

    /// Another folder in the set already uses this name.
    #[error("duplicate shared folder name: {0}")]
    DuplicateName(String),

    /// Host directory does not exist.
    #[error("shared folder directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// No folder with this id in the set.
    #[error("shared folder not found: {0}")]
    NotFound(Uuid),
}

/// Errors from turning a persisted configuration into a runtime one.
///
/// Validation is ordered; the first failing check wins and later checks
/// never run.
#[derive(Debug, Error)]
pub enum BuildError {
    /// CPU count is zero or above the host limit.
    #[error("invalid CPU count: {requested} (host allows 1 to {max})")]
    InvalidCpuCount { requested: u32, max: u32 },

    /// Memory size is zero or above the host limit.
    #[error("invalid memory size: {requested} bytes (host allows 1 to {max})")]
    InvalidMemorySize { requested: u64, max: u64 },

    /// Primary disk image does not exist.
    #[error("disk image not found: {0}")]
    DiskImageNotFound(PathBuf),

    /// Linux boot selected without a kernel image path.
    #[error("linux boot requires a kernel image")]
    MissingKernelImage,

    /// Kernel image path is set but the file does not exist.
    #[error("kernel image not found: {0}")]
    KernelImageNotFound(PathBuf),

    /// Configuration names a feature the host refuses.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Shared folder definition failed re-validation.
    #[error(transparent)]
    SharedFolder(#[from] SharedFolderError),
}

/// Why a start attempt ended in the error state.
#[derive(Debug, Error)]
pub enum StartFailure {
    /// Configuration was rejected before any resource was allocated.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Hypervisor rejected VM creation or boot.
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    /// Boot did not complete within the configured window.
    #[error("start did not complete within {0:?}")]
    Timeout(Duration),

    /// Guest reported a fatal error while the start was in flight.
    #[error("guest failed during start: {0}")]
    Fatal(String),
}

/// Errors from lifecycle operations on a single VM.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Operation is not legal in the current state.
    #[error("cannot {operation} a VM that is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// Start failed; the VM is in the error state.
    #[error("start failed: {0}")]
    StartFailed(#[source] StartFailure),

    /// Stop failed; the VM is in the error state.
    #[error("stop failed: {0}")]
    StopFailed(#[source] HypervisorError),

    /// Raw hypervisor failure surfaced unchanged.
    ///
    /// Pause and resume report hypervisor errors without a state
    /// transition, so callers see exactly what the host said.
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),
}

/// Errors from VM bundle directories on disk.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Path is not a bundle directory.
    #[error("not a VM bundle: {0}")]
    InvalidBundle(PathBuf),

    /// A bundle already occupies the target path.
    #[error("bundle already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Bundle has no config.json.
    #[error("config.json not found in bundle: {0}")]
    ConfigNotFound(PathBuf),

    /// config.json exists but does not parse.
    #[error("corrupted config.json at {path}: {source}")]
    CorruptedConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Disk image could not be allocated.
    #[error("failed to allocate disk image {path}: {source}")]
    DiskAllocation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No VM with this id in the library.
    #[error("VM not found: {0}")]
    NotFound(Uuid),

    /// VM has an active instance and cannot be removed.
    #[error("VM {0} has an active instance")]
    Busy(Uuid),

    /// Lifecycle operation failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Bundle operation failed.
    #[error(transparent)]
    Bundle(#[from] BundleError),
}
