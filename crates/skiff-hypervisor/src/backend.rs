//! Backend and VM-handle traits implemented by concrete hypervisors.

use crate::error::Result;
use crate::event::GuestEvent;
use crate::runtime::RuntimeConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared backend trait object.
pub type DynHypervisorBackend = Arc<dyn HypervisorBackend>;

/// Shared VM handle trait object.
pub type DynVmHandle = Arc<dyn VmHandle>;

/// Resource bounds reported by the host.
///
/// The configuration builder validates CPU count and memory size against
/// these before any hypervisor resource is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// Largest virtual CPU count the host will accept.
    pub max_cpu_count: u32,
    /// Largest guest memory size in bytes the host will accept.
    pub max_memory_size: u64,
}

/// A freshly created VM: the live handle plus its guest event stream.
///
/// The receiver is the only consumer of this instance's events; the
/// lifecycle layer pumps it into its serialized transition function.
pub struct CreatedVm {
    pub handle: DynVmHandle,
    pub events: mpsc::UnboundedReceiver<GuestEvent>,
}

/// A hypervisor implementation.
///
/// Creating a VM allocates host resources; everything before that point
/// (validation, device resolution) happens in the lifecycle core without
/// touching the backend.
pub trait HypervisorBackend: Send + Sync {
    /// Host-reported resource bounds.
    fn capabilities(&self) -> HostCapabilities;

    /// Instantiates a VM from a validated runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the host rejects the configuration or cannot
    /// allocate the VM.
    fn create_vm(&self, config: &RuntimeConfig) -> Result<CreatedVm>;
}

/// A live VM owned by the hypervisor.
///
/// All operations are long-running and asynchronous; callers suspend on
/// them without blocking the delivery of [`GuestEvent`]s.
#[async_trait]
pub trait VmHandle: Send + Sync {
    /// Boots the guest.
    async fn start(&self) -> Result<()>;

    /// Stops the guest.
    async fn stop(&self) -> Result<()>;

    /// Suspends guest execution.
    async fn pause(&self) -> Result<()>;

    /// Resumes a paused guest.
    async fn resume(&self) -> Result<()>;

    /// Whether the host supports pausing this VM.
    fn can_pause(&self) -> bool;
}
