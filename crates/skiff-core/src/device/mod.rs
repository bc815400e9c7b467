//! Device producers.
//!
//! Each producer inspects one slice of a [`VmConfig`](crate::vm_config::VmConfig)
//! and emits the runtime device descriptors for it, or a typed error when
//! that slice cannot be realized on this host. The configuration builder
//! runs them in a fixed order; producers never talk to the hypervisor.

mod graphics;
mod network;
mod sharing;
mod storage;

use skiff_hypervisor::DeviceDescriptor;

use crate::error::BuildError;
use crate::vm_config::VmConfig;

pub use graphics::GraphicsProducer;
pub use network::NetworkProducer;
pub use sharing::SharedFolderProducer;
pub use storage::StorageProducer;

/// Turns one aspect of a persisted configuration into runtime devices.
pub trait DeviceProducer {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Produces this aspect's device descriptors.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] when the configuration asks for something
    /// this host cannot provide.
    fn produce(&self, config: &VmConfig) -> Result<Vec<DeviceDescriptor>, BuildError>;
}
