//! Network device production.

use skiff_hypervisor::{DeviceDescriptor, NetworkAttachment, NetworkDevice};

use crate::device::DeviceProducer;
use crate::error::BuildError;
use crate::vm_config::{NetworkingMode, VmConfig};

/// Produces the guest network device.
///
/// NAT always works. Bridged attachment needs an entitlement the app
/// does not ship with, so it is rejected here instead of surfacing a
/// hypervisor error mid-boot.
#[derive(Debug, Default)]
pub struct NetworkProducer;

impl DeviceProducer for NetworkProducer {
    fn name(&self) -> &'static str {
        "network"
    }

    fn produce(&self, config: &VmConfig) -> Result<Vec<DeviceDescriptor>, BuildError> {
        match config.networking_mode {
            NetworkingMode::Nat => Ok(vec![DeviceDescriptor::Network(NetworkDevice {
                attachment: NetworkAttachment::Nat,
            })]),
            NetworkingMode::Bridged => Err(BuildError::UnsupportedConfiguration(
                "bridged networking requires an entitlement this host does not have".to_string(),
            )),
        }
    }
}
