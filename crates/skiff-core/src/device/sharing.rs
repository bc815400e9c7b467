//! Shared folder device production.

use skiff_hypervisor::{DeviceDescriptor, SharedFolderDevice};

use crate::device::DeviceProducer;
use crate::error::{BuildError, SharedFolderError};
use crate::vm_config::VmConfig;

/// Produces one directory-share device per configured folder.
///
/// Folder definitions were validated when they were added, but the host
/// directory may have vanished since, so existence is checked again at
/// build time.
#[derive(Debug, Default)]
pub struct SharedFolderProducer;

impl DeviceProducer for SharedFolderProducer {
    fn name(&self) -> &'static str {
        "shared-folders"
    }

    fn produce(&self, config: &VmConfig) -> Result<Vec<DeviceDescriptor>, BuildError> {
        let mut devices = Vec::with_capacity(config.shared_folders.len());
        for folder in &config.shared_folders {
            if !folder.host_path.is_dir() {
                return Err(SharedFolderError::DirectoryNotFound(folder.host_path.clone()).into());
            }
            devices.push(DeviceDescriptor::SharedFolder(SharedFolderDevice {
                tag: folder.name.clone(),
                host_path: folder.host_path.clone(),
                read_only: folder.read_only,
            }));
        }
        Ok(devices)
    }
}
