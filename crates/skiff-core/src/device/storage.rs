//! Storage device production.

use skiff_hypervisor::{DeviceDescriptor, StorageDevice};
use tracing::debug;

use crate::device::DeviceProducer;
use crate::error::BuildError;
use crate::vm_config::VmConfig;

/// Produces the boot disk and, when present, the CD-ROM attachment.
#[derive(Debug, Default)]
pub struct StorageProducer;

impl DeviceProducer for StorageProducer {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn produce(&self, config: &VmConfig) -> Result<Vec<DeviceDescriptor>, BuildError> {
        if !config.disk_image_path.is_file() {
            return Err(BuildError::DiskImageNotFound(
                config.disk_image_path.clone(),
            ));
        }

        let mut devices = vec![DeviceDescriptor::Storage(StorageDevice {
            image_path: config.disk_image_path.clone(),
            read_only: false,
            boot: true,
        })];

        if let Some(cdrom) = &config.cdrom_image_path {
            if cdrom.is_file() {
                devices.push(DeviceDescriptor::Storage(StorageDevice {
                    image_path: cdrom.clone(),
                    read_only: true,
                    boot: false,
                }));
            } else {
                // A missing CD-ROM image never fails the build; the device
                // is omitted and the VM boots without install media.
                debug!(vm_id = %config.id, path = %cdrom.display(), "CD-ROM image missing, omitting device");
            }
        }

        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn config_with_disk(dir: &TempDir) -> VmConfig {
        let disk = dir.path().join("disk.img");
        File::create(&disk).unwrap();
        VmConfig::new("vm", 2, 1 << 30, disk)
    }

    #[test]
    fn test_boot_disk_comes_first_and_writable() {
        let dir = TempDir::new().unwrap();
        let config = config_with_disk(&dir);

        let devices = StorageProducer.produce(&config).unwrap();
        assert_eq!(devices.len(), 1);
        match &devices[0] {
            DeviceDescriptor::Storage(disk) => {
                assert!(disk.boot);
                assert!(!disk.read_only);
            }
            other => panic!("expected storage device, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_disk_image_fails() {
        let config = VmConfig::new("vm", 2, 1 << 30, "/nope/disk.img");
        let result = StorageProducer.produce(&config);
        assert!(matches!(result, Err(BuildError::DiskImageNotFound(_))));
    }

    #[test]
    fn test_cdrom_attached_read_only() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        let iso = dir.path().join("installer.iso");
        File::create(&iso).unwrap();
        config.cdrom_image_path = Some(iso);

        let devices = StorageProducer.produce(&config).unwrap();
        assert_eq!(devices.len(), 2);
        match &devices[1] {
            DeviceDescriptor::Storage(cdrom) => {
                assert!(cdrom.read_only);
                assert!(!cdrom.boot);
            }
            other => panic!("expected storage device, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_cdrom_is_silently_omitted() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config.cdrom_image_path = Some(dir.path().join("gone.iso"));

        let devices = StorageProducer.produce(&config).unwrap();
        assert_eq!(devices.len(), 1);
    }
}
