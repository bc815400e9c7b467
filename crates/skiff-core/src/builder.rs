//! Configuration building.
//!
//! [`ConfigurationBuilder`] turns a persisted [`VmConfig`] into the
//! [`RuntimeConfig`] a hypervisor backend consumes. Checks run in a fixed
//! order and the first failure wins: CPU count, memory size, storage,
//! networking, boot method, then the remaining devices. Building reads
//! the filesystem only for existence checks and allocates nothing, so a
//! rejected configuration leaves no trace.

use skiff_hypervisor::{BootDescriptor, DeviceDescriptor, HostCapabilities, RuntimeConfig};
use tracing::debug;

use crate::device::{
    DeviceProducer, GraphicsProducer, NetworkProducer, SharedFolderProducer, StorageProducer,
};
use crate::error::BuildError;
use crate::vm_config::{BootLoaderKind, IsolationMode, VmConfig};

/// Builds runtime configurations against one host's capabilities.
#[derive(Debug)]
pub struct ConfigurationBuilder {
    capabilities: HostCapabilities,
    storage: StorageProducer,
    network: NetworkProducer,
    graphics: GraphicsProducer,
    sharing: SharedFolderProducer,
}

impl ConfigurationBuilder {
    /// Creates a builder for a host with the given resource bounds.
    #[must_use]
    pub fn new(capabilities: HostCapabilities) -> Self {
        Self {
            capabilities,
            storage: StorageProducer,
            network: NetworkProducer,
            graphics: GraphicsProducer::default(),
            sharing: SharedFolderProducer,
        }
    }

    /// Overrides the display resolution for produced VMs.
    #[must_use]
    pub const fn with_graphics(mut self, width_px: u32, height_px: u32) -> Self {
        self.graphics = GraphicsProducer::new(width_px, height_px);
        self
    }

    /// Builds a fresh runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`BuildError`] in check order. Nothing is
    /// allocated on failure.
    pub fn build(&self, config: &VmConfig) -> Result<RuntimeConfig, BuildError> {
        if config.cpu_count == 0 || config.cpu_count > self.capabilities.max_cpu_count {
            return Err(BuildError::InvalidCpuCount {
                requested: config.cpu_count,
                max: self.capabilities.max_cpu_count,
            });
        }
        if config.memory_size == 0 || config.memory_size > self.capabilities.max_memory_size {
            return Err(BuildError::InvalidMemorySize {
                requested: config.memory_size,
                max: self.capabilities.max_memory_size,
            });
        }

        let storage = run(&self.storage, config)?;
        let network = run(&self.network, config)?;
        let boot = boot_descriptor(config)?;
        let graphics = run(&self.graphics, config)?;
        let folders = run(&self.sharing, config)?;

        let isolated = config.isolation_mode == IsolationMode::Isolated;
        let mut runtime =
            RuntimeConfig::new(config.cpu_count, config.memory_size, boot, isolated);
        for device in storage
            .into_iter()
            .chain(network)
            .chain(graphics)
            .chain(folders)
        {
            runtime.attach(device);
        }
        Ok(runtime)
    }
}

fn run(
    producer: &dyn DeviceProducer,
    config: &VmConfig,
) -> Result<Vec<DeviceDescriptor>, BuildError> {
    let devices = producer.produce(config)?;
    debug!(
        vm_id = %config.id,
        producer = producer.name(),
        count = devices.len(),
        "devices produced"
    );
    Ok(devices)
}

/// Maps the configured boot method onto a runtime boot descriptor.
///
/// Direct kernel boot needs its own kernel image; the primary disk is
/// never reused as one.
fn boot_descriptor(config: &VmConfig) -> Result<BootDescriptor, BuildError> {
    match config.boot_loader_type {
        BootLoaderKind::Linux => {
            let kernel = config
                .kernel_image_path
                .as_ref()
                .ok_or(BuildError::MissingKernelImage)?;
            if !kernel.is_file() {
                return Err(BuildError::KernelImageNotFound(kernel.clone()));
            }
            Ok(BootDescriptor::Linux {
                kernel: kernel.clone(),
                initrd: config.initrd_path.clone(),
                cmdline: config.kernel_cmdline.clone(),
            })
        }
        BootLoaderKind::Uefi => Ok(BootDescriptor::Uefi {
            variable_store: config.nvram_path.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm_config::{NetworkingMode, SharedFolder};
    use std::fs::File;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn caps() -> HostCapabilities {
        HostCapabilities {
            max_cpu_count: 8,
            max_memory_size: 16 * GIB,
        }
    }

    fn config_with_disk(dir: &TempDir) -> VmConfig {
        let disk = dir.path().join("disk.img");
        File::create(&disk).unwrap();
        VmConfig::new("vm", 4, 4 * GIB, disk)
    }

    #[test]
    fn test_zero_cpu_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config.cpu_count = 0;
        let result = ConfigurationBuilder::new(caps()).build(&config);
        assert!(matches!(
            result,
            Err(BuildError::InvalidCpuCount { requested: 0, max: 8 })
        ));
    }

    #[test]
    fn test_cpu_at_host_limit_accepted() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config.cpu_count = 8;
        let runtime = ConfigurationBuilder::new(caps()).build(&config).unwrap();
        assert_eq!(runtime.cpu_count, 8);
    }

    #[test]
    fn test_cpu_above_host_limit_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config.cpu_count = 9;
        let result = ConfigurationBuilder::new(caps()).build(&config);
        assert!(matches!(result, Err(BuildError::InvalidCpuCount { .. })));
    }

    #[test]
    fn test_memory_bounds() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);

        config.memory_size = 0;
        assert!(matches!(
            ConfigurationBuilder::new(caps()).build(&config),
            Err(BuildError::InvalidMemorySize { .. })
        ));

        config.memory_size = 16 * GIB + 1;
        assert!(matches!(
            ConfigurationBuilder::new(caps()).build(&config),
            Err(BuildError::InvalidMemorySize { .. })
        ));

        config.memory_size = 16 * GIB;
        assert!(ConfigurationBuilder::new(caps()).build(&config).is_ok());
    }

    #[test]
    fn test_cpu_checked_before_memory() {
        let config = VmConfig::new("vm", 0, 0, "/nope/disk.img");
        let result = ConfigurationBuilder::new(caps()).build(&config);
        assert!(matches!(result, Err(BuildError::InvalidCpuCount { .. })));
    }

    #[test]
    fn test_memory_checked_before_disk() {
        let config = VmConfig::new("vm", 2, 0, "/nope/disk.img");
        let result = ConfigurationBuilder::new(caps()).build(&config);
        assert!(matches!(result, Err(BuildError::InvalidMemorySize { .. })));
    }

    #[test]
    fn test_missing_disk_rejected() {
        let config = VmConfig::new("vm", 2, GIB, "/nope/disk.img");
        let result = ConfigurationBuilder::new(caps()).build(&config);
        assert!(matches!(result, Err(BuildError::DiskImageNotFound(_))));
    }

    #[test]
    fn test_bridged_networking_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config.networking_mode = NetworkingMode::Bridged;
        let result = ConfigurationBuilder::new(caps()).build(&config);
        assert!(matches!(
            result,
            Err(BuildError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn test_linux_boot_requires_kernel_image() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config.boot_loader_type = BootLoaderKind::Linux;
        let result = ConfigurationBuilder::new(caps()).build(&config);
        assert!(matches!(result, Err(BuildError::MissingKernelImage)));
    }

    #[test]
    fn test_linux_boot_kernel_must_exist() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config.boot_loader_type = BootLoaderKind::Linux;
        config.kernel_image_path = Some(PathBuf::from("/nope/vmlinux"));
        let result = ConfigurationBuilder::new(caps()).build(&config);
        assert!(matches!(result, Err(BuildError::KernelImageNotFound(_))));
    }

    #[test]
    fn test_linux_boot_descriptor_carries_initrd_and_cmdline() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        let kernel = dir.path().join("vmlinux");
        File::create(&kernel).unwrap();
        config.boot_loader_type = BootLoaderKind::Linux;
        config.kernel_image_path = Some(kernel.clone());
        config.initrd_path = Some(PathBuf::from("/boot/initrd.img"));
        config.kernel_cmdline = Some("console=hvc0".to_string());

        let runtime = ConfigurationBuilder::new(caps()).build(&config).unwrap();
        assert_eq!(
            runtime.boot,
            BootDescriptor::Linux {
                kernel,
                initrd: Some(PathBuf::from("/boot/initrd.img")),
                cmdline: Some("console=hvc0".to_string()),
            }
        );
    }

    #[test]
    fn test_uefi_boot_carries_variable_store() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config.nvram_path = Some(dir.path().join("nvram.bin"));

        let runtime = ConfigurationBuilder::new(caps()).build(&config).unwrap();
        assert_eq!(
            runtime.boot,
            BootDescriptor::Uefi {
                variable_store: Some(dir.path().join("nvram.bin")),
            }
        );
    }

    #[test]
    fn test_boot_disk_is_device_zero() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        let iso = dir.path().join("installer.iso");
        File::create(&iso).unwrap();
        config.cdrom_image_path = Some(iso);

        let runtime = ConfigurationBuilder::new(caps()).build(&config).unwrap();
        assert_eq!(runtime.storage.len(), 2);
        let boot = runtime.boot_device().unwrap();
        assert_eq!(boot.image_path, config.disk_image_path);
    }

    #[test]
    fn test_graphics_resolution_override() {
        let dir = TempDir::new().unwrap();
        let config = config_with_disk(&dir);
        let runtime = ConfigurationBuilder::new(caps())
            .with_graphics(2560, 1440)
            .build(&config)
            .unwrap();
        assert_eq!(runtime.graphics.width_px, 2560);
        assert_eq!(runtime.graphics.height_px, 1440);
    }

    #[test]
    fn test_shared_folders_become_devices() {
        let dir = TempDir::new().unwrap();
        let share = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        config
            .shared_folders
            .add(SharedFolder::new("projects", share.path(), true))
            .unwrap();

        let runtime = ConfigurationBuilder::new(caps()).build(&config).unwrap();
        assert_eq!(runtime.shared_folders.len(), 1);
        assert_eq!(runtime.shared_folders[0].tag, "projects");
        assert!(runtime.shared_folders[0].read_only);
    }

    #[test]
    fn test_isolation_mode_flows_through() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_disk(&dir);
        let builder = ConfigurationBuilder::new(caps());

        assert!(builder.build(&config).unwrap().isolated);
        config.isolation_mode = IsolationMode::Unrestricted;
        assert!(!builder.build(&config).unwrap().isolated);
    }

    #[test]
    fn test_repeated_builds_are_identical() {
        let dir = TempDir::new().unwrap();
        let config = config_with_disk(&dir);
        let builder = ConfigurationBuilder::new(caps());
        assert_eq!(builder.build(&config).unwrap(), builder.build(&config).unwrap());
    }
}
