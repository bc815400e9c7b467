//! Runtime configuration handed to a hypervisor backend.
//!
//! A [`RuntimeConfig`] is the validated, device-resolved form of a VM
//! definition. It is derived fresh for every start attempt and never
//! persisted; file paths inside it were checked for existence at build
//! time, immediately before the backend sees them.

use std::path::PathBuf;

/// Default guest display width in pixels.
pub const DEFAULT_DISPLAY_WIDTH: u32 = 1280;

/// Default guest display height in pixels.
pub const DEFAULT_DISPLAY_HEIGHT: u32 = 800;

// =============================================================================
// Device descriptors
// =============================================================================

/// A block storage device attached to the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDevice {
    /// Path to the backing disk image on the host.
    pub image_path: PathBuf,
    /// Whether the guest may write to the device.
    pub read_only: bool,
    /// Whether this is the boot device. The boot device is always attached
    /// at index 0 because boot loaders resolve the boot target positionally.
    pub boot: bool,
}

/// How a network device reaches the outside world.
///
/// Only NAT is expressible today; bridged attachments need an elevated
/// host entitlement and are rejected before a backend ever sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkAttachment {
    /// Guest traffic is translated through the host's address.
    Nat,
}

/// A paravirtualized network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkDevice {
    pub attachment: NetworkAttachment,
}

/// The guest display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsDevice {
    pub width_px: u32,
    pub height_px: u32,
}

impl Default for GraphicsDevice {
    fn default() -> Self {
        Self {
            width_px: DEFAULT_DISPLAY_WIDTH,
            height_px: DEFAULT_DISPLAY_HEIGHT,
        }
    }
}

/// A host directory exposed to the guest over filesystem passthrough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFolderDevice {
    /// Mount tag the guest uses to identify the share.
    pub tag: String,
    /// Host directory backing the share.
    pub host_path: PathBuf,
    /// Whether the guest may write into the directory.
    pub read_only: bool,
}

/// One device of any kind, as emitted by a device producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDescriptor {
    Storage(StorageDevice),
    Network(NetworkDevice),
    Graphics(GraphicsDevice),
    SharedFolder(SharedFolderDevice),
}

// =============================================================================
// Boot descriptor
// =============================================================================

/// How the guest is brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootDescriptor {
    /// Boot a raw kernel image handed directly to the hypervisor.
    Linux {
        /// Kernel image on the host. Checked for existence at build time.
        kernel: PathBuf,
        /// Optional initial ramdisk.
        initrd: Option<PathBuf>,
        /// Optional kernel command line.
        cmdline: Option<String>,
    },
    /// Boot standard firmware which then loads the guest's own chain.
    Uefi {
        /// Firmware variable store. `None` means the backend boots with
        /// ephemeral UEFI variables.
        variable_store: Option<PathBuf>,
    },
}

// =============================================================================
// Runtime configuration
// =============================================================================

/// The complete, validated configuration for one VM instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of virtual CPUs, already validated against host bounds.
    pub cpu_count: u32,
    /// Guest memory in bytes, already validated against host bounds.
    pub memory_size: u64,
    /// Boot method.
    pub boot: BootDescriptor,
    /// Storage devices; the boot device is index 0.
    pub storage: Vec<StorageDevice>,
    /// Network devices.
    pub network: Vec<NetworkDevice>,
    /// The guest display.
    pub graphics: GraphicsDevice,
    /// Host directories shared into the guest.
    pub shared_folders: Vec<SharedFolderDevice>,
    /// Whether the guest's device and network reach is restricted.
    pub isolated: bool,
}

impl RuntimeConfig {
    /// Creates an empty runtime configuration with no devices attached.
    #[must_use]
    pub fn new(cpu_count: u32, memory_size: u64, boot: BootDescriptor, isolated: bool) -> Self {
        Self {
            cpu_count,
            memory_size,
            boot,
            storage: Vec::new(),
            network: Vec::new(),
            graphics: GraphicsDevice::default(),
            shared_folders: Vec::new(),
            isolated,
        }
    }

    /// Routes a produced descriptor into its device list.
    ///
    /// Attach order is preserved within each device class; attaching a
    /// second graphics descriptor replaces the first (a VM has one display).
    pub fn attach(&mut self, descriptor: DeviceDescriptor) -> &mut Self {
        match descriptor {
            DeviceDescriptor::Storage(dev) => self.storage.push(dev),
            DeviceDescriptor::Network(dev) => self.network.push(dev),
            DeviceDescriptor::Graphics(dev) => self.graphics = dev,
            DeviceDescriptor::SharedFolder(dev) => self.shared_folders.push(dev),
        }
        self
    }

    /// Returns the boot storage device, if any storage is attached.
    #[must_use]
    pub fn boot_device(&self) -> Option<&StorageDevice> {
        self.storage.first().filter(|dev| dev.boot)
    }
}
