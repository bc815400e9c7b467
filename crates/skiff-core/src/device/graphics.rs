//! Graphics device production.

use skiff_hypervisor::{
    DEFAULT_DISPLAY_HEIGHT, DEFAULT_DISPLAY_WIDTH, DeviceDescriptor, GraphicsDevice,
};

use crate::device::DeviceProducer;
use crate::error::BuildError;
use crate::vm_config::VmConfig;

/// Produces the single display device.
///
/// Every VM gets a display; the resolution comes from application
/// settings, not from the per-VM document.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsProducer {
    width_px: u32,
    height_px: u32,
}

impl GraphicsProducer {
    /// Creates a producer emitting displays of the given resolution.
    #[must_use]
    pub const fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
        }
    }
}

impl Default for GraphicsProducer {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_WIDTH, DEFAULT_DISPLAY_HEIGHT)
    }
}

impl DeviceProducer for GraphicsProducer {
    fn name(&self) -> &'static str {
        "graphics"
    }

    fn produce(&self, _config: &VmConfig) -> Result<Vec<DeviceDescriptor>, BuildError> {
        Ok(vec![DeviceDescriptor::Graphics(GraphicsDevice {
            width_px: self.width_px,
            height_px: self.height_px,
        })])
    }
}
