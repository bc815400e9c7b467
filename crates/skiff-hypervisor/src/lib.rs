//! # skiff-hypervisor
//!
//! Hypervisor capability boundary for skiff.
//!
//! This crate defines the types the lifecycle core hands to a hypervisor
//! and the traits a hypervisor implements in return:
//!
//! - [`RuntimeConfig`]: Ephemeral, validated VM description built fresh
//!   for each boot. Never persisted.
//! - [`HypervisorBackend`]: Creates VMs and reports host resource bounds.
//! - [`VmHandle`]: A live VM with async lifecycle operations.
//! - [`GuestEvent`]: Asynchronous guest notifications (halt, fatal error,
//!   console output) delivered per VM instance.
//!
//! Nothing in this crate touches persisted state or makes policy
//! decisions; configuration validation and state transitions live in the
//! lifecycle core, which consumes this crate.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod error;
pub mod event;
pub mod runtime;

pub use backend::{
    CreatedVm, DynHypervisorBackend, DynVmHandle, HostCapabilities, HypervisorBackend, VmHandle,
};
pub use error::{HypervisorError, Result};
pub use event::GuestEvent;
pub use runtime::{
    BootDescriptor, DEFAULT_DISPLAY_HEIGHT, DEFAULT_DISPLAY_WIDTH, DeviceDescriptor,
    GraphicsDevice, NetworkAttachment, NetworkDevice, RuntimeConfig, SharedFolderDevice,
    StorageDevice,
};
