//! # skiff-core
//!
//! Core orchestration layer for Skiff.
//!
//! This crate provides high-level management of:
//!
//! - [`Registry`]: VM library and per-VM live instances
//! - [`LifecycleManager`]: one VM's state machine
//! - [`ConfigurationBuilder`]: configuration to runtime translation
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  skiff-core                   │
//! │  ┌──────────┐   ┌──────────────────────────┐  │
//! │  │ Registry ├──▶│ LifecycleManager (per VM)│  │
//! │  └────┬─────┘   └─────────┬────────────────┘  │
//! │       │                   │                   │
//! │       ▼                   ▼                   │
//! │  ┌──────────┐   ┌──────────────────────────┐  │
//! │  │ VmBundle │   │   ConfigurationBuilder   │  │
//! │  └──────────┘   └─────────┬────────────────┘  │
//! │                           │                   │
//! │              ┌────────────┘                   │
//! │              ▼                                │
//! │         ┌──────────┐                          │
//! │         │ EventBus │                          │
//! │         └──────────┘                          │
//! └───────────────────────────────────────────────┘
//!                     │
//!                     ▼
//!              skiff-hypervisor
//! ```
//!
//! The registry holds the durable library (configurations and their
//! on-disk bundles). Starting a VM creates a lifecycle manager, which
//! builds a [`skiff_hypervisor::RuntimeConfig`] through the device
//! producers and drives a hypervisor handle through the state machine.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod bundle;
pub mod device;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod registry;
pub mod settings;
pub mod vm_config;

pub use builder::ConfigurationBuilder;
pub use bundle::{ConsoleLog, VmBundle};
pub use error::{
    BuildError, BundleError, LifecycleError, RegistryError, Result, SharedFolderError,
    StartFailure,
};
pub use event::{Event, EventBus};
pub use lifecycle::{LifecycleManager, LifecycleOptions, LifecycleState};
pub use registry::Registry;
pub use settings::Settings;
pub use vm_config::{
    BootLoaderKind, IsolationMode, NetworkingMode, SharedFolder, SharedFolderSet, VmConfig,
};
