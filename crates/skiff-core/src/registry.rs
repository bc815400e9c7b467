//! VM registry.
//!
//! The [`Registry`] owns the VM library (configurations plus their
//! bundles) and at most one live [`LifecycleManager`] per VM. Managers
//! are created on demand when a VM starts and discarded when it stops;
//! a VM whose guest halted on its own is reaped lazily the next time
//! the registry looks at its table.
//!
//! The registry is handed its hypervisor backend at construction, so
//! hosts and tests can wire in whatever implementation they want.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use skiff_hypervisor::DynHypervisorBackend;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bundle::VmBundle;
use crate::error::{LifecycleError, RegistryError, Result};
use crate::event::{Event, EventBus};
use crate::lifecycle::{LifecycleManager, LifecycleOptions, LifecycleState};
use crate::settings::Settings;
use crate::vm_config::VmConfig;

/// One VM in the library.
struct LibraryEntry {
    config: VmConfig,
    /// Present when the VM lives in a bundle directory on disk.
    bundle: Option<VmBundle>,
}

struct RegistryInner {
    library: Vec<LibraryEntry>,
    /// At most one live instance per VM.
    running: HashMap<Uuid, Arc<LifecycleManager>>,
    /// Failure messages of VMs whose manager is already gone.
    last_errors: HashMap<Uuid, String>,
}

/// Library of VMs and their live instances.
pub struct Registry {
    backend: DynHypervisorBackend,
    options: LifecycleOptions,
    bus: EventBus,
    data_dir: PathBuf,
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Creates a registry with default lifecycle options.
    #[must_use]
    pub fn new(backend: DynHypervisorBackend, data_dir: impl Into<PathBuf>) -> Self {
        Self::with_options(backend, data_dir, LifecycleOptions::default())
    }

    /// Creates a registry with explicit lifecycle options.
    #[must_use]
    pub fn with_options(
        backend: DynHypervisorBackend,
        data_dir: impl Into<PathBuf>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            backend,
            options,
            bus: EventBus::new(),
            data_dir: data_dir.into(),
            inner: Mutex::new(RegistryInner {
                library: Vec::new(),
                running: HashMap::new(),
                last_errors: HashMap::new(),
            }),
        }
    }

    /// Creates a registry wired from application settings.
    #[must_use]
    pub fn from_settings(backend: DynHypervisorBackend, settings: &Settings) -> Self {
        Self::with_options(
            backend,
            settings.data_dir.clone(),
            settings.lifecycle_options(),
        )
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Directory holding one bundle per VM.
    #[must_use]
    pub fn vms_dir(&self) -> PathBuf {
        self.data_dir.join("vms")
    }

    // =========================================================================
    // Library management
    // =========================================================================

    /// Adds an existing configuration to the library.
    ///
    /// Names are not unique; the returned id is the VM's identity.
    pub async fn add_vm(&self, config: VmConfig) -> Uuid {
        let id = config.id;
        let name = config.name.clone();
        {
            let mut inner = self.inner.lock().await;
            inner.library.push(LibraryEntry {
                config,
                bundle: None,
            });
        }
        info!(vm_id = %id, name = %name, "VM added to library");
        self.bus.publish(Event::VmAdded { id, name });
        id
    }

    /// Creates a VM: a bundle directory under the data directory, a
    /// sparse primary disk of `disk_size` bytes, and a library entry.
    ///
    /// Returns the stored configuration, whose disk path points into
    /// the bundle.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::BundleError`] when the bundle cannot
    /// be created; the library is left unchanged.
    pub async fn create_vm(&self, config: VmConfig, disk_size: u64) -> Result<VmConfig> {
        let vms_dir = self.vms_dir();
        fs::create_dir_all(&vms_dir).map_err(crate::error::BundleError::Io)?;

        let name = config.name.clone();
        let (bundle, config) = VmBundle::create(&name, &vms_dir, config, disk_size)?;
        let id = config.id;
        {
            let mut inner = self.inner.lock().await;
            inner.library.push(LibraryEntry {
                config: config.clone(),
                bundle: Some(bundle),
            });
        }
        info!(vm_id = %id, name = %name, "VM created");
        self.bus.publish(Event::VmAdded { id, name });
        Ok(config)
    }

    /// Loads every bundle under the data directory into the library.
    ///
    /// Bundles that fail to load are skipped with a warning; VMs already
    /// in the library are left alone. Returns the number of VMs loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the VMs directory exists but cannot be read.
    pub async fn load(&self) -> Result<usize> {
        let vms_dir = self.vms_dir();
        if !vms_dir.is_dir() {
            return Ok(0);
        }

        let mut loaded = 0;
        let entries = fs::read_dir(&vms_dir).map_err(crate::error::BundleError::Io)?;
        let mut inner = self.inner.lock().await;
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match VmBundle::load(&path) {
                Ok((bundle, config)) => {
                    if inner.library.iter().any(|e| e.config.id == config.id) {
                        continue;
                    }
                    debug!(vm_id = %config.id, name = %config.name, "VM loaded from bundle");
                    inner.library.push(LibraryEntry {
                        config,
                        bundle: Some(bundle),
                    });
                    loaded += 1;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unloadable bundle");
                }
            }
        }
        drop(inner);

        info!(count = loaded, dir = %vms_dir.display(), "VM library loaded");
        Ok(loaded)
    }

    /// Removes a VM from the library, optionally deleting its bundle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Busy`] while the VM has a live instance
    /// (including an errored one), or [`RegistryError::NotFound`].
    pub async fn remove_vm(&self, id: Uuid, delete_bundle: bool) -> Result<()> {
        let entry = {
            let mut inner = self.inner.lock().await;
            self.reap_finished(&mut inner).await;
            if inner.running.contains_key(&id) {
                return Err(RegistryError::Busy(id));
            }
            let index = inner
                .library
                .iter()
                .position(|e| e.config.id == id)
                .ok_or(RegistryError::NotFound(id))?;
            inner.last_errors.remove(&id);
            inner.library.remove(index)
        };

        if delete_bundle && let Some(bundle) = entry.bundle {
            bundle.delete()?;
        }

        info!(vm_id = %id, name = %entry.config.name, "VM removed from library");
        self.bus.publish(Event::VmRemoved { id });
        Ok(())
    }

    /// Lists the library in insertion order.
    pub async fn vms(&self) -> Vec<VmConfig> {
        let inner = self.inner.lock().await;
        inner.library.iter().map(|e| e.config.clone()).collect()
    }

    /// Looks up one VM's configuration.
    pub async fn vm(&self, id: Uuid) -> Option<VmConfig> {
        let inner = self.inner.lock().await;
        inner
            .library
            .iter()
            .find(|e| e.config.id == id)
            .map(|e| e.config.clone())
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Starts a VM.
    ///
    /// A VM that already has a live instance is left alone and the call
    /// succeeds, so repeated starts are safe. On failure the instance is
    /// discarded and the failure message retained for [`Self::last_error`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`], or the lifecycle error that
    /// put the instance into the error state.
    pub async fn start_vm(&self, id: Uuid) -> Result<()> {
        let manager = {
            let mut inner = self.inner.lock().await;
            self.reap_finished(&mut inner).await;
            if inner.running.contains_key(&id) {
                debug!(vm_id = %id, "start ignored, VM already has an instance");
                return Ok(());
            }
            let entry = inner
                .library
                .iter()
                .find(|e| e.config.id == id)
                .ok_or(RegistryError::NotFound(id))?;
            let manager = Arc::new(LifecycleManager::with_options(
                entry.config.clone(),
                Arc::clone(&self.backend),
                self.options.clone(),
                self.bus.clone(),
                entry.bundle.as_ref().map(VmBundle::console_log),
            ));
            // The slot is taken before any await so a concurrent start
            // of the same VM sees it and backs off.
            inner.running.insert(id, Arc::clone(&manager));
            manager
        };

        match manager.start().await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                inner.last_errors.remove(&id);
                Ok(())
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                inner.running.remove(&id);
                inner.last_errors.insert(id, err.to_string());
                Err(err.into())
            }
        }
    }

    /// Stops a VM.
    ///
    /// A VM with no live instance is already stopped and the call
    /// succeeds. When the hypervisor refuses to stop, the instance is
    /// kept in its error state so the failure can be inspected and
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`], or the lifecycle error.
    pub async fn stop_vm(&self, id: Uuid) -> Result<()> {
        let manager = {
            let mut inner = self.inner.lock().await;
            self.reap_finished(&mut inner).await;
            if !inner.library.iter().any(|e| e.config.id == id) {
                return Err(RegistryError::NotFound(id));
            }
            match inner.running.get(&id) {
                Some(manager) => Arc::clone(manager),
                None => {
                    debug!(vm_id = %id, "stop ignored, VM has no instance");
                    return Ok(());
                }
            }
        };

        match manager.stop().await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                inner.running.remove(&id);
                inner.last_errors.remove(&id);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Suspends a running VM.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`], or the lifecycle error;
    /// a VM with no instance rejects with an invalid-state error.
    pub async fn pause_vm(&self, id: Uuid) -> Result<()> {
        let manager = self.active_manager(id, "pause").await?;
        manager.pause().await.map_err(RegistryError::from)
    }

    /// Resumes a paused VM.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`], or the lifecycle error;
    /// a VM with no instance rejects with an invalid-state error.
    pub async fn resume_vm(&self, id: Uuid) -> Result<()> {
        let manager = self.active_manager(id, "resume").await?;
        manager.resume().await.map_err(RegistryError::from)
    }

    /// Current lifecycle state of a VM. A VM with no live instance is
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`].
    pub async fn state(&self, id: Uuid) -> Result<LifecycleState> {
        let manager = {
            let mut inner = self.inner.lock().await;
            self.reap_finished(&mut inner).await;
            if !inner.library.iter().any(|e| e.config.id == id) {
                return Err(RegistryError::NotFound(id));
            }
            inner.running.get(&id).cloned()
        };
        match manager {
            Some(manager) => Ok(manager.state().await),
            None => Ok(LifecycleState::Stopped),
        }
    }

    /// Message from the VM's most recent failure, if any.
    pub async fn last_error(&self, id: Uuid) -> Option<String> {
        let (recorded, manager) = {
            let inner = self.inner.lock().await;
            (
                inner.last_errors.get(&id).cloned(),
                inner.running.get(&id).cloned(),
            )
        };
        if recorded.is_some() {
            return recorded;
        }
        match manager {
            Some(manager) => manager.last_error().await,
            None => None,
        }
    }

    /// Discards a VM's recorded failure, including an errored instance.
    ///
    /// After clearing, the VM can be started again.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`].
    pub async fn clear_error(&self, id: Uuid) -> Result<()> {
        let cleared = {
            let mut inner = self.inner.lock().await;
            if !inner.library.iter().any(|e| e.config.id == id) {
                return Err(RegistryError::NotFound(id));
            }
            let recorded = inner.last_errors.remove(&id).is_some();
            let errored = match inner.running.get(&id) {
                Some(manager) => manager.state().await == LifecycleState::Error,
                None => false,
            };
            if errored {
                inner.running.remove(&id);
            }
            recorded || errored
        };

        if cleared {
            info!(vm_id = %id, "VM error cleared");
            self.bus.publish(Event::ErrorCleared { id });
        }
        Ok(())
    }

    /// Looks up the live manager for an operation that requires one.
    async fn active_manager(
        &self,
        id: Uuid,
        operation: &'static str,
    ) -> Result<Arc<LifecycleManager>> {
        let mut inner = self.inner.lock().await;
        self.reap_finished(&mut inner).await;
        if !inner.library.iter().any(|e| e.config.id == id) {
            return Err(RegistryError::NotFound(id));
        }
        inner.running.get(&id).cloned().ok_or_else(|| {
            RegistryError::Lifecycle(LifecycleError::InvalidState {
                operation,
                state: LifecycleState::Stopped,
            })
        })
    }

    /// Drops managers whose instance ran and came to rest, so a VM the
    /// guest shut down on its own can be started again.
    async fn reap_finished(&self, inner: &mut RegistryInner) {
        let mut finished = Vec::new();
        for (id, manager) in &inner.running {
            if manager.is_finished().await {
                finished.push(*id);
            }
        }
        for id in finished {
            inner.running.remove(&id);
            inner.last_errors.remove(&id);
            debug!(vm_id = %id, "reaped halted VM instance");
        }
    }
}
