//! Per-VM lifecycle management.
//!
//! [`LifecycleManager`] owns one VM instance's state machine. It builds a
//! fresh runtime configuration for every start, drives the hypervisor
//! handle, and folds asynchronous guest notifications back into its own
//! state.
//!
//! ```text
//!          start            boot ok           stop             ok
//! stopped ───────► starting ───────► running ───────► stopping ────► stopped
//!                     │                │  ▲              │
//!                     │ failure        │  │ pause/resume │ failure
//!                     ▼                ▼  │              ▼
//!                   error             paused           error
//! ```
//!
//! User operations are serialized by an operation lock, but the state
//! itself lives behind its own lock that is never held across an await,
//! so guest notifications (clean halt, fatal error, console output) are
//! applied even while a start or stop is in flight. The most recent
//! transition wins; notifications from an already-released handle are
//! dropped.
//!
//! `error` is terminal for the instance: the handle is released and the
//! failure message retained. Recovery is a fresh instance, not a retry.

use std::sync::Arc;
use std::time::Duration;

use skiff_hypervisor::{
    DEFAULT_DISPLAY_HEIGHT, DEFAULT_DISPLAY_WIDTH, DynHypervisorBackend, DynVmHandle, GuestEvent,
};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::builder::ConfigurationBuilder;
use crate::bundle::ConsoleLog;
use crate::error::{LifecycleError, StartFailure};
use crate::event::{Event, EventBus};
use crate::vm_config::VmConfig;

/// Default window for a start to complete before it is abandoned.
const DEFAULT_START_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of one VM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not running. The initial state, and the clean terminal state.
    Stopped,
    /// Start accepted; building, creating, and booting the instance.
    Starting,
    /// Guest is executing.
    Running,
    /// Guest execution is suspended.
    Paused,
    /// Stop accepted; waiting for the hypervisor to wind down.
    Stopping,
    /// Instance failed. Terminal; a new instance must be created.
    Error,
}

impl LifecycleState {
    /// Whether the instance may be holding hypervisor resources.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Paused | Self::Stopping
        )
    }

    /// Returns the state name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Options
// =============================================================================

/// Tunables applied to every instance a manager creates.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How long a start may take before the attempt is abandoned.
    pub start_timeout: Duration,
    /// Guest display width in pixels.
    pub graphics_width: u32,
    /// Guest display height in pixels.
    pub graphics_height: u32,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(DEFAULT_START_TIMEOUT_SECS),
            graphics_width: DEFAULT_DISPLAY_WIDTH,
            graphics_height: DEFAULT_DISPLAY_HEIGHT,
        }
    }
}

// =============================================================================
// Lifecycle manager
// =============================================================================

/// Mutable state of one instance.
///
/// Guarded by a lock that is never held across an await, so the event
/// pump can apply guest notifications while an operation is in flight.
struct VmState {
    lifecycle: LifecycleState,
    /// Live hypervisor handle, present from create until release.
    handle: Option<DynVmHandle>,
    /// Bumped every time a handle is installed. Guest notifications
    /// carry the generation they were pumped under and are dropped when
    /// it no longer matches.
    generation: u64,
    /// Message from the most recent failure.
    last_error: Option<String>,
    /// Cancels the event pump of the current handle.
    pump_cancel: Option<CancellationToken>,
}

impl VmState {
    fn new() -> Self {
        Self {
            lifecycle: LifecycleState::Stopped,
            handle: None,
            generation: 0,
            last_error: None,
            pump_cancel: None,
        }
    }

    /// Drops the handle and stops its event pump. Safe to call twice.
    fn release_handle(&mut self) {
        self.handle = None;
        if let Some(cancel) = self.pump_cancel.take() {
            cancel.cancel();
        }
    }
}

struct Inner {
    config: VmConfig,
    backend: DynHypervisorBackend,
    options: LifecycleOptions,
    bus: EventBus,
    console: Option<ConsoleLog>,
    state: RwLock<VmState>,
}

/// Owns one VM's state machine and its live hypervisor handle.
pub struct LifecycleManager {
    inner: Arc<Inner>,
    /// Serializes user operations. Guest notifications bypass this lock.
    op_lock: Mutex<()>,
}

impl LifecycleManager {
    /// Creates a manager with default options, a private event bus, and
    /// no console log.
    #[must_use]
    pub fn new(config: VmConfig, backend: DynHypervisorBackend) -> Self {
        Self::with_options(
            config,
            backend,
            LifecycleOptions::default(),
            EventBus::new(),
            None,
        )
    }

    /// Creates a fully wired manager.
    #[must_use]
    pub fn with_options(
        config: VmConfig,
        backend: DynHypervisorBackend,
        options: LifecycleOptions,
        bus: EventBus,
        console: Option<ConsoleLog>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                options,
                bus,
                console,
                state: RwLock::new(VmState::new()),
            }),
            op_lock: Mutex::new(()),
        }
    }

    /// The configuration this manager runs.
    #[must_use]
    pub fn config(&self) -> &VmConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LifecycleState {
        self.inner.state.read().await.lifecycle
    }

    /// Message from the most recent failure, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.state.read().await.last_error.clone()
    }

    /// Whether this instance ran and has come to rest.
    ///
    /// A freshly created manager is stopped but not finished; finished
    /// means at least one start happened and the VM is stopped again.
    pub async fn is_finished(&self) -> bool {
        let state = self.inner.state.read().await;
        state.lifecycle == LifecycleState::Stopped && state.generation > 0
    }

    /// Starts the VM.
    ///
    /// Builds a fresh runtime configuration, creates an instance, and
    /// boots it. On any failure the instance lands in the error state
    /// with the failure recorded, and the handle (if one was created) is
    /// released.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] unless the VM is
    /// stopped, or [`LifecycleError::StartFailed`] describing why the
    /// attempt ended in the error state.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let _op = self.op_lock.lock().await;

        {
            let mut state = self.inner.state.write().await;
            if state.lifecycle != LifecycleState::Stopped {
                return Err(LifecycleError::InvalidState {
                    operation: "start",
                    state: state.lifecycle,
                });
            }
            state.lifecycle = LifecycleState::Starting;
            state.last_error = None;
        }
        info!(vm_id = %self.inner.config.id, name = %self.inner.config.name, "starting VM");

        let builder = ConfigurationBuilder::new(self.inner.backend.capabilities())
            .with_graphics(
                self.inner.options.graphics_width,
                self.inner.options.graphics_height,
            );
        let runtime = match builder.build(&self.inner.config) {
            Ok(runtime) => runtime,
            Err(err) => return Err(self.fail_start(StartFailure::Build(err)).await),
        };

        let created = match self.inner.backend.create_vm(&runtime) {
            Ok(created) => created,
            Err(err) => return Err(self.fail_start(StartFailure::Hypervisor(err)).await),
        };

        let handle = Arc::clone(&created.handle);
        {
            let mut state = self.inner.state.write().await;
            state.generation += 1;
            state.handle = Some(created.handle);
            let cancel = CancellationToken::new();
            state.pump_cancel = Some(cancel.clone());
            tokio::spawn(pump_guest_events(
                Arc::clone(&self.inner),
                created.events,
                state.generation,
                cancel,
            ));
        }

        // Boot without holding the state lock so guest notifications
        // keep flowing while we wait.
        let boot = tokio::time::timeout(self.inner.options.start_timeout, handle.start()).await;
        match boot {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(self.fail_start(StartFailure::Hypervisor(err)).await),
            Err(_) => {
                return Err(self
                    .fail_start(StartFailure::Timeout(self.inner.options.start_timeout))
                    .await);
            }
        }

        let mut state = self.inner.state.write().await;
        match state.lifecycle {
            LifecycleState::Starting => {
                state.lifecycle = LifecycleState::Running;
                drop(state);
                info!(vm_id = %self.inner.config.id, name = %self.inner.config.name, "VM running");
                self.inner.bus.publish(Event::VmStarted {
                    id: self.inner.config.id,
                    name: self.inner.config.name.clone(),
                });
                Ok(())
            }
            LifecycleState::Error => {
                // A fatal guest notification won the race against the
                // boot call.
                let failure = StartFailure::Fatal(
                    state
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "guest failed during boot".to_string()),
                );
                drop(state);
                Err(LifecycleError::StartFailed(failure))
            }
            // The guest halted cleanly before the boot call returned;
            // that transition stands and the start itself succeeded.
            _ => Ok(()),
        }
    }

    /// Stops the VM.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] unless the VM is
    /// running, or [`LifecycleError::StopFailed`] when the hypervisor
    /// refuses; the instance is then in the error state.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let _op = self.op_lock.lock().await;

        let (handle, generation) = {
            let mut state = self.inner.state.write().await;
            if state.lifecycle != LifecycleState::Running {
                return Err(LifecycleError::InvalidState {
                    operation: "stop",
                    state: state.lifecycle,
                });
            }
            let Some(handle) = state.handle.clone() else {
                return Err(LifecycleError::InvalidState {
                    operation: "stop",
                    state: state.lifecycle,
                });
            };
            state.lifecycle = LifecycleState::Stopping;
            (handle, state.generation)
        };
        info!(vm_id = %self.inner.config.id, name = %self.inner.config.name, "stopping VM");

        match handle.stop().await {
            Ok(()) => {
                let mut state = self.inner.state.write().await;
                let newly_stopped = state.generation == generation && state.handle.is_some();
                if newly_stopped {
                    state.release_handle();
                    state.lifecycle = LifecycleState::Stopped;
                }
                drop(state);
                if newly_stopped {
                    info!(vm_id = %self.inner.config.id, name = %self.inner.config.name, "VM stopped");
                    self.inner.bus.publish(Event::VmStopped {
                        id: self.inner.config.id,
                        name: self.inner.config.name.clone(),
                    });
                }
                Ok(())
            }
            Err(err) => {
                let mut state = self.inner.state.write().await;
                if state.generation != generation || state.handle.is_none() {
                    // A guest notification applied first; its transition
                    // stands.
                    let stopped = state.lifecycle == LifecycleState::Stopped;
                    drop(state);
                    return if stopped {
                        Ok(())
                    } else {
                        Err(LifecycleError::StopFailed(err))
                    };
                }
                state.release_handle();
                state.lifecycle = LifecycleState::Error;
                state.last_error = Some(err.to_string());
                drop(state);
                error!(vm_id = %self.inner.config.id, error = %err, "VM stop failed");
                self.inner.bus.publish(Event::VmErrored {
                    id: self.inner.config.id,
                    message: err.to_string(),
                });
                Err(LifecycleError::StopFailed(err))
            }
        }
    }

    /// Suspends guest execution.
    ///
    /// A pause failure performs no state transition; the raw hypervisor
    /// error is surfaced unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] unless the VM is running
    /// and the host reports it pausable, or the hypervisor's own error.
    pub async fn pause(&self) -> Result<(), LifecycleError> {
        let _op = self.op_lock.lock().await;

        let handle = {
            let state = self.inner.state.read().await;
            if state.lifecycle != LifecycleState::Running {
                return Err(LifecycleError::InvalidState {
                    operation: "pause",
                    state: state.lifecycle,
                });
            }
            match state.handle.clone() {
                Some(handle) if handle.can_pause() => handle,
                _ => {
                    return Err(LifecycleError::InvalidState {
                        operation: "pause",
                        state: state.lifecycle,
                    });
                }
            }
        };

        handle.pause().await?;

        let mut state = self.inner.state.write().await;
        if state.lifecycle == LifecycleState::Running {
            state.lifecycle = LifecycleState::Paused;
            drop(state);
            info!(vm_id = %self.inner.config.id, "VM paused");
            self.inner.bus.publish(Event::VmPaused {
                id: self.inner.config.id,
            });
        }
        Ok(())
    }

    /// Resumes a paused guest.
    ///
    /// A resume failure performs no state transition; the raw hypervisor
    /// error is surfaced unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] unless the VM is paused,
    /// or the hypervisor's own error.
    pub async fn resume(&self) -> Result<(), LifecycleError> {
        let _op = self.op_lock.lock().await;

        let handle = {
            let state = self.inner.state.read().await;
            if state.lifecycle != LifecycleState::Paused {
                return Err(LifecycleError::InvalidState {
                    operation: "resume",
                    state: state.lifecycle,
                });
            }
            match state.handle.clone() {
                Some(handle) => handle,
                None => {
                    return Err(LifecycleError::InvalidState {
                        operation: "resume",
                        state: state.lifecycle,
                    });
                }
            }
        };

        handle.resume().await?;

        let mut state = self.inner.state.write().await;
        if state.lifecycle == LifecycleState::Paused {
            state.lifecycle = LifecycleState::Running;
            drop(state);
            info!(vm_id = %self.inner.config.id, "VM resumed");
            self.inner.bus.publish(Event::VmResumed {
                id: self.inner.config.id,
            });
        }
        Ok(())
    }

    /// Fails an in-flight start: error state, message retained, handle
    /// released.
    async fn fail_start(&self, failure: StartFailure) -> LifecycleError {
        let message = failure.to_string();
        {
            let mut state = self.inner.state.write().await;
            state.release_handle();
            state.lifecycle = LifecycleState::Error;
            state.last_error = Some(message.clone());
        }
        error!(vm_id = %self.inner.config.id, name = %self.inner.config.name, error = %message, "VM start failed");
        self.inner.bus.publish(Event::VmErrored {
            id: self.inner.config.id,
            message,
        });
        LifecycleError::StartFailed(failure)
    }
}

// =============================================================================
// Guest event pump
// =============================================================================

/// Applies guest notifications for one handle generation.
///
/// The pump runs until its handle is released, the channel closes, or a
/// terminal notification arrives. Notifications that lost a race against
/// a user operation (generation moved on, handle already gone) are
/// logged and dropped.
async fn pump_guest_events(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<GuestEvent>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            GuestEvent::ConsoleOutput(chunk) => {
                if let Some(console) = &inner.console {
                    if let Err(err) = console.append(&chunk) {
                        debug!(vm_id = %inner.config.id, error = %err, "console log write failed");
                    }
                }
            }
            GuestEvent::Stopped => {
                let mut state = inner.state.write().await;
                if state.generation != generation || state.handle.is_none() {
                    debug!(vm_id = %inner.config.id, "dropping stale guest stop notification");
                    break;
                }
                state.release_handle();
                state.lifecycle = LifecycleState::Stopped;
                drop(state);
                info!(vm_id = %inner.config.id, name = %inner.config.name, "guest halted");
                inner.bus.publish(Event::GuestHalted {
                    id: inner.config.id,
                });
                break;
            }
            GuestEvent::FatalError(message) => {
                let mut state = inner.state.write().await;
                if state.generation != generation || state.handle.is_none() {
                    debug!(vm_id = %inner.config.id, "dropping stale guest error notification");
                    break;
                }
                state.release_handle();
                state.lifecycle = LifecycleState::Error;
                state.last_error = Some(message.clone());
                drop(state);
                error!(vm_id = %inner.config.id, error = %message, "guest reported fatal error");
                inner.bus.publish(Event::VmErrored {
                    id: inner.config.id,
                    message,
                });
                break;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
