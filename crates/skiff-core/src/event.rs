//! Event system for observing VM lifecycle changes.

use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle events published by the registry and its managers.
#[derive(Debug, Clone)]
pub enum Event {
    /// VM added to the library.
    VmAdded { id: Uuid, name: String },
    /// VM reached the running state.
    VmStarted { id: Uuid, name: String },
    /// VM stopped on request.
    VmStopped { id: Uuid, name: String },
    /// VM execution suspended.
    VmPaused { id: Uuid },
    /// VM execution resumed.
    VmResumed { id: Uuid },
    /// Guest shut itself down cleanly.
    GuestHalted { id: Uuid },
    /// VM entered the error state.
    VmErrored { id: Uuid, message: String },
    /// A recorded error was discarded.
    ErrorCleared { id: Uuid },
    /// VM removed from the library.
    VmRemoved { id: Uuid },
}

/// Event bus for system-wide event distribution.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new event bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Publishes an event. Delivery is best-effort; an event published
    /// with no subscribers is dropped.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
