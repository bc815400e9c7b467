//! Events a running guest pushes back to its owner.

/// An asynchronous notification from the hypervisor about a live VM.
///
/// Events are delivered on the single-consumer channel returned by
/// [`HypervisorBackend::create_vm`](crate::HypervisorBackend::create_vm)
/// and belong to exactly one VM handle; once that handle is released,
/// remaining events are stale and must be ignored.
#[derive(Debug, Clone)]
pub enum GuestEvent {
    /// The guest shut itself down cleanly.
    Stopped,
    /// The hypervisor hit an unrecoverable runtime error.
    FatalError(String),
    /// One line of guest console output.
    ConsoleOutput(String),
}
