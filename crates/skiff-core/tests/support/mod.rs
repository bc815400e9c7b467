//! Shared test fixtures: an in-memory hypervisor backend whose failure
//! behavior is scripted per test through atomic flags.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use skiff_core::{Event, VmConfig};
use skiff_hypervisor::{
    CreatedVm, GuestEvent, HostCapabilities, HypervisorBackend, HypervisorError, RuntimeConfig,
    VmHandle,
};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Routes tracing output to the test writer; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Fake Hypervisor
// ============================================================================

/// Per-test failure switches shared between the backend and its handles.
#[derive(Debug, Default)]
pub struct FakeFlags {
    pub fail_create: AtomicBool,
    pub fail_start: AtomicBool,
    /// Makes `start` sleep for an hour, for timeout tests under a
    /// paused clock.
    pub hang_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_pause: AtomicBool,
    pub fail_resume: AtomicBool,
    pub pausable: AtomicBool,
}

/// Scriptable in-memory hypervisor.
pub struct FakeBackend {
    capabilities: HostCapabilities,
    flags: Arc<FakeFlags>,
    created: AtomicUsize,
    senders: Mutex<Vec<mpsc::UnboundedSender<GuestEvent>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let flags = FakeFlags::default();
        flags.pausable.store(true, Ordering::SeqCst);
        Arc::new(Self {
            capabilities: HostCapabilities {
                max_cpu_count: 8,
                max_memory_size: 16 * GIB,
            },
            flags: Arc::new(flags),
            created: AtomicUsize::new(0),
            senders: Mutex::new(Vec::new()),
        })
    }

    pub fn flags(&self) -> &FakeFlags {
        &self.flags
    }

    /// How many VMs the backend has instantiated.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Guest-notification sender of the most recently created VM.
    pub fn events_sender(&self) -> mpsc::UnboundedSender<GuestEvent> {
        self.senders
            .lock()
            .unwrap()
            .last()
            .expect("no VM created yet")
            .clone()
    }

    /// Guest-notification sender of the nth created VM.
    pub fn events_sender_at(&self, index: usize) -> mpsc::UnboundedSender<GuestEvent> {
        self.senders.lock().unwrap()[index].clone()
    }
}

impl HypervisorBackend for FakeBackend {
    fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    fn create_vm(&self, _config: &RuntimeConfig) -> skiff_hypervisor::Result<CreatedVm> {
        if self.flags.fail_create.load(Ordering::SeqCst) {
            return Err(HypervisorError::OperationFailed(
                "host refused to allocate the VM".to_string(),
            ));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let (sender, events) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(sender);
        Ok(CreatedVm {
            handle: Arc::new(FakeVm {
                flags: Arc::clone(&self.flags),
            }),
            events,
        })
    }
}

struct FakeVm {
    flags: Arc<FakeFlags>,
}

#[async_trait]
impl VmHandle for FakeVm {
    async fn start(&self) -> skiff_hypervisor::Result<()> {
        if self.flags.hang_start.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.flags.fail_start.load(Ordering::SeqCst) {
            return Err(HypervisorError::OperationFailed(
                "guest refused to boot".to_string(),
            ));
        }
        Ok(())
    }

    async fn stop(&self) -> skiff_hypervisor::Result<()> {
        if self.flags.fail_stop.load(Ordering::SeqCst) {
            return Err(HypervisorError::OperationFailed(
                "guest refused to stop".to_string(),
            ));
        }
        Ok(())
    }

    async fn pause(&self) -> skiff_hypervisor::Result<()> {
        if self.flags.fail_pause.load(Ordering::SeqCst) {
            return Err(HypervisorError::OperationFailed(
                "guest refused to pause".to_string(),
            ));
        }
        Ok(())
    }

    async fn resume(&self) -> skiff_hypervisor::Result<()> {
        if self.flags.fail_resume.load(Ordering::SeqCst) {
            return Err(HypervisorError::OperationFailed(
                "guest refused to resume".to_string(),
            ));
        }
        Ok(())
    }

    fn can_pause(&self) -> bool {
        self.flags.pausable.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A configuration whose disk image exists for as long as the held
/// temporary directory does.
pub struct TestVm {
    pub dir: TempDir,
    pub config: VmConfig,
}

pub fn test_vm(name: &str) -> TestVm {
    let dir = tempfile::tempdir().unwrap();
    let disk = dir.path().join("disk.img");
    std::fs::write(&disk, b"").unwrap();
    let config = VmConfig::new(name, 2, 2 * GIB, &disk);
    TestVm { dir, config }
}

pub fn disk_path(dir: &TempDir) -> PathBuf {
    dir.path().join("disk.img")
}

/// Drains the receiver until an event matches, or panics after 5s.
pub async fn expect_event<F>(rx: &mut broadcast::Receiver<Event>, matches: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event was never published")
}
