//! Shared fixtures for kernel unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ember_machine::{Interrupt, Machine, MachineConfig, Statistics};

use crate::config::KernelConfig;
use crate::thread::ThreadSystem;
use crate::Kernel;

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A disk image file that cleans up after the test.
pub(crate) struct ScratchDisk {
    pub path: PathBuf,
}

impl ScratchDisk {
    pub(crate) fn new(tag: &str) -> Self {
        let serial = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("ember-test-{}-{serial}-{tag}.img", std::process::id()));
        Self { path }
    }
}

impl Drop for ScratchDisk {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A bare thread system with no devices, for scheduler and sync tests.
/// The calling thread becomes the main kernel thread.
pub(crate) fn boot_thread_system() -> Arc<ThreadSystem> {
    let stats = Arc::new(Statistics::new());
    let interrupt = Arc::new(Interrupt::new(stats.clone()));
    let machine = Machine::new(
        MachineConfig {
            num_phys_pages: 8,
            use_tlb: false,
        },
        interrupt.clone(),
        stats,
    );
    let ts = ThreadSystem::new(interrupt, machine);
    ts.adopt_main("test-main");
    ts
}

pub(crate) struct KernelFixture {
    pub kernel: Arc<Kernel>,
    _disk: ScratchDisk,
}

/// A fully wired kernel over a freshly formatted scratch disk.
pub(crate) fn boot_kernel(tag: &str, config: KernelConfig) -> KernelFixture {
    let disk = ScratchDisk::new(tag);
    let kernel = Kernel::new(
        config,
        &disk.path,
        Box::new(std::io::empty()),
        Box::new(std::io::sink()),
        true,
    )
    .expect("kernel bootstrap failed");
    KernelFixture {
        kernel,
        _disk: disk,
    }
}

pub(crate) fn default_kernel(tag: &str) -> KernelFixture {
    boot_kernel(tag, KernelConfig::default())
}
