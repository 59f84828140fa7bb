//! The ember kernel.
//!
//! A [`Kernel`] is the whole operating system as one value: the simulated
//! machine and its interrupt controller, the thread system, the synchronous
//! device wrappers, the file system, the physical core map and the process
//! table, wired together at construction. Nothing reaches a collaborator
//! through ambient state; the one per-context exception is
//! [`thread::current_thread`], which answers "who am I" for the running
//! thread.
//!
//! The kernel is also the machine's trap handler: system calls, page faults
//! and read-only faults all arrive through [`TrapHandler::handle_trap`].

pub mod bitmap;
pub mod config;
pub mod console;
pub mod error;
pub mod fs;
pub mod sync;
pub mod syscall;
pub mod table;
pub mod thread;
pub mod vm;

#[cfg(test)]
pub(crate) mod test_support;

use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Weak};

use log::{error, info};

use ember_machine::{timer, Control, DeviceError, Exception, Machine, Statistics, TrapHandler};
use ember_machine::{Interrupt, TranslationEntry, PAGE_SIZE};

pub use config::{KernelConfig, ReplacementPolicy};
pub use error::{FsError, VmError};

use console::SynchConsole;
use fs::{FileSystem, SynchDisk};
use sync::Lock;
use syscall::ProcessTable;
use thread::{current_thread, ThreadSystem};
use vm::CoreMap;

pub struct Kernel {
    pub config: KernelConfig,
    pub interrupt: Arc<Interrupt>,
    pub stats: Arc<Statistics>,
    pub machine: Arc<Machine>,
    pub threads: Arc<ThreadSystem>,
    pub synch_disk: Arc<SynchDisk>,
    pub synch_console: Arc<SynchConsole>,
    pub file_system: Arc<FileSystem>,
    pub core_map: Arc<CoreMap>,
    pub process_table: ProcessTable,
    pub(crate) page_load_lock: Arc<Lock>,
    tlb_cursor: std::sync::atomic::AtomicUsize,
    weak_self: Weak<Kernel>,
}

impl Kernel {
    /// Bring the whole system up. The calling host thread becomes the
    /// kernel's main thread; all further kernel entry points must be used
    /// from kernel threads.
    pub fn new(
        config: KernelConfig,
        disk_image: &Path,
        console_source: Box<dyn Read + Send>,
        console_sink: Box<dyn Write + Send>,
        format: bool,
    ) -> Result<Arc<Self>, DeviceError> {
        let stats = Arc::new(Statistics::new());
        let interrupt = Arc::new(Interrupt::new(stats.clone()));
        interrupt.set_periodic_yield_enabled(!config.disable_periodic_yield);

        let machine = Machine::new(config.machine.clone(), interrupt.clone(), stats.clone());
        let threads = ThreadSystem::new(interrupt.clone(), machine.clone());
        threads.adopt_main("main");

        if let Some(quantum) = config.timer_quantum {
            timer::start(&interrupt, quantum);
        }

        let synch_disk = SynchDisk::new(&threads, &interrupt, &stats, disk_image)?;
        let synch_console = SynchConsole::new(&threads, &interrupt, &stats, console_source, console_sink);
        let file_system = FileSystem::new(threads.clone(), synch_disk.clone(), format);
        let core_map = CoreMap::new(
            config.machine.num_phys_pages,
            config.replacement,
            config.rng_seed,
        );
        let page_load_lock = Arc::new(Lock::new(&threads));

        let kernel = Arc::new_cyclic(|weak| Kernel {
            config,
            interrupt: interrupt.clone(),
            stats,
            machine,
            threads: threads.clone(),
            synch_disk,
            synch_console,
            file_system,
            core_map,
            process_table: ProcessTable::new(),
            page_load_lock,
            tlb_cursor: std::sync::atomic::AtomicUsize::new(0),
            weak_self: weak.clone(),
        });

        // Timer preemption reaches the scheduler through the controller's
        // deferred-yield hook.
        let hook_ts = Arc::downgrade(&threads);
        interrupt.set_yield_hook(Box::new(move || {
            if let Some(ts) = hook_ts.upgrade() {
                ts.yield_now();
            }
        }));

        info!("kernel initialized");
        Ok(kernel)
    }

    pub(crate) fn weak_self(&self) -> Weak<Kernel> {
        self.weak_self.clone()
    }

    /// Run the executable at `path` as a process and wait for its exit
    /// status.
    pub fn run_program(&self, path: &str, args: &[String]) -> Result<i32, FsError> {
        let args = (!args.is_empty()).then(|| args.to_vec());
        let (pid, child) = self.spawn_process(path, args)?;
        let status = self.threads.join(&child);
        self.process_table.release(pid);
        Ok(status)
    }

    /// Shut the machine down: report statistics and leave.
    pub fn halt(&self) -> ! {
        info!("machine halting\n{}", self.stats.report());
        std::process::exit(0);
    }

    /// The page-fault path: bring the page in (demand loading / swap) and,
    /// when a TLB is configured, refill a TLB slot for it.
    pub(crate) fn handle_page_fault(&self, bad_vaddr: u32) -> Control {
        Statistics::bump(&self.stats.num_page_faults);

        let Some(space) = current_thread().space() else {
            error!("page fault at {bad_vaddr:#x} outside any address space");
            return Control::Terminate(-1);
        };

        let vpn = bad_vaddr as usize / PAGE_SIZE;
        if vpn >= space.num_pages() {
            error!("page fault beyond the address space at {bad_vaddr:#x}");
            return Control::Terminate(-1);
        }
        let vpn = vpn as u32;

        if !space.page(vpn).valid {
            if let Err(e) = space.load_page(vpn) {
                error!("loading page {vpn} failed: {e}");
                return Control::Terminate(-1);
            }
        }

        if self.machine.uses_tlb() {
            self.refill_tlb(space.page(vpn), &space);
        }
        Control::Resume
    }

    fn refill_tlb(&self, entry: TranslationEntry, space: &Arc<vm::AddressSpace>) {
        let Some(tlb) = self.machine.tlb_snapshot() else { return };

        // Preserve use/dirty bits of whatever we push out, then prefer an
        // invalid slot and fall back to round-robin.
        let slot = match tlb.iter().position(|e| !e.valid) {
            Some(free) => free,
            None => {
                let slot = self.tlb_cursor.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                slot % tlb.len()
            }
        };
        if tlb[slot].valid {
            space.save_state(&self.machine);
        }
        self.machine.tlb_set(slot, entry);
    }
}

impl TrapHandler for Kernel {
    fn handle_trap(&self, exception: Exception) -> Control {
        match exception {
            Exception::Syscall => self.handle_syscall(),
            Exception::PageFault { bad_vaddr } => self.handle_page_fault(bad_vaddr),
            Exception::ReadOnlyFault { bad_vaddr } => {
                error!("write to read-only address {bad_vaddr:#x}; terminating process");
                Control::Terminate(-1)
            }
            other => {
                error!("unexpected user-mode exception: {other:?}");
                Control::Terminate(-1)
            }
        }
    }
}
