//! Per-process virtual memory.
//!
//! An address space is built from an executable image: code, initialized
//! data, and a fixed user-stack suffix, mapped by a linear page table the
//! MMU shares through a handle. Loading happens up front, on demand at
//! fault time, or with eviction to a per-process swap file, depending on
//! configuration.

use std::sync::Arc;

use ember_fs::SECTOR_SIZE;
use log::{debug, warn};
use spin::Mutex;

use ember_machine::{
    InterruptGuard, Machine, PageTableHandle, Register, Statistics, TranslationEntry, PAGE_SIZE,
};

use crate::bitmap::Bitmap;
use crate::error::VmError;
use crate::fs::{FileSystem, OpenFile};
use crate::sync::Lock;
use crate::thread::current_thread;
use crate::vm::core_map::CoreMap;
use crate::vm::executable::Executable;
use crate::Kernel;

/// Bytes of user stack appended past the loaded segments.
pub const USER_STACK_SIZE: usize = 1024;

struct SwapState {
    file: Arc<OpenFile>,
    bitmap: Mutex<Bitmap>,
    path: String,
}

pub struct AddressSpace {
    pid: u32,
    num_pages: usize,
    page_table: PageTableHandle,
    image: Executable,
    executable: Arc<OpenFile>,
    machine: Arc<Machine>,
    core_map: Arc<CoreMap>,
    fs: Arc<FileSystem>,
    stats: Arc<Statistics>,
    load_lock: Arc<Lock>,
    demand_loading: bool,
    swap: Option<SwapState>,
}

impl AddressSpace {
    /// Build the address space for `executable`, claiming frames up front
    /// unless demand loading is configured.
    pub fn new(kernel: &Kernel, executable: Arc<OpenFile>, pid: u32) -> Result<Arc<Self>, VmError> {
        let image = Executable::parse(&executable)?;
        let size = image.size() + USER_STACK_SIZE;
        let num_pages = size.div_ceil(PAGE_SIZE);
        debug!("initializing address space for pid {pid}: {num_pages} pages, {size} bytes");

        let swap = if kernel.config.swap {
            let path = format!("/SWAP.{pid}");
            kernel.file_system.create_file(&path, 0)?;
            let file = kernel.file_system.open(&path)?;
            Some(SwapState {
                file,
                bitmap: Mutex::new(Bitmap::new(num_pages)),
                path,
            })
        } else {
            if num_pages > kernel.core_map.count_clear() {
                return Err(VmError::OutOfMemory);
            }
            None
        };

        let entries = (0..num_pages)
            .map(|vpn| TranslationEntry {
                virtual_page: vpn as u32,
                ..Default::default()
            })
            .collect::<Vec<_>>();

        let space = Arc::new(Self {
            pid,
            num_pages,
            page_table: Arc::new(Mutex::new(entries)),
            image,
            executable,
            machine: kernel.machine.clone(),
            core_map: kernel.core_map.clone(),
            fs: kernel.file_system.clone(),
            stats: kernel.stats.clone(),
            load_lock: kernel.page_load_lock.clone(),
            demand_loading: kernel.config.demand_loading,
            swap,
        });

        if !kernel.config.demand_loading {
            for vpn in 0..num_pages as u32 {
                space.load_page(vpn)?;
            }
        }
        Ok(space)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Copy of one translation record.
    pub fn page(&self, vpn: u32) -> TranslationEntry {
        self.page_table.lock()[vpn as usize]
    }

    pub(crate) fn clear_use(&self, vpn: u32) {
        self.page_table.lock()[vpn as usize].use_ = false;
    }

    /// Bring `vpn` into a physical frame: from swap if it was evicted
    /// there, otherwise zero-filled with the intersecting pieces of the
    /// code and initialized-data segments read from the image.
    pub fn load_page(self: &Arc<Self>, vpn: u32) -> Result<(), VmError> {
        if vpn as usize >= self.num_pages {
            return Err(VmError::BadVirtualPage);
        }

        self.load_lock.acquire();
        let result = self.load_page_locked(vpn);
        self.load_lock.release();
        result
    }

    fn load_page_locked(self: &Arc<Self>, vpn: u32) -> Result<(), VmError> {
        let frame = {
            let _guard = InterruptGuard::new(&self.fs.thread_system().interrupt);
            self.core_map.find(self, vpn)
        };
        let frame = match frame {
            Some(frame) => frame,
            None => {
                assert!(
                    self.swap.is_some(),
                    "physical memory exhausted with swapping disabled"
                );
                self.free_frame_for(vpn)
            }
        };

        {
            let mut table = self.page_table.lock();
            table[vpn as usize] = TranslationEntry {
                virtual_page: vpn,
                physical_page: frame,
                valid: true,
                use_: false,
                dirty: false,
                read_only: false,
            };
        }

        let base = frame as usize * PAGE_SIZE;
        if let Some(swap) = &self.swap {
            if swap.bitmap.lock().test(vpn as usize) {
                debug!("pid {}: reloading page {vpn} from swap", self.pid);
                let mut buffer = [0u8; PAGE_SIZE];
                let read = swap.file.read_at(&mut buffer, vpn as usize * PAGE_SIZE);
                assert_eq!(read, PAGE_SIZE, "swap file truncated");
                self.machine.write_phys(base, &buffer);
                Statistics::bump(&self.stats.num_pages_loaded_from_swap);
                return Ok(());
            }
        }

        debug!("pid {}: loading page {vpn} from the executable", self.pid);
        self.machine.zero_frame(frame);

        let page_start = vpn as usize * PAGE_SIZE;
        for (segment, from_code) in [(self.image.code(), true), (self.image.init_data(), false)] {
            let seg_start = segment.virtual_addr as usize;
            let seg_end = seg_start + segment.size as usize;
            if segment.size == 0 || page_start + PAGE_SIZE <= seg_start || page_start >= seg_end {
                continue;
            }

            let virtual_addr = page_start.max(seg_start);
            let offset = virtual_addr - seg_start;
            let count = (PAGE_SIZE - virtual_addr % PAGE_SIZE).min(seg_end - virtual_addr);

            let mut buffer = vec![0u8; count];
            let read = if from_code {
                self.image.read_code_block(&self.executable, &mut buffer, offset)
            } else {
                self.image.read_data_block(&self.executable, &mut buffer, offset)
            };
            if read != count {
                return Err(VmError::BadImage);
            }
            self.machine.write_phys(base + virtual_addr % PAGE_SIZE, &buffer);
        }
        Ok(())
    }

    /// Evict somebody (possibly ourselves) and hand the freed frame to
    /// `vpn`.
    fn free_frame_for(self: &Arc<Self>, vpn: u32) -> u32 {
        let victim = self.core_map.pick_victim(&self.machine);
        let victim_space = self
            .core_map
            .get_space(victim)
            .expect("picked a victim frame with no owner");
        let victim_vpn = self.core_map.get_vpn(victim);
        debug!(
            "evicting frame {victim} (pid {} vpn {victim_vpn}) for pid {} vpn {vpn}",
            victim_space.pid, self.pid
        );

        // Pull authoritative use/dirty bits out of the TLB before the
        // owner's entry goes invalid.
        if self.machine.uses_tlb() {
            let current_space = current_thread().space();
            if current_space.is_some_and(|s| Arc::ptr_eq(&s, &victim_space)) {
                if let Some(tlb) = self.machine.tlb_snapshot() {
                    for (i, entry) in tlb.iter().enumerate() {
                        if entry.valid && entry.virtual_page == victim_vpn {
                            let mut table = victim_space.page_table.lock();
                            table[victim_vpn as usize].use_ = entry.use_;
                            table[victim_vpn as usize].dirty = entry.dirty;
                            drop(table);
                            let mut invalidated = *entry;
                            invalidated.valid = false;
                            self.machine.tlb_set(i, invalidated);
                            break;
                        }
                    }
                }
            }
        }

        victim_space.send_page_to_swap(victim_vpn);
        {
            let _guard = InterruptGuard::new(&self.fs.thread_system().interrupt);
            self.core_map.mark(victim, self, vpn);
        }
        victim
    }

    /// Push `vpn` out to the swap file. Skips the write when the page is
    /// clean and the swap copy is already current.
    fn send_page_to_swap(&self, vpn: u32) {
        let swap = self.swap.as_ref().expect("eviction without a swap file");

        let (frame, dirty) = {
            let mut table = self.page_table.lock();
            let entry = table[vpn as usize];
            if !entry.valid {
                return;
            }
            table[vpn as usize].valid = false;
            table[vpn as usize].dirty = false;
            (entry.physical_page, entry.dirty)
        };

        let already_swapped = swap.bitmap.lock().test(vpn as usize);
        if !dirty && already_swapped {
            return;
        }

        debug!("pid {}: sending page {vpn} to swap", self.pid);
        let mut buffer = [0u8; PAGE_SIZE];
        self.machine.read_phys(frame as usize * PAGE_SIZE, &mut buffer);
        let written = swap.file.write_at(&buffer, vpn as usize * PAGE_SIZE);
        assert_eq!(written, PAGE_SIZE, "swap write truncated");
        swap.bitmap.lock().mark(vpn as usize);
        Statistics::bump(&self.stats.num_pages_sent_to_swap);
    }

    /// Set up the machine registers for a fresh run of this program.
    pub fn init_registers(&self, machine: &Machine) {
        let zeroed = [0u32; ember_machine::NUM_TOTAL_REGS];
        machine.restore_registers(&zeroed);
        machine.write_register(Register::PC, 0);
        machine.write_register(Register::NEXT_PC, 4);
        // Leave a little slack below the very top of the stack.
        let stack_top = (self.num_pages * PAGE_SIZE - 16) as u32;
        machine.write_register(Register::SP, stack_top);
        debug!("pid {}: stack register initialized to {stack_top:#x}", self.pid);
    }

    /// Propagate authoritative TLB bits back into the page table on a
    /// switch away from this space.
    pub fn save_state(&self, machine: &Machine) {
        if let Some(tlb) = machine.tlb_snapshot() {
            let mut table = self.page_table.lock();
            for entry in tlb.iter().filter(|e| e.valid) {
                let row = &mut table[entry.virtual_page as usize];
                row.use_ = entry.use_;
                row.dirty = entry.dirty;
            }
        }
    }

    /// Install this space's translation state on a switch in.
    pub fn restore_state(&self, machine: &Machine) {
        if machine.uses_tlb() {
            machine.tlb_invalidate_all();
        } else {
            machine.set_page_table(self.page_table.clone());
        }
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        debug!("deallocating address space of pid {}", self.pid);

        let frames: Vec<u32> = {
            let table = self.page_table.lock();
            table.iter().filter(|e| e.valid).map(|e| e.physical_page).collect()
        };
        {
            let _guard = InterruptGuard::new(&self.fs.thread_system().interrupt);
            for frame in frames {
                self.core_map.clear(frame);
            }
        }

        if let Some(swap) = self.swap.take() {
            if self.fs.remove_file(&swap.path).is_err() {
                warn!("could not remove swap file {}", swap.path);
            }
            self.fs.close(&swap.file);
        }
        self.fs.close(&self.executable);
    }
}

// PAGE_SIZE is tied to the sector size so a page travels as one sector.
const _: () = assert!(PAGE_SIZE == SECTOR_SIZE);
