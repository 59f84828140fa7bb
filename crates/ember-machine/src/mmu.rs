//! Memory management unit: translation through a linear page table or a
//! software-managed TLB, with use/dirty maintenance.

use std::sync::Arc;

use spin::Mutex;

use crate::trap::Exception;

/// Page size in bytes. Tied to the disk sector size so one page travels as
/// one sector on the swap path.
pub const PAGE_SIZE: usize = crate::disk::SECTOR_SIZE;

/// Entries in the TLB when one is configured.
pub const TLB_SIZE: usize = 16;

/// One translation record. `use_` and `dirty` are maintained by the
/// hardware on access; the TLB copy is authoritative while a TLB entry is
/// valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: u32,
    pub physical_page: u32,
    pub valid: bool,
    pub use_: bool,
    pub dirty: bool,
    pub read_only: bool,
}

/// Shared handle to an address space's page table. The kernel installs it
/// with [`Mmu::set_page_table`]; both sides then observe the same entries.
pub type PageTableHandle = Arc<Mutex<Vec<TranslationEntry>>>;

pub(crate) struct Mmu {
    page_table: Option<PageTableHandle>,
    tlb: Option<[TranslationEntry; TLB_SIZE]>,
    num_phys_pages: usize,
}

impl Mmu {
    pub(crate) fn new(use_tlb: bool, num_phys_pages: usize) -> Self {
        Self {
            page_table: None,
            tlb: use_tlb.then(|| [TranslationEntry::default(); TLB_SIZE]),
            num_phys_pages,
        }
    }

    pub(crate) fn set_page_table(&mut self, table: PageTableHandle) {
        self.page_table = Some(table);
    }

    pub(crate) fn tlb(&self) -> Option<&[TranslationEntry; TLB_SIZE]> {
        self.tlb.as_ref()
    }

    pub(crate) fn tlb_mut(&mut self) -> Option<&mut [TranslationEntry; TLB_SIZE]> {
        self.tlb.as_mut()
    }

    /// Translate a virtual address, recording the access in the matching
    /// entry. Returns the physical byte offset.
    pub(crate) fn translate(&mut self, vaddr: u32, size: usize, writing: bool) -> Result<usize, Exception> {
        if (size == 2 && vaddr % 2 != 0) || (size == 4 && vaddr % 4 != 0) {
            return Err(Exception::MisalignedAccess { bad_vaddr: vaddr });
        }

        let vpn = vaddr as usize / PAGE_SIZE;
        let offset = vaddr as usize % PAGE_SIZE;

        let physical_page = if let Some(tlb) = self.tlb.as_mut() {
            let entry = tlb
                .iter_mut()
                .find(|e| e.valid && e.virtual_page as usize == vpn)
                .ok_or(Exception::PageFault { bad_vaddr: vaddr })?;
            if entry.read_only && writing {
                return Err(Exception::ReadOnlyFault { bad_vaddr: vaddr });
            }
            entry.use_ = true;
            if writing {
                entry.dirty = true;
            }
            entry.physical_page
        } else {
            let table = self
                .page_table
                .as_ref()
                .ok_or(Exception::BusError { bad_vaddr: vaddr })?;
            let mut table = table.lock();
            if vpn >= table.len() {
                return Err(Exception::AddressError { bad_vaddr: vaddr });
            }
            let entry = &mut table[vpn];
            if !entry.valid {
                return Err(Exception::PageFault { bad_vaddr: vaddr });
            }
            if entry.read_only && writing {
                return Err(Exception::ReadOnlyFault { bad_vaddr: vaddr });
            }
            entry.use_ = true;
            if writing {
                entry.dirty = true;
            }
            entry.physical_page
        };

        if physical_page as usize >= self.num_phys_pages {
            return Err(Exception::BusError { bad_vaddr: vaddr });
        }
        Ok(physical_page as usize * PAGE_SIZE + offset)
    }
}
