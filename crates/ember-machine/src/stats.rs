//! Performance counters maintained across the machine and the kernel.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Statistics {
    pub total_ticks: AtomicU64,
    pub idle_ticks: AtomicU64,
    pub num_instructions: AtomicU64,
    pub num_disk_reads: AtomicU64,
    pub num_disk_writes: AtomicU64,
    pub num_console_chars_read: AtomicU64,
    pub num_console_chars_written: AtomicU64,
    pub num_page_faults: AtomicU64,
    pub num_pages_sent_to_swap: AtomicU64,
    pub num_pages_loaded_from_swap: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> String {
        format!(
            "ticks: total {}, idle {}\n\
             instructions executed: {}\n\
             disk i/o: {} reads, {} writes\n\
             console i/o: {} chars read, {} chars written\n\
             paging: {} faults, {} pages to swap, {} pages from swap",
            self.total_ticks.load(Ordering::Relaxed),
            self.idle_ticks.load(Ordering::Relaxed),
            self.num_instructions.load(Ordering::Relaxed),
            self.num_disk_reads.load(Ordering::Relaxed),
            self.num_disk_writes.load(Ordering::Relaxed),
            self.num_console_chars_read.load(Ordering::Relaxed),
            self.num_console_chars_written.load(Ordering::Relaxed),
            self.num_page_faults.load(Ordering::Relaxed),
            self.num_pages_sent_to_swap.load(Ordering::Relaxed),
            self.num_pages_loaded_from_swap.load(Ordering::Relaxed),
        )
    }
}
