//! Physical frame occupancy map.
//!
//! One entry per frame: an occupancy bit plus a back-reference naming the
//! owning address space and the virtual page occupying the frame. The
//! back-references are weak so a dying address space can clear its own
//! frames from its drop path. The victim picker for page replacement lives
//! here too, because its state (FIFO cursor, clock hand, RNG) is a property
//! of physical memory, not of any one address space.
//!
//! Callers disable preemption around mutations.

use std::sync::{Arc, Weak};

use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spin::Mutex;

use ember_machine::Machine;

use crate::bitmap::Bitmap;
use crate::config::ReplacementPolicy;
use crate::thread::current_thread;
use crate::vm::AddressSpace;

struct CoreEntry {
    space: Weak<AddressSpace>,
    vpn: u32,
}

enum PickerState {
    Fifo { next: usize },
    Clock { hand: usize },
    Random { rng: StdRng },
}

struct CoreInner {
    bitmap: Bitmap,
    entries: Vec<CoreEntry>,
    picker: PickerState,
}

pub struct CoreMap {
    inner: Mutex<CoreInner>,
}

impl CoreMap {
    pub fn new(num_phys_pages: usize, policy: ReplacementPolicy, rng_seed: u64) -> Arc<Self> {
        let entries = (0..num_phys_pages)
            .map(|_| CoreEntry {
                space: Weak::new(),
                vpn: 0,
            })
            .collect();
        let picker = match policy {
            ReplacementPolicy::Fifo => PickerState::Fifo { next: 0 },
            ReplacementPolicy::Clock => PickerState::Clock { hand: 0 },
            ReplacementPolicy::Random => PickerState::Random {
                rng: StdRng::seed_from_u64(rng_seed),
            },
        };
        Arc::new(Self {
            inner: Mutex::new(CoreInner {
                bitmap: Bitmap::new(num_phys_pages),
                entries,
                picker,
            }),
        })
    }

    pub fn num_frames(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn count_clear(&self) -> usize {
        self.inner.lock().bitmap.count_clear()
    }

    /// Claim a free frame for `(space, vpn)`; `None` when memory is full.
    pub fn find(&self, space: &Arc<AddressSpace>, vpn: u32) -> Option<u32> {
        let mut inner = self.inner.lock();
        let frame = inner.bitmap.find()?;
        inner.entries[frame] = CoreEntry {
            space: Arc::downgrade(space),
            vpn,
        };
        trace!("frame {frame} claimed for vpn {vpn}");
        Some(frame as u32)
    }

    /// Record that `frame` now holds `(space, vpn)`, claiming it if free.
    pub fn mark(&self, frame: u32, space: &Arc<AddressSpace>, vpn: u32) {
        let mut inner = self.inner.lock();
        if !inner.bitmap.test(frame as usize) {
            inner.bitmap.mark(frame as usize);
        }
        inner.entries[frame as usize] = CoreEntry {
            space: Arc::downgrade(space),
            vpn,
        };
    }

    pub fn clear(&self, frame: u32) {
        let mut inner = self.inner.lock();
        inner.bitmap.clear(frame as usize);
        inner.entries[frame as usize] = CoreEntry {
            space: Weak::new(),
            vpn: 0,
        };
    }

    pub fn test(&self, frame: u32) -> bool {
        self.inner.lock().bitmap.test(frame as usize)
    }

    pub fn get_space(&self, frame: u32) -> Option<Arc<AddressSpace>> {
        self.inner.lock().entries[frame as usize].space.upgrade()
    }

    pub fn get_vpn(&self, frame: u32) -> u32 {
        self.inner.lock().entries[frame as usize].vpn
    }

    /// Choose a frame to evict. Syncs the current space's TLB bits into its
    /// page table first so the clock policy sees fresh use/dirty state.
    pub fn pick_victim(&self, machine: &Arc<Machine>) -> u32 {
        if machine.uses_tlb() {
            if let Some(space) = current_thread().space() {
                space.save_state(machine);
            }
        }

        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let frames = inner.entries.len();
        match &mut inner.picker {
            PickerState::Fifo { next } => {
                let victim = *next;
                *next = (*next + 1) % frames;
                victim as u32
            }
            PickerState::Random { rng } => rng.gen_range(0..frames) as u32,
            PickerState::Clock { hand } => clock_scan(&inner.entries, hand, frames, machine),
        }
    }
}

fn page_bits(entries: &[CoreEntry], frame: usize) -> Option<(Arc<AddressSpace>, u32, bool, bool)> {
    let space = entries[frame].space.upgrade()?;
    let vpn = entries[frame].vpn;
    let entry = space.page(vpn);
    Some((space, vpn, entry.use_, entry.dirty))
}

/// Enhanced clock: four passes over the frames. First a pass looking for
/// (use=0, dirty=0); then (use=0, dirty=1), clearing use bits (and their
/// TLB mirrors) along the way; then (use=1, dirty=0) over the now-cleared
/// bits; finally take whatever the hand rests on.
fn clock_scan(entries: &[CoreEntry], hand: &mut usize, frames: usize, machine: &Arc<Machine>) -> u32 {
    for _ in 0..frames {
        *hand = (*hand + 1) % frames;
        if let Some((_, _, use_, dirty)) = page_bits(entries, *hand) {
            if !use_ && !dirty {
                return *hand as u32;
            }
        }
    }

    for _ in 0..frames {
        *hand = (*hand + 1) % frames;
        if let Some((space, vpn, use_, dirty)) = page_bits(entries, *hand) {
            if !use_ && dirty {
                return *hand as u32;
            }
            space.clear_use(vpn);
            if machine.uses_tlb() {
                if let Some(tlb) = machine.tlb_snapshot() {
                    for (i, entry) in tlb.iter().enumerate() {
                        if entry.valid && entry.physical_page as usize == *hand {
                            let mut cleared = *entry;
                            cleared.use_ = false;
                            machine.tlb_set(i, cleared);
                            break;
                        }
                    }
                }
            }
        }
    }

    for _ in 0..frames {
        *hand = (*hand + 1) % frames;
        if let Some((_, _, _, dirty)) = page_bits(entries, *hand) {
            if !dirty {
                return *hand as u32;
            }
        }
    }

    *hand = (*hand + 1) % frames;
    *hand as u32
}
