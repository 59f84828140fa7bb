//! Bounded map from process id to the thread running that process. Ids are
//! claimed at exec time (before the thread exists, so the address space can
//! be built with its pid) and released when the process is reaped.

use std::sync::Arc;

use spin::Mutex;

use crate::thread::Thread;

pub const MAX_PROCESSES: usize = 32;

enum Slot {
    Free,
    Reserved,
    Occupied(Arc<Thread>),
}

pub struct ProcessTable {
    slots: Mutex<Vec<Slot>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PROCESSES);
        slots.resize_with(MAX_PROCESSES, || Slot::Free);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Claim the next free pid.
    pub fn reserve(&self) -> Option<u32> {
        let mut slots = self.slots.lock();
        let pid = slots.iter().position(|s| matches!(s, Slot::Free))?;
        slots[pid] = Slot::Reserved;
        Some(pid as u32)
    }

    /// Bind a reserved pid to its thread.
    pub fn install(&self, pid: u32, thread: Arc<Thread>) {
        let mut slots = self.slots.lock();
        assert!(
            matches!(slots[pid as usize], Slot::Reserved),
            "installing into a pid that was not reserved"
        );
        slots[pid as usize] = Slot::Occupied(thread);
    }

    pub fn get(&self, pid: u32) -> Option<Arc<Thread>> {
        let slots = self.slots.lock();
        match slots.get(pid as usize)? {
            Slot::Occupied(thread) => Some(thread.clone()),
            _ => None,
        }
    }

    pub fn release(&self, pid: u32) {
        self.slots.lock()[pid as usize] = Slot::Free;
    }

    /// One line per live process, for the `Ps` call.
    pub fn listing(&self) -> String {
        let slots = self.slots.lock();
        let mut out = String::new();
        for (pid, slot) in slots.iter().enumerate() {
            if let Slot::Occupied(thread) = slot {
                out.push_str(&format!(
                    "{pid:>4}  {:?}  {}\n",
                    thread.status(),
                    thread.name()
                ));
            }
        }
        out
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
