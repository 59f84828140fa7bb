//! Mutual exclusion built on a binary semaphore, with single-hop priority
//! inheritance: acquiring against a lower-priority holder raises the holder
//! to the caller's priority until it releases.

use std::sync::Arc;

use spin::Mutex;

use crate::sync::Semaphore;
use crate::thread::{current_thread, Thread, ThreadSystem};

pub struct Lock {
    ts: Arc<ThreadSystem>,
    semaphore: Semaphore,
    holder: Mutex<Option<Arc<Thread>>>,
}

impl Lock {
    pub fn new(ts: &Arc<ThreadSystem>) -> Self {
        Self {
            ts: ts.clone(),
            semaphore: Semaphore::new(ts, 1),
            holder: Mutex::new(None),
        }
    }

    /// Recursive acquisition is a kernel bug.
    pub fn acquire(&self) {
        assert!(!self.is_held_by_current_thread(), "lock acquired recursively");

        let caller_priority = current_thread().priority();
        if let Some(holder) = self.holder.lock().clone() {
            if caller_priority.outranks(holder.priority()) {
                self.ts.prioritize(&holder, caller_priority);
            }
        }

        self.semaphore.p();
        *self.holder.lock() = Some(current_thread());
    }

    pub fn release(&self) {
        assert!(self.is_held_by_current_thread(), "lock released by non-holder");

        let current = current_thread();
        if current.priority() != current.original_priority() {
            self.ts.restore_original_priority(&current);
        }

        *self.holder.lock() = None;
        self.semaphore.v();
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.holder
            .lock()
            .as_ref()
            .is_some_and(|holder| Arc::ptr_eq(holder, &current_thread()))
    }
}
