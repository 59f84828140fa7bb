//! Multiple-reader / single-writer lock with writer priority: readers stand
//! aside while any writer waits or writes. A thread holding the write side
//! may call the read-side operations; they are no-ops for it.

use std::sync::Arc;

use spin::Mutex;

use crate::sync::{Condition, Lock};
use crate::thread::{current_thread, Thread, ThreadSystem};

struct RwState {
    active_readers: u32,
    waiting_writers: u32,
    active_writer: Option<Arc<Thread>>,
}

pub struct RwLock {
    lock: Arc<Lock>,
    condition: Condition,
    state: Mutex<RwState>,
}

impl RwLock {
    pub fn new(ts: &Arc<ThreadSystem>) -> Self {
        let lock = Arc::new(Lock::new(ts));
        Self {
            condition: Condition::new(ts, lock.clone()),
            lock,
            state: Mutex::new(RwState {
                active_readers: 0,
                waiting_writers: 0,
                active_writer: None,
            }),
        }
    }

    fn current_is_active_writer(&self) -> bool {
        self.state
            .lock()
            .active_writer
            .as_ref()
            .is_some_and(|w| Arc::ptr_eq(w, &current_thread()))
    }

    pub fn acquire_read(&self) {
        if self.current_is_active_writer() {
            return;
        }

        self.lock.acquire();
        while {
            let state = self.state.lock();
            state.waiting_writers > 0 || state.active_writer.is_some()
        } {
            self.condition.wait();
        }
        {
            let mut state = self.state.lock();
            assert!(state.active_writer.is_none());
            state.active_readers += 1;
        }
        self.lock.release();
    }

    pub fn release_read(&self) {
        if self.current_is_active_writer() {
            return;
        }

        self.lock.acquire();
        let last_reader = {
            let mut state = self.state.lock();
            assert!(state.active_writer.is_none() && state.active_readers > 0);
            state.active_readers -= 1;
            state.active_readers == 0
        };
        if last_reader {
            self.condition.broadcast();
        }
        self.lock.release();
    }

    pub fn acquire_write(&self) {
        self.lock.acquire();
        self.state.lock().waiting_writers += 1;
        while {
            let state = self.state.lock();
            state.active_readers > 0 || state.active_writer.is_some()
        } {
            self.condition.wait();
        }
        {
            let mut state = self.state.lock();
            assert!(state.active_readers == 0 && state.active_writer.is_none());
            state.waiting_writers -= 1;
            state.active_writer = Some(current_thread());
        }
        self.lock.release();
    }

    pub fn release_write(&self) {
        self.lock.acquire();
        {
            let mut state = self.state.lock();
            assert!(state.active_readers == 0);
            assert!(
                state.active_writer.as_ref().is_some_and(|w| Arc::ptr_eq(w, &current_thread())),
                "write lock released by non-writer"
            );
            state.active_writer = None;
        }
        self.condition.broadcast();
        self.lock.release();
    }
}
