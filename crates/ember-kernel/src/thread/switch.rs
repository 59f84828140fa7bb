//! The low-level context switch.
//!
//! Every kernel thread is a host thread gated by a baton: a thread runs only
//! while it holds its baton, and a switch is "pass the successor's baton,
//! then wait on your own". The flag absorbs the race where a baton is passed
//! before its owner has started waiting, and the loop absorbs spurious
//! unparks.

use std::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

pub(crate) struct Baton {
    ready: AtomicBool,
    host: Mutex<Option<std::thread::Thread>>,
}

impl Baton {
    pub(crate) fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            host: Mutex::new(None),
        }
    }

    /// Register the calling host thread as this baton's owner. Must happen
    /// before the first `wait`.
    pub(crate) fn bind(&self) {
        *self.host.lock() = Some(std::thread::current());
    }

    /// Hand the baton to its owner, unblocking its `wait`.
    pub(crate) fn pass(&self) {
        self.ready.store(true, Ordering::Release);
        if let Some(host) = self.host.lock().as_ref() {
            host.unpark();
        }
    }

    /// Block the calling host thread until the baton is passed.
    pub(crate) fn wait(&self) {
        while !self.ready.swap(false, Ordering::Acquire) {
            std::thread::park();
        }
    }
}
