//! Counting semaphore, the primitive at the bottom of the stack.
//!
//! Atomicity comes from disabling simulated interrupts around the counter
//! and queue updates; this is the only primitive that touches the interrupt
//! mask directly. Waiters are woken in FIFO order.

use std::collections::VecDeque;
use std::sync::Arc;

use spin::Mutex;

use ember_machine::IntLevel;

use crate::thread::{current_thread, Thread, ThreadSystem};

struct SemState {
    count: u32,
    queue: VecDeque<Arc<Thread>>,
}

pub struct Semaphore {
    ts: Arc<ThreadSystem>,
    state: Mutex<SemState>,
}

impl Semaphore {
    pub fn new(ts: &Arc<ThreadSystem>, initial: u32) -> Self {
        Self {
            ts: ts.clone(),
            state: Mutex::new(SemState {
                count: initial,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Decrement, blocking while the count is zero.
    pub fn p(&self) {
        let old = self.ts.interrupt.set_level(IntLevel::Off);
        let mut state = self.state.lock();
        while state.count == 0 {
            state.queue.push_back(current_thread());
            drop(state);
            self.ts.sleep_current();
            state = self.state.lock();
        }
        state.count -= 1;
        drop(state);
        self.ts.interrupt.set_level(old);
    }

    /// Increment, waking the longest-blocked waiter if any.
    pub fn v(&self) {
        let old = self.ts.interrupt.set_level(IntLevel::Off);
        let woken = {
            let mut state = self.state.lock();
            state.count += 1;
            state.queue.pop_front()
        };
        if let Some(thread) = woken {
            self.ts.ready_to_run(&thread);
        }
        self.ts.interrupt.set_level(old);
    }
}
