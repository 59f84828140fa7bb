//! Mesa-style condition variable over a queue of private per-wait
//! semaphores. Signals wake without handing over the lock, and are lost
//! when nobody waits.

use std::collections::VecDeque;
use std::sync::Arc;

use spin::Mutex;

use crate::sync::{Lock, Semaphore};
use crate::thread::ThreadSystem;

pub struct Condition {
    ts: Arc<ThreadSystem>,
    lock: Arc<Lock>,
    queue: Mutex<VecDeque<Arc<Semaphore>>>,
}

impl Condition {
    pub fn new(ts: &Arc<ThreadSystem>, lock: Arc<Lock>) -> Self {
        Self {
            ts: ts.clone(),
            lock,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Atomically release the associated lock, suspend, and reacquire
    /// before returning.
    pub fn wait(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition waited without its lock"
        );

        let semaphore = Arc::new(Semaphore::new(&self.ts, 0));
        self.queue.lock().push_back(semaphore.clone());

        self.lock.release();
        semaphore.p();
        self.lock.acquire();
    }

    /// Wake one waiter, if any.
    pub fn signal(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition signaled without its lock"
        );
        if let Some(semaphore) = self.queue.lock().pop_front() {
            semaphore.v();
        }
    }

    /// Wake every current waiter.
    pub fn broadcast(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition broadcast without its lock"
        );
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(semaphore) => semaphore.v(),
                None => break,
            }
        }
    }
}
