//! Unbuffered rendezvous channel carrying one machine word.
//!
//! Senders serialize on one lock, receivers on another; a two-semaphore
//! handshake pairs exactly one sender with exactly one receiver, so the
//! receiver observes the value written by its paired sender and the channel
//! keeps no state between transactions.

use std::sync::Arc;

use spin::Mutex;

use crate::sync::{Lock, Semaphore};
use crate::thread::ThreadSystem;

pub struct Channel {
    buffer: Mutex<i32>,
    send_lock: Lock,
    receive_lock: Lock,
    send_semaphore: Semaphore,
    receive_semaphore: Semaphore,
}

impl Channel {
    pub fn new(ts: &Arc<ThreadSystem>) -> Self {
        Self {
            buffer: Mutex::new(0),
            send_lock: Lock::new(ts),
            receive_lock: Lock::new(ts),
            send_semaphore: Semaphore::new(ts, 0),
            receive_semaphore: Semaphore::new(ts, 0),
        }
    }

    /// Deliver `message` to exactly one receiver, blocking until it has
    /// been taken.
    pub fn send(&self, message: i32) {
        self.send_lock.acquire();
        *self.buffer.lock() = message;
        self.receive_semaphore.v();
        self.send_semaphore.p();
        self.send_lock.release();
    }

    /// Take one message, blocking until a sender arrives.
    pub fn receive(&self) -> i32 {
        self.receive_lock.acquire();
        self.receive_semaphore.p();
        let message = *self.buffer.lock();
        self.send_semaphore.v();
        self.receive_lock.release();
        message
    }
}
