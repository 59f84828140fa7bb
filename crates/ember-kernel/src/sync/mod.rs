//! Kernel synchronization primitives.
//!
//! The semaphore is the base case: it is the one primitive that manipulates
//! the interrupt mask. Locks are binary semaphores with an owner and
//! priority inheritance, conditions are Mesa-style over private semaphores,
//! the reader/writer lock favors writers, and the channel is a synchronous
//! rendezvous.

mod channel;
mod condition;
mod lock;
mod rwlock;
mod semaphore;

pub use channel::Channel;
pub use condition::Condition;
pub use lock::Lock;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::boot_thread_system;
    use crate::thread::Priority;
    use spin::Mutex;
    use std::sync::Arc;

    #[test]
    fn semaphore_wakes_waiters_in_fifo_order() {
        let ts = boot_thread_system();
        let sem = Arc::new(Semaphore::new(&ts, 0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let waiters: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|tag| {
                let sem = sem.clone();
                let order = order.clone();
                ts.fork(tag, true, Priority::Normal, move || {
                    sem.p();
                    order.lock().push(tag);
                    0
                })
            })
            .collect();

        // Let both waiters block, then release them in turn.
        ts.yield_now();
        sem.v();
        sem.v();
        for waiter in &waiters {
            ts.join(waiter);
        }
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn join_returns_the_exit_status() {
        let ts = boot_thread_system();
        let child = ts.fork("child", true, Priority::Normal, || 42);
        assert_eq!(ts.join(&child), 42);
    }

    #[test]
    fn lock_raises_a_lower_priority_holder() {
        let ts = boot_thread_system();
        let lock = Arc::new(Lock::new(&ts));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let holder = {
            let lock = lock.clone();
            let observed = observed.clone();
            let ts2 = ts.clone();
            ts.fork("holder", true, Priority::Low, move || {
                lock.acquire();
                observed.lock().push(("holder acquired", crate::thread::current_thread().priority()));
                ts2.yield_now(); // let the high-priority contender arrive
                observed.lock().push(("holder boosted", crate::thread::current_thread().priority()));
                lock.release();
                observed.lock().push(("holder restored", crate::thread::current_thread().priority()));
                0
            })
        };

        // Run the holder up to its yield.
        ts.yield_now();

        let contender = {
            let lock = lock.clone();
            let observed = observed.clone();
            ts.fork("contender", true, Priority::High, move || {
                lock.acquire();
                observed.lock().push(("contender acquired", crate::thread::current_thread().priority()));
                lock.release();
                0
            })
        };

        ts.join(&contender);
        ts.join(&holder);

        let observed = observed.lock();
        assert_eq!(observed[0], ("holder acquired", Priority::Low));
        assert_eq!(observed[1], ("holder boosted", Priority::High));
        assert_eq!(observed[2], ("holder restored", Priority::Low));
        assert_eq!(observed[3], ("contender acquired", Priority::High));
    }

    #[test]
    fn condition_broadcast_wakes_every_waiter() {
        let ts = boot_thread_system();
        let lock = Arc::new(Lock::new(&ts));
        let condition = Arc::new(Condition::new(&ts, lock.clone()));
        let woken = Arc::new(Mutex::new(0));

        let waiters: Vec<_> = (0..3)
            .map(|i| {
                let lock = lock.clone();
                let condition = condition.clone();
                let woken = woken.clone();
                ts.fork(&format!("waiter-{i}"), true, Priority::Normal, move || {
                    lock.acquire();
                    condition.wait();
                    *woken.lock() += 1;
                    lock.release();
                    0
                })
            })
            .collect();

        // Let all three block on the condition.
        ts.yield_now();
        lock.acquire();
        condition.broadcast();
        lock.release();

        for waiter in &waiters {
            ts.join(waiter);
        }
        assert_eq!(*woken.lock(), 3);
    }

    #[test]
    fn writers_exclude_readers_until_release() {
        let ts = boot_thread_system();
        let rw = Arc::new(RwLock::new(&ts));
        let log = Arc::new(Mutex::new(Vec::new()));

        let writer = {
            let rw = rw.clone();
            let log = log.clone();
            let ts2 = ts.clone();
            ts.fork("writer", true, Priority::Normal, move || {
                rw.acquire_write();
                log.lock().push("write acquired");
                // Give the readers a chance to contend mid-write.
                ts2.yield_now();
                ts2.yield_now();
                log.lock().push("write released");
                rw.release_write();
                0
            })
        };

        let readers: Vec<_> = (0..2)
            .map(|i| {
                let rw = rw.clone();
                let log = log.clone();
                ts.fork(&format!("reader-{i}"), true, Priority::Normal, move || {
                    rw.acquire_read();
                    log.lock().push("read");
                    rw.release_read();
                    0
                })
            })
            .collect();

        ts.join(&writer);
        for reader in &readers {
            ts.join(reader);
        }

        let log = log.lock();
        let released = log.iter().position(|&e| e == "write released").unwrap();
        let first_read = log.iter().position(|&e| e == "read").unwrap();
        assert!(released < first_read, "a reader overlapped the writer: {log:?}");
        assert_eq!(log.iter().filter(|&&e| e == "read").count(), 2);
    }

    #[test]
    fn writer_reentering_read_side_is_a_no_op() {
        let ts = boot_thread_system();
        let rw = Arc::new(RwLock::new(&ts));
        let child = {
            let rw = rw.clone();
            ts.fork("writer", true, Priority::Normal, move || {
                rw.acquire_write();
                rw.acquire_read();
                rw.release_read();
                rw.release_write();
                7
            })
        };
        assert_eq!(ts.join(&child), 7);
    }

    #[test]
    fn every_send_pairs_with_exactly_one_receive() {
        let ts = boot_thread_system();
        let channel = Arc::new(Channel::new(&ts));
        let received = Arc::new(Mutex::new(Vec::new()));

        const SENDERS: usize = 6;
        const RECEIVERS: usize = 4;
        const PER_SENDER: usize = 4;
        const PER_RECEIVER: usize = SENDERS * PER_SENDER / RECEIVERS;

        let mut threads = Vec::new();
        for s in 0..SENDERS {
            let channel = channel.clone();
            threads.push(ts.fork(&format!("sender-{s}"), true, Priority::Normal, move || {
                for value in 0..PER_SENDER as i32 {
                    channel.send(value);
                }
                0
            }));
        }
        for r in 0..RECEIVERS {
            let channel = channel.clone();
            let received = received.clone();
            threads.push(ts.fork(&format!("receiver-{r}"), true, Priority::Normal, move || {
                for _ in 0..PER_RECEIVER {
                    let value = channel.receive();
                    received.lock().push(value);
                }
                0
            }));
        }

        for thread in &threads {
            ts.join(thread);
        }

        let received = received.lock();
        assert_eq!(received.len(), SENDERS * PER_SENDER);
        for value in 0..PER_SENDER as i32 {
            assert_eq!(
                received.iter().filter(|&&v| v == value).count(),
                SENDERS,
                "message {value} delivered a wrong number of times"
            );
        }
    }
}
