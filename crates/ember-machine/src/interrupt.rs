//! The simulated interrupt controller.
//!
//! Time is virtual: it advances when an instruction executes, when
//! interrupts get re-enabled, and when the machine idles waiting for a
//! device. Device models schedule completion handlers at a future tick;
//! `idle` fast-forwards the clock to the next pending handler when nothing
//! is runnable. A handler must never block: it runs on whichever thread
//! happened to advance the clock, with interrupts off.
//!
//! Preemption is the deferred-yield protocol: a timer handler calls
//! `yield_on_return`, and the controller invokes the installed yield hook
//! once the handler batch has finished and the mask is open again.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;
use spin::Mutex;

use crate::stats::Statistics;

/// Interrupt mask state. `Off` defers pending handlers and timer yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLevel {
    Off,
    On,
}

type Handler = Box<dyn FnOnce() + Send>;

struct Pending {
    when: u64,
    serial: u64,
    handler: Handler,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.serial == other.serial
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // BinaryHeap is a max-heap; invert so the earliest deadline pops first,
    // FIFO within a tick.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.when, other.serial).cmp(&(self.when, self.serial))
    }
}

struct Inner {
    level: IntLevel,
    ticks: u64,
    serial: u64,
    pending: BinaryHeap<Pending>,
    yield_on_return: bool,
    idling: bool,
}

pub struct Interrupt {
    inner: Mutex<Inner>,
    yield_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    /// Cleared to suppress timer-driven yields in deterministic runs.
    periodic_yield_enabled: AtomicBool,
    stats: Arc<Statistics>,
}

impl Interrupt {
    pub fn new(stats: Arc<Statistics>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                level: IntLevel::Off,
                ticks: 0,
                serial: 0,
                pending: BinaryHeap::new(),
                yield_on_return: false,
                idling: false,
            }),
            yield_hook: Mutex::new(None),
            periodic_yield_enabled: AtomicBool::new(true),
            stats,
        }
    }

    /// Install the thread system's deferred-yield callback.
    pub fn set_yield_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *self.yield_hook.lock() = Some(hook);
    }

    pub fn set_periodic_yield_enabled(&self, enabled: bool) {
        self.periodic_yield_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn periodic_yield_enabled(&self) -> bool {
        self.periodic_yield_enabled.load(Ordering::Relaxed)
    }

    pub fn level(&self) -> IntLevel {
        self.inner.lock().level
    }

    pub fn ticks(&self) -> u64 {
        self.inner.lock().ticks
    }

    /// Change the interrupt mask, returning the previous level. Re-enabling
    /// advances the clock one tick and delivers anything that came due.
    pub fn set_level(&self, new: IntLevel) -> IntLevel {
        let old = {
            let mut inner = self.inner.lock();
            let old = inner.level;
            inner.level = new;
            old
        };
        if old == IntLevel::Off && new == IntLevel::On {
            self.advance(1, false);
        }
        old
    }

    /// One tick of forward progress; called per executed instruction.
    pub fn tick(&self) {
        self.advance(1, false);
    }

    /// Schedule `handler` to fire `delay` ticks from now.
    pub fn schedule(&self, delay: u64, handler: Handler) {
        assert!(delay > 0, "interrupt scheduled with zero delay");
        let mut inner = self.inner.lock();
        let when = inner.ticks + delay;
        let serial = inner.serial;
        inner.serial += 1;
        trace!("interrupt scheduled for tick {when}");
        inner.pending.push(Pending {
            when,
            serial,
            handler,
        });
    }

    /// Request a deferred yield; honored once the current handler batch has
    /// drained. Ignored while the machine idles, where there is nothing to
    /// preempt.
    pub fn yield_on_return(&self) {
        let mut inner = self.inner.lock();
        if !inner.idling {
            inner.yield_on_return = true;
        }
    }

    /// Fast-forward to the next scheduled interrupt. Must be called with
    /// interrupts off, by a thread that has nothing to run. Panics if the
    /// pending queue is empty: with no runnable thread and no interrupt on
    /// the way, the system can never make progress again.
    pub fn idle(&self) {
        let jump = {
            let mut inner = self.inner.lock();
            assert_eq!(inner.level, IntLevel::Off, "idle with interrupts enabled");
            let next = inner
                .pending
                .peek()
                .map(|p| p.when)
                .unwrap_or_else(|| panic!("no thread ready and no pending interrupts: system deadlocked"));
            let jump = next - inner.ticks;
            inner.idling = true;
            jump
        };
        self.stats.idle_ticks.fetch_add(jump, Ordering::Relaxed);
        self.advance(jump, true);
        self.inner.lock().idling = false;
    }

    fn advance(&self, ticks: u64, idling: bool) {
        let due = {
            let mut inner = self.inner.lock();
            inner.ticks += ticks;
            self.stats.total_ticks.fetch_add(ticks, Ordering::Relaxed);

            let mut due = Vec::new();
            while inner.pending.peek().is_some_and(|p| p.when <= inner.ticks) {
                due.push(inner.pending.pop().map(|p| p.handler));
            }
            due
        };

        // Handlers run with the mask forced off, outside the queue lock so
        // they may schedule follow-ups.
        if !due.is_empty() {
            let reopen = {
                let mut inner = self.inner.lock();
                let was = inner.level;
                inner.level = IntLevel::Off;
                was
            };
            for handler in due.into_iter().flatten() {
                handler();
            }
            self.inner.lock().level = reopen;
        }

        if !idling {
            let fire = {
                let mut inner = self.inner.lock();
                let fire = inner.yield_on_return && inner.level == IntLevel::On;
                if fire {
                    inner.yield_on_return = false;
                }
                fire
            };
            if fire {
                if let Some(hook) = self.yield_hook.lock().as_ref() {
                    hook();
                }
            }
        }
    }
}

/// RAII critical section: disables interrupts on construction, restores the
/// previous level on drop.
pub struct InterruptGuard<'a> {
    interrupt: &'a Interrupt,
    old: IntLevel,
}

impl<'a> InterruptGuard<'a> {
    pub fn new(interrupt: &'a Interrupt) -> Self {
        let old = interrupt.set_level(IntLevel::Off);
        Self { interrupt, old }
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.interrupt.set_level(self.old);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn controller() -> Interrupt {
        Interrupt::new(Arc::new(Statistics::new()))
    }

    #[test]
    fn handlers_fire_in_deadline_order() {
        let interrupt = controller();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (delay, tag) in [(30u64, 'c'), (10, 'a'), (20, 'b')] {
            let order = order.clone();
            interrupt.schedule(delay, Box::new(move || order.lock().push(tag)));
        }
        interrupt.set_level(IntLevel::On);
        for _ in 0..40 {
            interrupt.tick();
        }
        assert_eq!(*order.lock(), vec!['a', 'b', 'c']);
    }

    #[test]
    fn idle_jumps_to_the_next_deadline() {
        let interrupt = controller();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        interrupt.schedule(1000, Box::new(move || flag.store(true, Ordering::Relaxed)));
        interrupt.idle();
        assert!(fired.load(Ordering::Relaxed));
        assert!(interrupt.ticks() >= 1000);
    }

    #[test]
    #[should_panic(expected = "deadlocked")]
    fn idle_with_nothing_pending_is_fatal() {
        controller().idle();
    }

    #[test]
    fn masked_handlers_wait_for_enable() {
        let interrupt = controller();
        let count = Arc::new(AtomicUsize::new(0));
        let n = count.clone();
        interrupt.schedule(1, Box::new(move || drop(n.fetch_add(1, Ordering::Relaxed))));
        // Level is Off; nothing may fire yet.
        assert_eq!(count.load(Ordering::Relaxed), 0);
        interrupt.set_level(IntLevel::On);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn guard_restores_previous_level() {
        let interrupt = controller();
        interrupt.set_level(IntLevel::On);
        {
            let _guard = InterruptGuard::new(&interrupt);
            assert_eq!(interrupt.level(), IntLevel::Off);
        }
        assert_eq!(interrupt.level(), IntLevel::On);
    }
}
