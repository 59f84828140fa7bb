//! Periodic timer device driving preemptive scheduling.

use std::sync::Arc;

use log::trace;

use crate::interrupt::Interrupt;

/// Start the self-rescheduling timer. Every `quantum` ticks the handler
/// requests a deferred yield, which the interrupt controller delivers at the
/// next enable boundary unless periodic yields are disabled.
pub fn start(interrupt: &Arc<Interrupt>, quantum: u64) {
    assert!(quantum > 0, "timer quantum must be positive");
    schedule_next(interrupt.clone(), quantum);
}

fn schedule_next(interrupt: Arc<Interrupt>, quantum: u64) {
    let target = interrupt.clone();
    interrupt.schedule(
        quantum,
        Box::new(move || {
            trace!("timer interrupt at tick {}", target.ticks());
            if target.periodic_yield_enabled() {
                target.yield_on_return();
            }
            schedule_next(target.clone(), quantum);
        }),
    );
}
