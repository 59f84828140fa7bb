use ember_machine::MachineConfig;

/// How the pager picks a victim frame when memory is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// Round-robin over physical frame numbers.
    Fifo,
    /// Enhanced second-chance over use/dirty bits.
    Clock,
    /// Uniformly random frame.
    Random,
}

/// Everything the kernel needs to know at construction time. Threaded
/// through explicitly; nothing reads configuration from ambient state.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub machine: MachineConfig,
    /// Defer frame allocation and segment reads until first use.
    pub demand_loading: bool,
    /// Evict to per-process swap files when memory runs out. Implies
    /// demand-loading behavior for reloads.
    pub swap: bool,
    pub replacement: ReplacementPolicy,
    /// Preemption quantum in ticks; `None` runs purely cooperatively.
    pub timer_quantum: Option<u64>,
    /// Suppress timer-driven yields for deterministic runs.
    pub disable_periodic_yield: bool,
    /// Seed for the random replacement policy.
    pub rng_seed: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            machine: MachineConfig::default(),
            demand_loading: false,
            swap: false,
            replacement: ReplacementPolicy::Fifo,
            timer_quantum: None,
            disable_periodic_yield: true,
            rng_seed: 0x454d_4245,
        }
    }
}
