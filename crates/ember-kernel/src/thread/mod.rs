//! Thread control blocks and the cooperative scheduler.
//!
//! Exactly one kernel thread runs at any instant. Threads are host threads
//! under the hood, but the baton protocol in [`switch`] serializes them
//! completely; the scheduler decides who holds the machine next. All queue
//! manipulation happens with simulated interrupts disabled.

mod switch;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, trace};
use spin::Mutex;

use ember_machine::{IntLevel, Interrupt, InterruptGuard, Machine, NUM_TOTAL_REGS};

use crate::fs::OpenFile;
use crate::sync::Channel;
use crate::table::Table;
use crate::vm::AddressSpace;
use switch::Baton;

/// Open files a single thread may hold, reserved console ids excluded.
pub const MAX_OPEN_FILES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    JustCreated,
    Ready,
    Running,
    Blocked,
    Finished,
}

/// Scheduling priority; `High` outranks `Normal` outranks `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

pub const NUM_PRIORITIES: usize = 3;

impl Priority {
    pub fn outranks(self, other: Priority) -> bool {
        (self as u8) < (other as u8)
    }

    fn queue_index(self) -> usize {
        self as usize
    }
}

struct SchedState {
    status: ThreadStatus,
    priority: Priority,
    original_priority: Priority,
}

/// One thread's control block.
pub struct Thread {
    name: String,
    joinable: bool,
    join_channel: Option<Channel>,
    sched: Mutex<SchedState>,
    baton: Baton,
    host: Mutex<Option<JoinHandle<()>>>,
    user_regs: Mutex<Option<[u32; NUM_TOTAL_REGS]>>,
    space: Mutex<Option<Arc<AddressSpace>>>,
    open_files: Mutex<Table<Arc<OpenFile>>>,
    cwd: Mutex<Option<Arc<OpenFile>>>,
}

impl Thread {
    fn new(ts: &Arc<ThreadSystem>, name: &str, joinable: bool, priority: Priority) -> Self {
        Self {
            name: name.to_string(),
            joinable,
            join_channel: joinable.then(|| Channel::new(ts)),
            sched: Mutex::new(SchedState {
                status: ThreadStatus::JustCreated,
                priority,
                original_priority: priority,
            }),
            baton: Baton::new(),
            host: Mutex::new(None),
            user_regs: Mutex::new(None),
            space: Mutex::new(None),
            open_files: Mutex::new(Table::new(MAX_OPEN_FILES)),
            cwd: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_joinable(&self) -> bool {
        self.joinable
    }

    pub fn status(&self) -> ThreadStatus {
        self.sched.lock().status
    }

    fn set_status(&self, status: ThreadStatus) {
        self.sched.lock().status = status;
    }

    pub fn priority(&self) -> Priority {
        self.sched.lock().priority
    }

    pub fn original_priority(&self) -> Priority {
        self.sched.lock().original_priority
    }

    pub fn space(&self) -> Option<Arc<AddressSpace>> {
        self.space.lock().clone()
    }

    pub fn set_space(&self, space: Arc<AddressSpace>) {
        *self.space.lock() = Some(space);
    }

    pub fn cwd(&self) -> Option<Arc<OpenFile>> {
        self.cwd.lock().clone()
    }

    /// Install a new cwd handle, returning the previous one for the caller
    /// to close.
    pub fn swap_cwd(&self, new: Option<Arc<OpenFile>>) -> Option<Arc<OpenFile>> {
        std::mem::replace(&mut *self.cwd.lock(), new)
    }

    /// Per-thread open-file table; only the owning thread touches it.
    pub fn with_open_files<R>(&self, f: impl FnOnce(&mut Table<Arc<OpenFile>>) -> R) -> R {
        f(&mut self.open_files.lock())
    }

    fn join_channel(&self) -> Option<&Channel> {
        self.join_channel.as_ref()
    }
}

std::thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// The thread bound to the calling execution context.
pub fn current_thread() -> Arc<Thread> {
    CURRENT.with(|c| c.borrow().clone()).expect("no kernel thread bound to this context")
}

struct Scheduler {
    queues: [VecDeque<Arc<Thread>>; NUM_PRIORITIES],
}

impl Scheduler {
    fn new() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }

    /// Highest-priority runnable thread, FIFO within a priority.
    fn find_next_to_run(&mut self) -> Option<Arc<Thread>> {
        self.queues.iter_mut().find_map(|q| q.pop_front())
    }

    fn ready_to_run(&mut self, thread: Arc<Thread>) {
        thread.set_status(ThreadStatus::Ready);
        let index = thread.priority().queue_index();
        self.queues[index].push_back(thread);
    }

    /// Move a queued thread to the queue matching its (changed) priority.
    fn requeue(&mut self, thread: &Arc<Thread>) {
        for queue in self.queues.iter_mut() {
            if let Some(pos) = queue.iter().position(|t| Arc::ptr_eq(t, thread)) {
                queue.remove(pos);
                let index = thread.priority().queue_index();
                self.queues[index].push_back(thread.clone());
                return;
            }
        }
    }
}

/// Owner of every thread and of the switch machinery.
pub struct ThreadSystem {
    pub interrupt: Arc<Interrupt>,
    machine: Arc<Machine>,
    scheduler: Mutex<Scheduler>,
    reap: Mutex<Vec<(Arc<Thread>, JoinHandle<()>)>>,
}

impl ThreadSystem {
    pub fn new(interrupt: Arc<Interrupt>, machine: Arc<Machine>) -> Arc<Self> {
        Arc::new(Self {
            interrupt,
            machine,
            scheduler: Mutex::new(Scheduler::new()),
            reap: Mutex::new(Vec::new()),
        })
    }

    /// Wrap the calling host thread as the initial kernel thread.
    pub fn adopt_main(self: &Arc<Self>, name: &str) -> Arc<Thread> {
        let thread = Arc::new(Thread::new(self, name, false, Priority::Normal));
        thread.baton.bind();
        thread.set_status(ThreadStatus::Running);
        CURRENT.with(|c| *c.borrow_mut() = Some(thread.clone()));
        self.interrupt.set_level(IntLevel::On);
        thread
    }

    /// Create a thread that runs `body` and finishes with its return value.
    /// The thread is placed on the ready queue immediately.
    pub fn fork(
        self: &Arc<Self>,
        name: &str,
        joinable: bool,
        priority: Priority,
        body: impl FnOnce() -> i32 + Send + 'static,
    ) -> Arc<Thread> {
        let thread = Arc::new(Thread::new(self, name, joinable, priority));
        debug!("forking thread \"{name}\"");

        let ts = self.clone();
        let me = thread.clone();
        let host = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                me.baton.bind();
                CURRENT.with(|c| *c.borrow_mut() = Some(me.clone()));
                me.baton.wait();
                // First dispatch: restore nothing, reap our predecessor,
                // open the interrupt mask, run.
                ts.switched_in(&me);
                ts.interrupt.set_level(IntLevel::On);
                let status = body();
                ts.finish(status);
            })
            .expect("host thread spawn failed");
        *thread.host.lock() = Some(host);

        let _guard = InterruptGuard::new(&self.interrupt);
        self.scheduler.lock().ready_to_run(thread.clone());
        thread
    }

    /// Put the caller at the back of its ready queue and run the next
    /// thread; no-op when nothing else is ready.
    pub fn yield_now(&self) {
        let old = self.interrupt.set_level(IntLevel::Off);
        let current = current_thread();
        trace!("yielding thread \"{}\"", current.name());
        let next = {
            let mut sched = self.scheduler.lock();
            let next = sched.find_next_to_run();
            if next.is_some() {
                sched.ready_to_run(current.clone());
            }
            next
        };
        if let Some(next) = next {
            self.switch_to(next);
        }
        self.interrupt.set_level(old);
    }

    /// Block the caller. Interrupts must be off, and some other agent must
    /// have arranged to make this thread ready again. Idles through pending
    /// device interrupts while nothing is runnable.
    pub fn sleep_current(&self) {
        assert_eq!(
            self.interrupt.level(),
            IntLevel::Off,
            "sleep with interrupts enabled"
        );
        let current = current_thread();
        trace!("sleeping thread \"{}\"", current.name());
        current.set_status(ThreadStatus::Blocked);
        let next = loop {
            if let Some(next) = self.scheduler.lock().find_next_to_run() {
                break next;
            }
            self.interrupt.idle();
        };
        self.switch_to(next);
    }

    /// Make a blocked or just-created thread runnable. Interrupts must be
    /// off.
    pub fn ready_to_run(&self, thread: &Arc<Thread>) {
        debug_assert_eq!(self.interrupt.level(), IntLevel::Off);
        self.scheduler.lock().ready_to_run(thread.clone());
    }

    /// Temporarily raise a lock holder to `to`; pairs with
    /// [`ThreadSystem::restore_original_priority`].
    pub fn prioritize(&self, thread: &Arc<Thread>, to: Priority) {
        let _guard = InterruptGuard::new(&self.interrupt);
        {
            let mut sched = thread.sched.lock();
            if !to.outranks(sched.priority) {
                return;
            }
            sched.priority = to;
        }
        self.scheduler.lock().requeue(thread);
    }

    pub fn restore_original_priority(&self, thread: &Arc<Thread>) {
        let _guard = InterruptGuard::new(&self.interrupt);
        {
            let mut sched = thread.sched.lock();
            sched.priority = sched.original_priority;
        }
        self.scheduler.lock().requeue(thread);
    }

    /// Wait for a joinable thread to finish and collect its exit status.
    pub fn join(&self, thread: &Arc<Thread>) -> i32 {
        let current = current_thread();
        assert!(
            !Arc::ptr_eq(&current, thread),
            "thread cannot join itself"
        );
        let channel = thread
            .join_channel()
            .expect("join on a thread forked without joinability");
        debug!("\"{}\" joining \"{}\"", current.name(), thread.name());
        channel.receive()
    }

    /// Terminate the calling thread. Releases its user-program resources,
    /// rendezvouses with the joiner when one is expected, and switches away
    /// for good; the successor reaps the host context.
    pub fn finish(self: &Arc<Self>, status: i32) {
        self.interrupt.set_level(IntLevel::Off);
        let current = current_thread();
        debug!("finishing thread \"{}\" with status {status}", current.name());

        // User-program cleanup happens before the final switch: closing
        // files and dropping the address space may do disk I/O.
        self.release_thread_resources(&current);

        if let Some(channel) = current.join_channel() {
            channel.send(status);
            self.interrupt.set_level(IntLevel::Off);
        }

        current.set_status(ThreadStatus::Finished);
        if let Some(host) = current.host.lock().take() {
            self.reap.lock().push((current.clone(), host));
        }

        let next = loop {
            if let Some(next) = self.scheduler.lock().find_next_to_run() {
                break next;
            }
            self.interrupt.idle();
        };
        next.set_status(ThreadStatus::Running);
        next.baton.pass();
        // The host thread unwinds from here and exits.
    }

    fn release_thread_resources(&self, thread: &Arc<Thread>) {
        // Dropping the space clears its frames and removes its swap file.
        *thread.space.lock() = None;

        let files = thread.with_open_files(|table| table.drain());
        for file in files {
            if let Some(fs) = file.file_system() {
                fs.close(&file);
            }
        }
        if let Some(cwd) = thread.swap_cwd(None) {
            if let Some(fs) = cwd.file_system() {
                fs.close(&cwd);
            }
        }
    }

    /// Switch the machine to `next`. Interrupts must be off; no spin locks
    /// may be held.
    fn switch_to(&self, next: Arc<Thread>) {
        let current = current_thread();
        if Arc::ptr_eq(&current, &next) {
            next.set_status(ThreadStatus::Running);
            return;
        }
        trace!("switching \"{}\" -> \"{}\"", current.name(), next.name());

        if let Some(space) = current.space() {
            *current.user_regs.lock() = Some(self.machine.save_registers());
            space.save_state(&self.machine);
        }

        next.set_status(ThreadStatus::Running);
        next.baton.pass();
        current.baton.wait();

        // Back on the machine.
        self.switched_in(&current);
    }

    /// Post-switch bookkeeping run by the thread that just got the machine.
    fn switched_in(&self, thread: &Arc<Thread>) {
        if let Some(space) = thread.space() {
            if let Some(regs) = *thread.user_regs.lock() {
                self.machine.restore_registers(&regs);
            }
            space.restore_state(&self.machine);
        }
        self.reap_dead();
    }

    fn reap_dead(&self) {
        loop {
            let dead = self.reap.lock().pop();
            match dead {
                Some((thread, host)) => {
                    trace!("reaping thread \"{}\"", thread.name());
                    let _ = host.join();
                }
                None => break,
            }
        }
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }
}
