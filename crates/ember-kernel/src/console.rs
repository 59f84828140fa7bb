//! Synchronous interface to the asynchronous console device, with separate
//! read-side and write-side serialization.

use std::io::{Read, Write};
use std::sync::Arc;

use ember_machine::console::Console;
use ember_machine::{Interrupt, Statistics};

use crate::sync::{Lock, Semaphore};
use crate::thread::ThreadSystem;

pub struct SynchConsole {
    console: Arc<Console>,
    read_lock: Lock,
    write_lock: Lock,
    read_avail: Arc<Semaphore>,
    write_done: Arc<Semaphore>,
}

impl SynchConsole {
    pub fn new(
        ts: &Arc<ThreadSystem>,
        interrupt: &Arc<Interrupt>,
        stats: &Arc<Statistics>,
        source: Box<dyn Read + Send>,
        sink: Box<dyn Write + Send>,
    ) -> Arc<Self> {
        let read_avail = Arc::new(Semaphore::new(ts, 0));
        let write_done = Arc::new(Semaphore::new(ts, 0));
        let console = Console::new(
            source,
            sink,
            interrupt.clone(),
            stats.clone(),
            {
                let read_avail = read_avail.clone();
                Box::new(move || read_avail.v())
            },
            {
                let write_done = write_done.clone();
                Box::new(move || write_done.v())
            },
        );
        Arc::new(Self {
            console,
            read_lock: Lock::new(ts),
            write_lock: Lock::new(ts),
            read_avail,
            write_done,
        })
    }

    /// Fill `data` one character at a time; a short count means end of
    /// input.
    pub fn read(&self, data: &mut [u8]) -> usize {
        self.read_lock.acquire();
        let mut filled = 0;
        while filled < data.len() {
            self.console.request_char();
            self.read_avail.p();
            match self.console.take_char() {
                Some(ch) => {
                    data[filled] = ch;
                    filled += 1;
                }
                None => break,
            }
        }
        self.read_lock.release();
        filled
    }

    /// Emit `data`, one write-done handshake per character.
    pub fn write(&self, data: &[u8]) {
        self.write_lock.acquire();
        for &ch in data {
            self.console.put_char(ch);
            self.write_done.p();
        }
        self.write_lock.release();
    }
}
