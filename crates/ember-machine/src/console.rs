//! Asynchronous character console model.
//!
//! Demand driven: the kernel's synchronous wrapper requests one character at
//! a time (or submits one for output), and the device answers with a
//! scheduled interrupt a few ticks later. End of input is surfaced by
//! delivering `None` from `take_char`, which the wrapper turns into a short
//! read.

use std::io::{Read, Write};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::trace;
use spin::Mutex;

use crate::interrupt::Interrupt;
use crate::stats::Statistics;

/// Simulated per-character latency, in ticks.
const CONSOLE_DELAY: u64 = 10;

type Callback = Box<dyn Fn() + Send + Sync>;

struct ConsoleInner {
    source: Box<dyn Read + Send>,
    sink: Box<dyn Write + Send>,
    incoming: Option<u8>,
    eof: bool,
}

pub struct Console {
    inner: Mutex<ConsoleInner>,
    interrupt: Arc<Interrupt>,
    stats: Arc<Statistics>,
    read_avail: Callback,
    write_done: Callback,
}

impl Console {
    pub fn new(
        source: Box<dyn Read + Send>,
        sink: Box<dyn Write + Send>,
        interrupt: Arc<Interrupt>,
        stats: Arc<Statistics>,
        read_avail: Callback,
        write_done: Callback,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ConsoleInner {
                source,
                sink,
                incoming: None,
                eof: false,
            }),
            interrupt,
            stats,
            read_avail,
            write_done,
        })
    }

    /// Ask the device to produce the next input character. The read-avail
    /// callback fires once it is ready; fetch it with [`Console::take_char`].
    pub fn request_char(self: &Arc<Self>) {
        let console = self.clone();
        self.interrupt.schedule(
            CONSOLE_DELAY,
            Box::new(move || {
                {
                    let mut inner = console.inner.lock();
                    if !inner.eof {
                        let mut byte = [0u8; 1];
                        match inner.source.read(&mut byte) {
                            Ok(0) | Err(_) => inner.eof = true,
                            Ok(_) => inner.incoming = Some(byte[0]),
                        }
                    }
                }
                (console.read_avail)();
            }),
        );
    }

    /// The character produced by the last completed request, or `None` at
    /// end of input.
    pub fn take_char(&self) -> Option<u8> {
        let mut inner = self.inner.lock();
        let ch = inner.incoming.take();
        if ch.is_some() {
            self.stats.num_console_chars_read.fetch_add(1, Ordering::Relaxed);
        }
        ch
    }

    /// Emit one character; the write-done callback fires when the device
    /// has retired it.
    pub fn put_char(self: &Arc<Self>, ch: u8) {
        {
            let mut inner = self.inner.lock();
            if inner.sink.write_all(&[ch]).and_then(|_| inner.sink.flush()).is_err() {
                trace!("console output sink closed");
            }
        }
        self.stats.num_console_chars_written.fetch_add(1, Ordering::Relaxed);
        let console = self.clone();
        self.interrupt
            .schedule(CONSOLE_DELAY, Box::new(move || (console.write_done)()));
    }
}
