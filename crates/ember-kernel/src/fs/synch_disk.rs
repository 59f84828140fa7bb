//! Synchronous interface to the asynchronous disk device.
//!
//! The physical disk completes requests through an interrupt. One lock
//! serializes requests (the device handles a single outstanding operation);
//! a semaphore posted by the completion handler blocks the requester until
//! its transfer is done.

use std::path::Path;
use std::sync::Arc;

use ember_fs::SECTOR_SIZE;
use ember_machine::disk::Disk;
use ember_machine::{DeviceError, Interrupt, Statistics};

use crate::sync::{Lock, Semaphore};
use crate::thread::ThreadSystem;

pub struct SynchDisk {
    disk: Arc<Disk>,
    lock: Lock,
    semaphore: Arc<Semaphore>,
}

impl SynchDisk {
    pub fn new(
        ts: &Arc<ThreadSystem>,
        interrupt: &Arc<Interrupt>,
        stats: &Arc<Statistics>,
        image: &Path,
    ) -> Result<Arc<Self>, DeviceError> {
        let semaphore = Arc::new(Semaphore::new(ts, 0));
        let request_done = {
            let semaphore = semaphore.clone();
            Box::new(move || semaphore.v())
        };
        let disk = Disk::new(image, interrupt.clone(), stats.clone(), request_done)?;
        Ok(Arc::new(Self {
            disk,
            lock: Lock::new(ts),
            semaphore,
        }))
    }

    /// Read one sector, returning only once the data has arrived.
    pub fn read_sector(&self, sector: u32, data: &mut [u8; SECTOR_SIZE]) {
        self.lock.acquire();
        self.disk
            .read_request(sector)
            .unwrap_or_else(|e| panic!("disk read of sector {sector} failed: {e}"));
        self.semaphore.p();
        self.disk.take_buffer(data);
        self.lock.release();
    }

    /// Write one sector, returning only once the device has retired it.
    pub fn write_sector(&self, sector: u32, data: &[u8; SECTOR_SIZE]) {
        self.lock.acquire();
        self.disk
            .write_request(sector, data)
            .unwrap_or_else(|e| panic!("disk write of sector {sector} failed: {e}"));
        self.semaphore.p();
        self.lock.release();
    }
}
