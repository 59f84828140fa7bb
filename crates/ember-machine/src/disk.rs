//! Asynchronous sector disk model.
//!
//! The disk is a host file of fixed-width sectors. A request performs the
//! backing I/O immediately but completes later: the completion callback runs
//! as a scheduled interrupt, which is what the kernel's synchronous wrapper
//! blocks on. Exactly one request may be outstanding at a time; the wrapper
//! serializes callers with a lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::trace;
use spin::Mutex;

use crate::error::DeviceError;
use crate::interrupt::Interrupt;
use crate::stats::Statistics;

pub const SECTOR_SIZE: usize = ember_fs::SECTOR_SIZE;
pub const NUM_SECTORS: usize = ember_fs::NUM_SECTORS;

/// Simulated seek-plus-transfer latency, in ticks.
const DISK_DELAY: u64 = 100;

type Callback = Box<dyn Fn() + Send + Sync>;

struct DiskInner {
    file: File,
    busy: bool,
    buffer: [u8; SECTOR_SIZE],
}

pub struct Disk {
    inner: Mutex<DiskInner>,
    interrupt: Arc<Interrupt>,
    stats: Arc<Statistics>,
    request_done: Callback,
}

impl Disk {
    /// Open (creating and sizing if necessary) the backing file.
    pub fn new(
        path: &Path,
        interrupt: Arc<Interrupt>,
        stats: Arc<Statistics>,
        request_done: Callback,
    ) -> Result<Arc<Self>, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len((NUM_SECTORS * SECTOR_SIZE) as u64)?;

        Ok(Arc::new(Self {
            inner: Mutex::new(DiskInner {
                file,
                busy: false,
                buffer: [0; SECTOR_SIZE],
            }),
            interrupt,
            stats,
            request_done,
        }))
    }

    /// Start reading a sector into the device buffer. The completion
    /// interrupt fires `DISK_DELAY` ticks later.
    pub fn read_request(self: &Arc<Self>, sector: u32) -> Result<(), DeviceError> {
        check_sector(sector)?;
        {
            let mut inner = self.inner.lock();
            assert!(!inner.busy, "disk request while device busy");
            inner.busy = true;
            inner.file.seek(SeekFrom::Start(sector_offset(sector)))?;
            let mut buffer = inner.buffer;
            inner.file.read_exact(&mut buffer)?;
            inner.buffer = buffer;
        }
        trace!("disk read of sector {sector} submitted");
        self.stats.num_disk_reads.fetch_add(1, Ordering::Relaxed);
        self.schedule_completion();
        Ok(())
    }

    /// Start writing a sector from `data`.
    pub fn write_request(self: &Arc<Self>, sector: u32, data: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        check_sector(sector)?;
        {
            let mut inner = self.inner.lock();
            assert!(!inner.busy, "disk request while device busy");
            inner.busy = true;
            inner.buffer = *data;
            inner.file.seek(SeekFrom::Start(sector_offset(sector)))?;
            let buffer = inner.buffer;
            inner.file.write_all(&buffer)?;
            inner.file.flush()?;
        }
        trace!("disk write of sector {sector} submitted");
        self.stats.num_disk_writes.fetch_add(1, Ordering::Relaxed);
        self.schedule_completion();
        Ok(())
    }

    /// Copy out the data delivered by the last completed read.
    pub fn take_buffer(&self, out: &mut [u8; SECTOR_SIZE]) {
        let inner = self.inner.lock();
        assert!(!inner.busy, "disk buffer taken before completion");
        *out = inner.buffer;
    }

    fn schedule_completion(self: &Arc<Self>) {
        let disk = self.clone();
        self.interrupt.schedule(
            DISK_DELAY,
            Box::new(move || {
                disk.inner.lock().busy = false;
                (disk.request_done)();
            }),
        );
    }
}

fn check_sector(sector: u32) -> Result<(), DeviceError> {
    if (sector as usize) < NUM_SECTORS {
        Ok(())
    } else {
        Err(DeviceError::BadSector(sector))
    }
}

fn sector_offset(sector: u32) -> u64 {
    sector as u64 * SECTOR_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::IntLevel;
    use std::sync::atomic::AtomicUsize;

    fn scratch_path(tag: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("ember-disk-{}-{}", std::process::id(), tag));
        path
    }

    #[test]
    fn write_then_read_round_trips_after_completion() {
        let stats = Arc::new(Statistics::new());
        let interrupt = Arc::new(Interrupt::new(stats.clone()));
        let completions = Arc::new(AtomicUsize::new(0));
        let seen = completions.clone();
        let path = scratch_path("roundtrip");
        let disk = Disk::new(
            &path,
            interrupt.clone(),
            stats,
            Box::new(move || drop(seen.fetch_add(1, Ordering::Relaxed))),
        )
        .unwrap();

        let mut sector = [0u8; SECTOR_SIZE];
        sector[..5].copy_from_slice(b"hello");
        disk.write_request(7, &sector).unwrap();
        assert_eq!(interrupt.level(), IntLevel::Off);
        interrupt.idle();
        assert_eq!(completions.load(Ordering::Relaxed), 1);

        disk.read_request(7).unwrap();
        interrupt.idle();
        assert_eq!(completions.load(Ordering::Relaxed), 2);

        let mut out = [0u8; SECTOR_SIZE];
        disk.take_buffer(&mut out);
        assert_eq!(&out[..5], b"hello");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn out_of_range_sector_is_rejected() {
        let stats = Arc::new(Statistics::new());
        let interrupt = Arc::new(Interrupt::new(stats.clone()));
        let path = scratch_path("range");
        let disk = Disk::new(&path, interrupt, stats, Box::new(|| {})).unwrap();
        assert!(matches!(
            disk.read_request(NUM_SECTORS as u32),
            Err(DeviceError::BadSector(_))
        ));
        std::fs::remove_file(path).ok();
    }
}
