//! Open-file handles.
//!
//! One handle represents one holder's view of a file: the header sector, a
//! private seek position, and the shared cached header. A handle is either
//! plain (kernel-internal, no concurrency control; the free map and
//! bootstrap paths use these) or synchronized, carrying the per-file
//! reader/writer lock shared through the open-file cache.
//!
//! Handles hold the file system weakly. The cache owns the strong state;
//! a handle only needs the way back for write extension and closing.

use std::sync::{Arc, Weak};

use ember_fs::SECTOR_SIZE;
use spin::Mutex;

use crate::fs::file_header::FileHeader;
use crate::fs::{FileSystem, SynchDisk};
use crate::sync::RwLock;

pub struct OpenFile {
    sector: u32,
    header: Arc<Mutex<FileHeader>>,
    rw: Option<Arc<RwLock>>,
    position: Mutex<usize>,
    disk: Arc<SynchDisk>,
    fs: Weak<FileSystem>,
}

impl OpenFile {
    /// Kernel-internal handle with no reader/writer arbitration.
    pub(crate) fn plain(
        sector: u32,
        header: Arc<Mutex<FileHeader>>,
        disk: Arc<SynchDisk>,
        fs: Weak<FileSystem>,
    ) -> Self {
        Self {
            sector,
            header,
            rw: None,
            position: Mutex::new(0),
            disk,
            fs,
        }
    }

    /// Kernel-internal handle that fetches its own private header copy.
    pub(crate) fn fetch_plain(sector: u32, disk: Arc<SynchDisk>, fs: Weak<FileSystem>) -> Self {
        let header = Arc::new(Mutex::new(FileHeader::fetch_from(&disk, sector)));
        Self::plain(sector, header, disk, fs)
    }

    /// Handle bound to the open-file cache's shared header and lock.
    pub(crate) fn synchronized(
        sector: u32,
        header: Arc<Mutex<FileHeader>>,
        rw: Arc<RwLock>,
        disk: Arc<SynchDisk>,
        fs: Weak<FileSystem>,
    ) -> Self {
        Self {
            sector,
            header,
            rw: Some(rw),
            position: Mutex::new(0),
            disk,
            fs,
        }
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn length(&self) -> usize {
        self.header.lock().file_length()
    }

    pub(crate) fn header(&self) -> &Arc<Mutex<FileHeader>> {
        &self.header
    }

    pub fn file_system(&self) -> Option<Arc<FileSystem>> {
        self.fs.upgrade()
    }

    /// Read from an explicit offset without moving the seek position.
    pub fn read_at(&self, into: &mut [u8], position: usize) -> usize {
        match &self.rw {
            Some(rw) => {
                rw.acquire_read();
                let read = self.read_at_unlocked(into, position);
                rw.release_read();
                read
            }
            None => self.read_at_unlocked(into, position),
        }
    }

    /// Write at an explicit offset without moving the seek position,
    /// extending the file when the write runs past its end.
    pub fn write_at(&self, from: &[u8], position: usize) -> usize {
        match &self.rw {
            Some(rw) => {
                rw.acquire_write();
                let written = self.write_at_unlocked(from, position);
                rw.release_write();
                written
            }
            None => self.write_at_unlocked(from, position),
        }
    }

    /// Read at the seek position, advancing it by the bytes read.
    pub fn read(&self, into: &mut [u8]) -> usize {
        let position = *self.position.lock();
        let read = self.read_at(into, position);
        *self.position.lock() = position + read;
        read
    }

    /// Write at the seek position, advancing it by the bytes written.
    pub fn write(&self, from: &[u8]) -> usize {
        let position = *self.position.lock();
        let written = self.write_at(from, position);
        *self.position.lock() = position + written;
        written
    }

    fn read_at_unlocked(&self, into: &mut [u8], position: usize) -> usize {
        let length = self.length();
        if position >= length || into.is_empty() {
            return 0;
        }
        let num = into.len().min(length - position);

        let first = position / SECTOR_SIZE;
        let last = (position + num - 1) / SECTOR_SIZE;
        let mut staging = vec![0u8; (last - first + 1) * SECTOR_SIZE];
        for (i, chunk) in staging.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector = self.header.lock().byte_to_sector((first + i) * SECTOR_SIZE);
            let mut buffer = [0u8; SECTOR_SIZE];
            self.disk.read_sector(sector, &mut buffer);
            chunk.copy_from_slice(&buffer);
        }

        let start = position - first * SECTOR_SIZE;
        into[..num].copy_from_slice(&staging[start..start + num]);
        num
    }

    fn write_at_unlocked(&self, from: &[u8], position: usize) -> usize {
        let mut num = from.len();
        if num == 0 {
            return 0;
        }

        let length = self.length();
        if position + num > length {
            let grown = self
                .fs
                .upgrade()
                .is_some_and(|fs| fs.extend_file(self, position + num - length).is_ok());
            if !grown {
                // Could not extend; write what still fits.
                if position >= length {
                    return 0;
                }
                num = length - position;
            }
        }

        let first = position / SECTOR_SIZE;
        let last = (position + num - 1) / SECTOR_SIZE;
        let mut staging = vec![0u8; (last - first + 1) * SECTOR_SIZE];

        // Preserve the parts of the edge sectors the write does not cover.
        let first_partial = position % SECTOR_SIZE != 0;
        let last_partial = (position + num) % SECTOR_SIZE != 0;
        if first_partial {
            let sector = self.header.lock().byte_to_sector(first * SECTOR_SIZE);
            let mut buffer = [0u8; SECTOR_SIZE];
            self.disk.read_sector(sector, &mut buffer);
            staging[..SECTOR_SIZE].copy_from_slice(&buffer);
        }
        if last_partial && (last != first || !first_partial) {
            let sector = self.header.lock().byte_to_sector(last * SECTOR_SIZE);
            let mut buffer = [0u8; SECTOR_SIZE];
            self.disk.read_sector(sector, &mut buffer);
            staging[(last - first) * SECTOR_SIZE..].copy_from_slice(&buffer);
        }

        let start = position - first * SECTOR_SIZE;
        staging[start..start + num].copy_from_slice(&from[..num]);

        for (i, chunk) in staging.chunks_exact(SECTOR_SIZE).enumerate() {
            let sector = self.header.lock().byte_to_sector((first + i) * SECTOR_SIZE);
            let mut buffer = [0u8; SECTOR_SIZE];
            buffer.copy_from_slice(chunk);
            self.disk.write_sector(sector, &buffer);
        }
        num
    }
}
