//! The open-file cache.
//!
//! Keyed by header sector, one entry per file that currently has open
//! handles: the owning directory's sector, a reference count, the per-file
//! reader/writer lock, and the shared cached header. The entry appears on
//! first open and disappears when the count drops to zero; if the directory
//! row was marked for deletion in the meantime, that last close is the
//! moment the file's sectors actually return to the free map.
//!
//! Callers hold the file-system façade lock for every operation here.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use spin::Mutex;

use crate::error::FsError;
use crate::fs::directory::Directory;
use crate::fs::file_header::FileHeader;
use crate::fs::open_file::OpenFile;
use crate::fs::{FileSystem, SynchDisk};
use crate::sync::RwLock;
use crate::thread::ThreadSystem;

struct OpenFileInfo {
    directory_sector: u32,
    reference_count: u32,
    rw: Arc<RwLock>,
    header: Arc<Mutex<FileHeader>>,
}

pub struct FileManager {
    ts: Arc<ThreadSystem>,
    disk: Arc<SynchDisk>,
    open_files: Mutex<BTreeMap<u32, OpenFileInfo>>,
}

impl FileManager {
    pub(crate) fn new(ts: Arc<ThreadSystem>, disk: Arc<SynchDisk>) -> Self {
        Self {
            ts,
            disk,
            open_files: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn is_managed(&self, sector: u32) -> bool {
        self.open_files.lock().contains_key(&sector)
    }

    pub fn reference_count(&self, sector: u32) -> u32 {
        self.open_files
            .lock()
            .get(&sector)
            .map_or(0, |info| info.reference_count)
    }

    /// Resolve `name` in `directory` and hand out a synchronized handle to
    /// the named regular file.
    pub(crate) fn open(
        &self,
        fs: &FileSystem,
        name: &str,
        directory: &OpenFile,
    ) -> Result<Arc<OpenFile>, FsError> {
        let sector = Directory::fetch_from(directory)
            .find_file(name)
            .ok_or(FsError::NotFound)?;
        debug!("open \"{name}\": header at sector {sector}");
        Ok(self.open_by_sector(fs, sector, directory.sector()))
    }

    /// Handle for a file already located by sector. Creates the cache
    /// entry on first open, then bumps the reference count.
    pub(crate) fn open_by_sector(&self, fs: &FileSystem, sector: u32, directory_sector: u32) -> Arc<OpenFile> {
        if !self.is_managed(sector) {
            // Fetch outside the map lock: header I/O suspends the caller.
            let header = FileHeader::fetch_from(&self.disk, sector);
            self.open_files.lock().entry(sector).or_insert_with(|| OpenFileInfo {
                directory_sector,
                reference_count: 0,
                rw: Arc::new(RwLock::new(&self.ts)),
                header: Arc::new(Mutex::new(header)),
            });
        }

        let mut open_files = self.open_files.lock();
        let info = open_files.get_mut(&sector).expect("cache entry vanished");
        assert_eq!(
            info.directory_sector, directory_sector,
            "file at sector {sector} opened through two directories"
        );
        info.reference_count += 1;
        debug!(
            "sector {sector} now has {} open reference(s)",
            info.reference_count
        );

        Arc::new(OpenFile::synchronized(
            sector,
            info.header.clone(),
            info.rw.clone(),
            self.disk.clone(),
            fs.weak_self(),
        ))
    }

    /// Drop one reference. The last close of a file marked for deletion
    /// frees its data blocks and header sector, removes the directory row,
    /// and flushes both the directory and the free map.
    pub(crate) fn close(&self, fs: &FileSystem, file: &OpenFile) {
        let sector = file.sector();
        let removed = {
            let mut open_files = self.open_files.lock();
            let info = open_files
                .get_mut(&sector)
                .unwrap_or_else(|| panic!("closing unmanaged sector {sector}"));
            assert!(info.reference_count > 0, "open-file reference count underflow");
            info.reference_count -= 1;
            if info.reference_count == 0 {
                open_files.remove(&sector)
            } else {
                None
            }
        };

        let Some(info) = removed else { return };
        debug!("last reference to sector {sector} closed");

        let directory_file = OpenFile::fetch_plain(info.directory_sector, self.disk.clone(), fs.weak_self());
        let mut directory = Directory::fetch_from(&directory_file);
        if directory.is_marked_for_deletion(sector) {
            debug!("sector {sector} was marked for deletion; freeing");
            let mut free_map = fs.fetch_free_map();
            info.header.lock().deallocate(&mut free_map);
            free_map.clear(sector as usize);
            fs.flush_free_map(&free_map);

            assert!(directory.remove_marked_for_deletion(sector));
            directory.write_back(&directory_file);
        }
    }

    /// Remove `name` from `directory`: immediately when nobody holds the
    /// file open, otherwise by marking the row for deferred deletion.
    pub(crate) fn remove(&self, fs: &FileSystem, name: &str, directory: &OpenFile) -> Result<(), FsError> {
        let mut dir = Directory::fetch_from(directory);
        let sector = dir.find_file(name).ok_or(FsError::NotFound)?;

        if !self.is_managed(sector) {
            debug!("removing \"{name}\" at sector {sector} immediately");
            let header = FileHeader::fetch_from(&self.disk, sector);
            let mut free_map = fs.fetch_free_map();
            header.deallocate(&mut free_map);
            free_map.clear(sector as usize);
            fs.flush_free_map(&free_map);

            assert!(dir.remove(name));
            dir.write_back(directory);
            return Ok(());
        }

        assert_eq!(
            self.open_files.lock()[&sector].directory_sector,
            directory.sector()
        );
        debug!("\"{name}\" at sector {sector} is open; marking for deletion");
        dir.mark_for_deletion(sector);
        dir.write_back(directory);
        Ok(())
    }

    /// Shared cached header for a managed sector, if any.
    pub(crate) fn cached_header(&self, sector: u32) -> Option<Arc<Mutex<FileHeader>>> {
        self.open_files.lock().get(&sector).map(|info| info.header.clone())
    }

    /// Recorded parent-directory sector for a managed sector.
    pub(crate) fn directory_sector(&self, sector: u32) -> Option<u32> {
        self.open_files
            .lock()
            .get(&sector)
            .map(|info| info.directory_sector)
    }
}
