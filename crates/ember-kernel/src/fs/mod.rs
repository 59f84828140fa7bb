//! The file system.
//!
//! Layout on disk: sector 0 holds the free-map file header, sector 1 the
//! root-directory file header; both bodies are ordinary files. Every
//! mutating operation runs under the single façade lock, flushes the
//! structures it changed straight back to disk on success, and recovers
//! from mid-operation failure by simply discarding its in-memory free-map
//! copy (the next operation fetches a fresh one). Lock ordering is façade
//! lock before any per-file reader/writer lock; the one exception-shaped
//! path, write extension, re-enters the façade lock instead of taking it
//! twice.

pub mod directory;
pub mod file_header;
pub mod file_manager;
pub mod open_file;
pub mod synch_disk;

pub use directory::Directory;
pub use file_header::FileHeader;
pub use file_manager::FileManager;
pub use open_file::OpenFile;
pub use synch_disk::SynchDisk;

use std::sync::{Arc, Weak};

use ember_fs::{
    DIRECTORY_FILE_SIZE, DIRECTORY_SECTOR, FILE_NAME_MAX_LEN, FREE_MAP_FILE_SIZE, FREE_MAP_SECTOR,
    MAX_FILE_SIZE, NUM_DIR_ENTRIES, NUM_SECTORS, SECTOR_SIZE,
};
use log::{debug, error, info};
use spin::Mutex;

use crate::bitmap::Bitmap;
use crate::error::FsError;
use crate::sync::Lock;
use crate::thread::{current_thread, ThreadSystem};

pub struct FileSystem {
    lock: Lock,
    ts: Arc<ThreadSystem>,
    disk: Arc<SynchDisk>,
    manager: FileManager,
    free_map_file: OpenFile,
    weak_self: Weak<FileSystem>,
}

impl FileSystem {
    /// Bring up the file system over `disk`. With `format` the disk is
    /// initialized from scratch; otherwise the boot pass completes any
    /// deletions a previous run left deferred.
    pub fn new(ts: Arc<ThreadSystem>, disk: Arc<SynchDisk>, format: bool) -> Arc<Self> {
        let fs = Arc::new_cyclic(|weak: &Weak<FileSystem>| {
            if format {
                Self::format_disk(&disk, weak);
            }
            let free_map_file = OpenFile::fetch_plain(FREE_MAP_SECTOR, disk.clone(), weak.clone());
            FileSystem {
                lock: Lock::new(&ts),
                manager: FileManager::new(ts.clone(), disk.clone()),
                ts,
                disk,
                free_map_file,
                weak_self: weak.clone(),
            }
        });
        if !format {
            fs.boot_cleanup();
        }
        fs
    }

    fn format_disk(disk: &Arc<SynchDisk>, weak: &Weak<FileSystem>) {
        info!("formatting the file system");

        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.mark(FREE_MAP_SECTOR as usize);
        free_map.mark(DIRECTORY_SECTOR as usize);

        let mut map_header = FileHeader::new();
        let mut dir_header = FileHeader::new();
        map_header
            .allocate(&mut free_map, FREE_MAP_FILE_SIZE)
            .expect("no room for the free-map file on an empty disk");
        dir_header
            .allocate(&mut free_map, DIRECTORY_FILE_SIZE)
            .expect("no room for the root directory on an empty disk");

        // Headers first: opening a file reads its header off disk.
        map_header.write_back(disk, FREE_MAP_SECTOR);
        dir_header.write_back(disk, DIRECTORY_SECTOR);

        let map_file = OpenFile::plain(
            FREE_MAP_SECTOR,
            Arc::new(Mutex::new(map_header)),
            disk.clone(),
            weak.clone(),
        );
        let dir_file = OpenFile::plain(
            DIRECTORY_SECTOR,
            Arc::new(Mutex::new(dir_header)),
            disk.clone(),
            weak.clone(),
        );

        free_map.write_back(&map_file);
        Directory::new(NUM_DIR_ENTRIES).write_back(&dir_file);
    }

    /// Complete deferred deletions anywhere in the tree.
    fn boot_cleanup(self: &Arc<Self>) {
        self.lock.acquire();
        let mut free_map = self.fetch_free_map();
        let mut dirty = false;
        self.sweep_directory(DIRECTORY_SECTOR, &mut free_map, &mut dirty);
        if dirty {
            self.flush_free_map(&free_map);
        }
        self.lock.release();
    }

    fn sweep_directory(&self, dir_sector: u32, free_map: &mut Bitmap, dirty: &mut bool) {
        let file = OpenFile::fetch_plain(dir_sector, self.disk.clone(), self.weak_self.clone());
        let mut dir = Directory::fetch_from(&file);

        let rows: Vec<(u32, bool, bool)> = dir
            .entries()
            .iter()
            .filter(|e| e.is_in_use())
            .map(|e| (e.sector, e.is_dir(), e.is_marked_for_deletion()))
            .collect();

        let mut changed = false;
        for (sector, is_dir, marked) in rows {
            if is_dir && !marked {
                self.sweep_directory(sector, free_map, dirty);
            }
            if marked {
                debug!("boot sweep: freeing sector {sector} left marked for deletion");
                let header = FileHeader::fetch_from(&self.disk, sector);
                header.deallocate(free_map);
                free_map.clear(sector as usize);
                assert!(dir.remove_marked_for_deletion(sector));
                changed = true;
            }
        }
        if changed {
            dir.write_back(&file);
            *dirty = true;
        }
    }

    pub(crate) fn weak_self(&self) -> Weak<FileSystem> {
        self.weak_self.clone()
    }

    pub(crate) fn fetch_free_map(&self) -> Bitmap {
        let mut map = Bitmap::new(NUM_SECTORS);
        map.fetch_from(&self.free_map_file);
        map
    }

    pub(crate) fn flush_free_map(&self, map: &Bitmap) {
        map.write_back(&self.free_map_file);
    }

    /// Free sectors currently recorded on disk.
    pub fn count_clear(&self) -> usize {
        self.lock.acquire();
        let clear = self.fetch_free_map().count_clear();
        self.lock.release();
        clear
    }

    // --- path resolution ---

    fn starting_directory(&self) -> Arc<OpenFile> {
        if let Some(cwd) = current_thread().cwd() {
            let parent = self
                .manager
                .directory_sector(cwd.sector())
                .unwrap_or(DIRECTORY_SECTOR);
            return self.manager.open_by_sector(self, cwd.sector(), parent);
        }
        self.manager
            .open_by_sector(self, DIRECTORY_SECTOR, DIRECTORY_SECTOR)
    }

    fn root_directory(&self) -> Arc<OpenFile> {
        self.manager
            .open_by_sector(self, DIRECTORY_SECTOR, DIRECTORY_SECTOR)
    }

    /// Walk `path` to the directory that encloses its final component.
    /// Returns that directory's handle plus the component. Caller closes
    /// the handle through the manager.
    fn resolve_parent(&self, path: &str) -> Result<(Arc<OpenFile>, String), FsError> {
        let mut tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();
        let name = tokens.pop().ok_or(FsError::BadArgument)?;
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::BadArgument);
        }

        let start = if path.starts_with('/') {
            self.root_directory()
        } else {
            self.starting_directory()
        };
        let dir = self.descend(start, &tokens)?;
        Ok((dir, name.to_string()))
    }

    /// Walk the whole of `path` as directories.
    fn resolve_directory(&self, path: &str) -> Result<Arc<OpenFile>, FsError> {
        let tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();
        let start = if path.starts_with('/') {
            self.root_directory()
        } else {
            self.starting_directory()
        };
        self.descend(start, &tokens)
    }

    fn descend(&self, start: Arc<OpenFile>, tokens: &[&str]) -> Result<Arc<OpenFile>, FsError> {
        let mut handle = start;
        for token in tokens {
            let next_sector = Directory::fetch_from(&handle).find_directory(token);
            let Some(next_sector) = next_sector else {
                self.manager.close(self, &handle);
                return Err(FsError::NotFound);
            };
            let next = self.manager.open_by_sector(self, next_sector, handle.sector());
            self.manager.close(self, &handle);
            handle = next;
        }
        Ok(handle)
    }

    // --- operations ---

    /// Create a regular file of `initial_size` bytes.
    pub fn create_file(&self, path: &str, initial_size: usize) -> Result<(), FsError> {
        self.lock.acquire();
        debug!("create file \"{path}\", size {initial_size}");
        let result = self.create_file_locked(path, initial_size);
        self.lock.release();
        result
    }

    fn create_file_locked(&self, path: &str, initial_size: usize) -> Result<(), FsError> {
        if initial_size > MAX_FILE_SIZE {
            return Err(FsError::OutOfSpace);
        }
        let (parent, name) = self.resolve_parent(path)?;
        let result = (|| {
            let mut dir = Directory::fetch_from(&parent);
            if dir.has_entry(&name) {
                return Err(FsError::AlreadyExists);
            }
            let mut free_map = self.fetch_free_map();
            let sector = free_map.find().ok_or(FsError::OutOfSpace)? as u32;
            let mut header = FileHeader::new();
            header.allocate(&mut free_map, initial_size)?;

            assert!(dir.add(&name, sector, false));
            header.write_back(&self.disk, sector);
            self.flush_free_map(&free_map);
            dir.write_back(&parent);
            Ok(())
        })();
        self.manager.close(self, &parent);
        result
    }

    /// Create an empty sub-directory.
    pub fn create_directory(&self, path: &str) -> Result<(), FsError> {
        self.lock.acquire();
        debug!("create directory \"{path}\"");
        let result = self.create_directory_locked(path);
        self.lock.release();
        result
    }

    fn create_directory_locked(&self, path: &str) -> Result<(), FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        let result = (|| {
            let mut dir = Directory::fetch_from(&parent);
            if dir.has_entry(&name) {
                return Err(FsError::AlreadyExists);
            }
            let mut free_map = self.fetch_free_map();
            let sector = free_map.find().ok_or(FsError::OutOfSpace)? as u32;
            let mut header = FileHeader::new();
            header.allocate(&mut free_map, DIRECTORY_FILE_SIZE)?;

            assert!(dir.add(&name, sector, true));
            header.write_back(&self.disk, sector);

            let child_file = OpenFile::plain(
                sector,
                Arc::new(Mutex::new(header)),
                self.disk.clone(),
                self.weak_self.clone(),
            );
            Directory::new(NUM_DIR_ENTRIES).write_back(&child_file);

            self.flush_free_map(&free_map);
            dir.write_back(&parent);
            Ok(())
        })();
        self.manager.close(self, &parent);
        result
    }

    /// Open the named regular file for reading and writing.
    pub fn open(&self, path: &str) -> Result<Arc<OpenFile>, FsError> {
        self.lock.acquire();
        debug!("open \"{path}\"");
        let result = (|| {
            let (parent, name) = self.resolve_parent(path)?;
            let opened = self.manager.open(self, &name, &parent);
            self.manager.close(self, &parent);
            opened
        })();
        self.lock.release();
        result
    }

    /// Give back one open handle; the last close of a removed file frees
    /// its space.
    pub fn close(&self, file: &OpenFile) {
        self.lock.acquire();
        debug!("close handle on sector {}", file.sector());
        self.manager.close(self, file);
        self.lock.release();
    }

    /// Remove the named regular file, deferring while it is open.
    pub fn remove_file(&self, path: &str) -> Result<(), FsError> {
        self.lock.acquire();
        debug!("remove file \"{path}\"");
        let result = (|| {
            let (parent, name) = self.resolve_parent(path)?;
            let removed = self.manager.remove(self, &name, &parent);
            self.manager.close(self, &parent);
            removed
        })();
        self.lock.release();
        result
    }

    /// Remove the named directory; it must be empty. An open directory is
    /// marked and freed on its last close, like a file.
    pub fn remove_directory(&self, path: &str) -> Result<(), FsError> {
        self.lock.acquire();
        debug!("remove directory \"{path}\"");
        let result = (|| {
            let (parent, name) = self.resolve_parent(path)?;
            let result = (|| {
                let mut dir = Directory::fetch_from(&parent);
                let sector = dir.find_directory(&name).ok_or(FsError::NotFound)?;

                let target = OpenFile::fetch_plain(sector, self.disk.clone(), self.weak_self.clone());
                if !Directory::fetch_from(&target).is_empty() {
                    return Err(FsError::NotEmpty);
                }

                if self.manager.reference_count(sector) > 0 {
                    debug!("directory \"{name}\" is open; marking for deletion");
                    dir.mark_for_deletion(sector);
                    dir.write_back(&parent);
                    return Ok(());
                }

                self.free_file(sector);
                assert!(dir.remove(&name));
                dir.write_back(&parent);
                Ok(())
            })();
            self.manager.close(self, &parent);
            result
        })();
        self.lock.release();
        result
    }

    /// Grow an open file by `bytes`. Reentrant with respect to the façade
    /// lock: directory growth calls this from under it.
    pub fn extend_file(&self, file: &OpenFile, bytes: usize) -> Result<(), FsError> {
        if self.lock.is_held_by_current_thread() {
            self.extend_file_locked(file, bytes)
        } else {
            self.lock.acquire();
            let result = self.extend_file_locked(file, bytes);
            self.lock.release();
            result
        }
    }

    fn extend_file_locked(&self, file: &OpenFile, bytes: usize) -> Result<(), FsError> {
        let mut free_map = self.fetch_free_map();
        let flushed = {
            let mut header = file.header().lock();
            header.extend(&mut free_map, bytes)?;
            header.clone()
        };
        // The clone carries the grown map; write it outside the spin lock.
        flushed.write_back(&self.disk, file.sector());
        self.flush_free_map(&free_map);
        Ok(())
    }

    /// Point the calling thread's working directory at `path`.
    pub fn change_directory(&self, path: &str) -> Result<(), FsError> {
        self.lock.acquire();
        debug!("change directory to \"{path}\"");
        let result = (|| {
            let handle = self.resolve_directory(path)?;
            let previous = current_thread().swap_cwd(Some(handle));
            if let Some(previous) = previous {
                self.manager.close(self, &previous);
            }
            Ok(())
        })();
        self.lock.release();
        result
    }

    /// Newline-joined names in the directory at `path`.
    pub fn list_directory_contents(&self, path: &str) -> Result<String, FsError> {
        self.lock.acquire();
        let result = (|| {
            let handle = self.resolve_directory(path)?;
            let listing = Directory::fetch_from(&handle).list_contents();
            self.manager.close(self, &handle);
            Ok(listing)
        })();
        self.lock.release();
        result
    }

    /// Free a file's data, indirection and header sectors. Façade lock
    /// must be held; the file must have no open handles.
    fn free_file(&self, sector: u32) {
        assert!(self.lock.is_held_by_current_thread());
        let header = FileHeader::fetch_from(&self.disk, sector);
        let mut free_map = self.fetch_free_map();
        header.deallocate(&mut free_map);
        free_map.clear(sector as usize);
        self.flush_free_map(&free_map);
    }

    // --- consistency check ---

    /// Walk the whole tree, shadow-marking every referenced sector, and
    /// compare the result with the persisted free map. Specifics are
    /// logged; the verdict is the return value.
    pub fn check(&self) -> bool {
        self.lock.acquire();
        debug!("running file system check");

        let mut shadow = Bitmap::new(NUM_SECTORS);
        let mut ok = true;

        ok &= check_sector(FREE_MAP_SECTOR, &mut shadow);
        ok &= check_sector(DIRECTORY_SECTOR, &mut shadow);

        let map_header = FileHeader::fetch_from(&self.disk, FREE_MAP_SECTOR);
        if map_header.file_length() != FREE_MAP_FILE_SIZE {
            error!("check: free-map file has wrong size {}", map_header.file_length());
            ok = false;
        }
        ok &= check_header(&map_header, FREE_MAP_SECTOR, &mut shadow);

        ok &= self.check_directory_tree(DIRECTORY_SECTOR, &mut shadow);

        let persisted = self.fetch_free_map();
        for sector in 0..NUM_SECTORS {
            if persisted.test(sector) != shadow.test(sector) {
                error!(
                    "check: sector {sector} is {} on disk but {} by reachability",
                    if persisted.test(sector) { "used" } else { "free" },
                    if shadow.test(sector) { "used" } else { "free" },
                );
                ok = false;
            }
        }

        info!("file system check {}", if ok { "passed" } else { "failed" });
        self.lock.release();
        ok
    }

    fn check_directory_tree(&self, dir_sector: u32, shadow: &mut Bitmap) -> bool {
        let mut ok = true;

        let dir_header = FileHeader::fetch_from(&self.disk, dir_sector);
        ok &= check_header(&dir_header, dir_sector, shadow);

        let file = OpenFile::fetch_plain(dir_sector, self.disk.clone(), self.weak_self.clone());
        let dir = Directory::fetch_from(&file);

        let mut seen = Vec::new();
        for entry in dir.entries().iter().filter(|e| e.is_in_use()) {
            let name = entry.name_as_str();
            if !entry.is_marked_for_deletion() {
                if seen.contains(&name) {
                    error!("check: duplicate name \"{name}\" in directory at sector {dir_sector}");
                    ok = false;
                } else {
                    seen.push(name);
                }
            }

            ok &= check_sector(entry.sector, shadow);
            if entry.is_dir() {
                ok &= self.check_directory_tree(entry.sector, shadow);
            } else {
                let header = FileHeader::fetch_from(&self.disk, entry.sector);
                ok &= check_header(&header, entry.sector, shadow);
            }
        }
        ok
    }

    /// Log the tree and allocation summary. Debugging aid.
    pub fn print(&self) {
        self.lock.acquire();
        let free = self.fetch_free_map().count_clear();
        info!("file system: {free} of {NUM_SECTORS} sectors free");
        if let Ok(listing) = (|| -> Result<String, FsError> {
            let root = self.root_directory();
            let listing = Directory::fetch_from(&root).list_contents();
            self.manager.close(self, &root);
            Ok(listing)
        })() {
            info!("root directory:\n{listing}");
        }
        self.lock.release();
    }

    pub(crate) fn manager(&self) -> &FileManager {
        &self.manager
    }

    pub(crate) fn thread_system(&self) -> &Arc<ThreadSystem> {
        &self.ts
    }
}

fn check_sector(sector: u32, shadow: &mut Bitmap) -> bool {
    if sector as usize >= NUM_SECTORS {
        error!("check: sector number {sector} out of range");
        return false;
    }
    if shadow.test(sector as usize) {
        error!("check: sector {sector} referenced twice");
        return false;
    }
    shadow.mark(sector as usize);
    true
}

fn check_header(header: &FileHeader, sector: u32, shadow: &mut Bitmap) -> bool {
    let mut ok = true;
    let expected = header.file_length().div_ceil(SECTOR_SIZE);
    if header.raw().num_sectors as usize != expected {
        error!("check: header at {sector} has {} sectors for {} bytes", header.raw().num_sectors, header.file_length());
        ok = false;
    }
    for s in header.data_sectors().into_iter().chain(header.indirection_sectors()) {
        ok &= check_sector(s, &mut *shadow);
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::default_kernel;
    use ember_fs::{NUM_DIRECT, NUM_INDIRECT};

    #[test]
    fn create_write_read_round_trip() {
        let fixture = default_kernel("fs-roundtrip");
        let fs = &fixture.kernel.file_system;

        fs.create_file("a", 10).unwrap();
        let file = fs.open("a").unwrap();
        assert_eq!(file.write(b"0123456789"), 10);
        fs.close(&file);

        let file = fs.open("a").unwrap();
        let mut buffer = [0u8; 16];
        assert_eq!(file.read(&mut buffer), 10);
        assert_eq!(&buffer[..10], b"0123456789");
        fs.close(&file);

        assert!(fs.check());
    }

    #[test]
    fn freshly_formatted_disk_passes_check() {
        let fixture = default_kernel("fs-fresh");
        assert!(fixture.kernel.file_system.check());
    }

    #[test]
    fn create_rejects_duplicates_and_reports_missing_files() {
        let fixture = default_kernel("fs-dup");
        let fs = &fixture.kernel.file_system;

        fs.create_file("x", 0).unwrap();
        assert_eq!(fs.create_file("x", 0), Err(FsError::AlreadyExists));
        assert!(matches!(fs.open("missing"), Err(FsError::NotFound)));
        assert_eq!(fs.remove_file("missing"), Err(FsError::NotFound));
    }

    #[test]
    fn removal_of_an_open_file_is_deferred_until_last_close() {
        let fixture = default_kernel("fs-deferred");
        let fs = &fixture.kernel.file_system;
        let clear_before = fs.count_clear();

        fs.create_file("f", 3 * SECTOR_SIZE).unwrap();
        let file = fs.open("f").unwrap();
        let second = fs.open("f").unwrap();

        fs.remove_file("f").unwrap();
        // Invisible to new opens, still fully readable by holders.
        assert!(matches!(fs.open("f"), Err(FsError::NotFound)));
        let mut byte = [0u8; 1];
        assert_eq!(file.read_at(&mut byte, 0), 1);

        fs.close(&file);
        assert!(fs.manager().is_managed(second.sector()));
        fs.close(&second);

        // Last close freed the header and every data sector.
        assert_eq!(fs.count_clear(), clear_before);
        assert!(fs.check());
    }

    #[test]
    fn writes_extend_files_across_indirection_levels() {
        let fixture = default_kernel("fs-extend");
        let fs = &fixture.kernel.file_system;

        fs.create_file("big", 0).unwrap();
        let file = fs.open("big").unwrap();

        let sectors = NUM_DIRECT + NUM_INDIRECT + 5;
        let payload: Vec<u8> = (0..sectors * SECTOR_SIZE).map(|i| (i % 251) as u8).collect();
        assert_eq!(file.write(&payload), payload.len());
        fs.close(&file);

        let file = fs.open("big").unwrap();
        assert_eq!(file.length(), payload.len());
        let mut tail = vec![0u8; SECTOR_SIZE];
        let tail_offset = payload.len() - SECTOR_SIZE;
        assert_eq!(file.read_at(&mut tail, tail_offset), SECTOR_SIZE);
        assert_eq!(&tail[..], &payload[tail_offset..]);
        fs.close(&file);

        assert!(fs.check());
    }

    #[test]
    fn failed_extension_leaves_the_file_length_alone() {
        let fixture = default_kernel("fs-extend-fail");
        let fs = &fixture.kernel.file_system;

        fs.create_file("small", SECTOR_SIZE).unwrap();
        let file = fs.open("small").unwrap();
        let length_before = file.length();

        // Far more than the disk can hold.
        let too_much = NUM_SECTORS * SECTOR_SIZE;
        assert_eq!(fs.extend_file(&file, too_much), Err(FsError::OutOfSpace));
        assert_eq!(file.length(), length_before);
        fs.close(&file);

        assert!(fs.check());
    }

    #[test]
    fn directories_nest_and_resolve_by_path() {
        let fixture = default_kernel("fs-dirs");
        let fs = &fixture.kernel.file_system;

        fs.create_directory("/home").unwrap();
        fs.create_directory("/home/user").unwrap();
        fs.create_file("/home/user/notes", 8).unwrap();

        let listing = fs.list_directory_contents("/home/user").unwrap();
        assert_eq!(listing, "notes");

        let file = fs.open("/home/user/notes").unwrap();
        assert_eq!(file.write(b"hi"), 2);
        fs.close(&file);

        // Relative resolution through the cwd.
        fs.change_directory("/home/user").unwrap();
        let file = fs.open("notes").unwrap();
        let mut buffer = [0u8; 2];
        assert_eq!(file.read(&mut buffer), 2);
        assert_eq!(&buffer, b"hi");
        fs.close(&file);
        fs.change_directory("/").unwrap();

        assert!(fs.check());
    }

    #[test]
    fn remove_directory_refuses_populated_targets() {
        let fixture = default_kernel("fs-rmdir");
        let fs = &fixture.kernel.file_system;
        let clear_before = fs.count_clear();

        fs.create_directory("d").unwrap();
        fs.create_file("d/inner", 0).unwrap();
        assert_eq!(fs.remove_directory("d"), Err(FsError::NotEmpty));

        fs.remove_file("d/inner").unwrap();
        fs.remove_directory("d").unwrap();
        assert_eq!(fs.count_clear(), clear_before);
        assert!(fs.check());
    }

    #[test]
    fn directory_grows_past_its_initial_table() {
        let fixture = default_kernel("fs-dirgrow");
        let fs = &fixture.kernel.file_system;

        for i in 0..ember_fs::NUM_DIR_ENTRIES + 3 {
            fs.create_file(&format!("file-{i}"), 0).unwrap();
        }
        let listing = fs.list_directory_contents("/").unwrap();
        assert_eq!(listing.lines().count(), ember_fs::NUM_DIR_ENTRIES + 3);
        assert!(fs.check());
    }
}
