//! Directory tables.
//!
//! A directory is a flat array of fixed-width rows persisted as the body of
//! a regular file. Lookups skip rows marked for deletion, which keeps a
//! file invisible from the moment it is removed even though its sectors
//! survive until the last handle closes. The table grows in fixed
//! increments when an add finds no free row; callers provide mutual
//! exclusion (the file-system façade lock).

use ember_fs::{DirectoryEntry, DIRECTORY_ENTRY_SIZE, FILE_NAME_MAX_LEN};
use log::debug;
use zerocopy::{AsBytes, FromBytes};

use crate::fs::OpenFile;

pub struct Directory {
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// An empty table of `size` vacant rows.
    pub fn new(size: usize) -> Self {
        Self {
            entries: vec![DirectoryEntry::vacant(); size],
        }
    }

    /// Load the table stored in `file`.
    pub fn fetch_from(file: &OpenFile) -> Self {
        let length = file.length();
        assert!(
            length % DIRECTORY_ENTRY_SIZE == 0,
            "directory body is not a whole number of rows"
        );

        let mut bytes = vec![0u8; length];
        let read = file.read_at(&mut bytes, 0);
        assert_eq!(read, length, "directory body truncated");

        let entries = bytes
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .map(|chunk| DirectoryEntry::read_from(chunk).expect("directory row malformed"))
            .collect();
        Self { entries }
    }

    /// Persist the table into `file`, growing the backing file when the
    /// table has grown.
    pub fn write_back(&self, file: &OpenFile) {
        let mut bytes = Vec::with_capacity(self.entries.len() * DIRECTORY_ENTRY_SIZE);
        for entry in &self.entries {
            bytes.extend_from_slice(entry.as_bytes());
        }
        let written = file.write_at(&bytes, 0);
        assert_eq!(written, bytes.len(), "directory flush truncated");
    }

    fn find_index(&self, name: &str, include_marked: bool) -> Option<usize> {
        self.entries.iter().position(|e| {
            e.is_in_use() && (include_marked || !e.is_marked_for_deletion()) && e.name_as_str() == name
        })
    }

    fn find_index_by_sector(&self, sector: u32, include_marked: bool) -> Option<usize> {
        self.entries.iter().position(|e| {
            e.is_in_use() && (include_marked || !e.is_marked_for_deletion()) && e.sector == sector
        })
    }

    /// Header sector of the named entry, file or directory.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.find_index(name, false).map(|i| self.entries[i].sector)
    }

    /// Header sector of the named regular file.
    pub fn find_file(&self, name: &str) -> Option<u32> {
        self.find_index(name, false)
            .filter(|&i| !self.entries[i].is_dir())
            .map(|i| self.entries[i].sector)
    }

    /// Header sector of the named sub-directory.
    pub fn find_directory(&self, name: &str) -> Option<u32> {
        self.find_index(name, false)
            .filter(|&i| self.entries[i].is_dir())
            .map(|i| self.entries[i].sector)
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.find_index(name, false).is_some()
    }

    /// Insert a row for `name`. Fails only on a duplicate name; a full
    /// table grows by a fixed increment instead of failing.
    pub fn add(&mut self, name: &str, sector: u32, is_directory: bool) -> bool {
        assert!(name.len() <= FILE_NAME_MAX_LEN, "name too long for a directory row");
        if self.find_index(name, false).is_some() {
            return false;
        }

        let row = match self.entries.iter().position(|e| !e.is_in_use()) {
            Some(row) => row,
            None => {
                let row = self.entries.len();
                debug!("growing directory table to {} rows", row + ember_fs::DIRECTORY_GROWTH_INCREMENT);
                self.entries.resize(
                    row + ember_fs::DIRECTORY_GROWTH_INCREMENT,
                    DirectoryEntry::vacant(),
                );
                row
            }
        };
        self.entries[row] = DirectoryEntry::occupied(name, sector, is_directory);
        true
    }

    /// Drop the named row entirely.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.find_index(name, false) {
            Some(row) => {
                self.entries[row] = DirectoryEntry::vacant();
                true
            }
            None => false,
        }
    }

    /// Hide the row whose target lives at `sector` until its last close.
    pub fn mark_for_deletion(&mut self, sector: u32) {
        let row = self
            .find_index_by_sector(sector, false)
            .expect("marking a sector the directory does not hold");
        self.entries[row].marked_for_deletion = 1;
    }

    pub fn is_marked_for_deletion(&self, sector: u32) -> bool {
        self.find_index_by_sector(sector, true)
            .is_some_and(|row| self.entries[row].is_marked_for_deletion())
    }

    /// Complete a deferred deletion by dropping the marked row.
    pub fn remove_marked_for_deletion(&mut self, sector: u32) -> bool {
        match self.find_index_by_sector(sector, true) {
            Some(row) if self.entries[row].is_marked_for_deletion() => {
                self.entries[row] = DirectoryEntry::vacant();
                true
            }
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.is_in_use())
    }

    /// Visible entry names, in table order.
    pub fn list(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_in_use() && !e.is_marked_for_deletion())
            .map(|e| e.name_as_str().to_string())
            .collect()
    }

    /// Newline-joined listing for the console.
    pub fn list_contents(&self) -> String {
        self.list().join("\n")
    }

    pub(crate) fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_fs::NUM_DIR_ENTRIES;

    #[test]
    fn add_find_remove_round_trip() {
        let mut dir = Directory::new(NUM_DIR_ENTRIES);
        assert!(dir.add("alpha", 17, false));
        assert!(dir.add("beta", 18, true));

        assert_eq!(dir.find("alpha"), Some(17));
        assert_eq!(dir.find_file("alpha"), Some(17));
        assert_eq!(dir.find_directory("alpha"), None);
        assert_eq!(dir.find_directory("beta"), Some(18));

        assert!(dir.remove("alpha"));
        assert_eq!(dir.find("alpha"), None);
        assert!(!dir.remove("alpha"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut dir = Directory::new(NUM_DIR_ENTRIES);
        assert!(dir.add("same", 5, false));
        assert!(!dir.add("same", 6, false));
        assert_eq!(dir.find("same"), Some(5));
    }

    #[test]
    fn full_table_grows_instead_of_failing() {
        let mut dir = Directory::new(2);
        assert!(dir.add("a", 1, false));
        assert!(dir.add("b", 2, false));
        assert!(dir.add("c", 3, false));
        assert_eq!(dir.entries().len(), 2 + ember_fs::DIRECTORY_GROWTH_INCREMENT);
        assert_eq!(dir.find("c"), Some(3));
    }

    #[test]
    fn marked_rows_are_invisible_to_lookup_but_tracked_by_sector() {
        let mut dir = Directory::new(NUM_DIR_ENTRIES);
        dir.add("ghost", 9, false);
        dir.mark_for_deletion(9);

        assert_eq!(dir.find("ghost"), None);
        assert!(!dir.has_entry("ghost"));
        assert!(dir.is_marked_for_deletion(9));
        assert!(!dir.is_empty());

        // A new file may take the old name while the ghost lingers.
        assert!(dir.add("ghost", 11, false));
        assert_eq!(dir.find("ghost"), Some(11));

        assert!(dir.remove_marked_for_deletion(9));
        assert!(!dir.is_marked_for_deletion(9));
    }

    #[test]
    fn listing_skips_vacant_and_marked_rows() {
        let mut dir = Directory::new(NUM_DIR_ENTRIES);
        dir.add("keep", 1, false);
        dir.add("drop", 2, false);
        dir.mark_for_deletion(2);
        assert_eq!(dir.list(), vec!["keep".to_string()]);
        assert_eq!(dir.list_contents(), "keep");
    }
}
