//! On-disk layout of the ember file system and executable images.
//!
//! Everything here is shared between the kernel and host-side tooling, so it
//! is pure layout: fixed-width `repr(C)` structs with `zerocopy` derives and
//! the constants that size them. The kernel gives these types behavior; this
//! crate only pins their bytes.

#![cfg_attr(not(test), no_std)]

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Width of one disk sector in bytes. Both file headers and data blocks are
/// sector-granular, and the MMU page size is tied to this value.
pub const SECTOR_SIZE: usize = 128;

/// Number of sectors on the simulated disk.
pub const NUM_SECTORS: usize = 1024;

/// Sector holding the free-map file header.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the root-directory file header.
pub const DIRECTORY_SECTOR: u32 = 1;

/// Size in bytes of the free-map file body (one bit per sector).
pub const FREE_MAP_FILE_SIZE: usize = NUM_SECTORS / 8;

/// Direct sector references in a file header. The header is laid out so the
/// whole struct is exactly one sector: four `u32` bookkeeping fields leave
/// room for this many direct references.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 4 * core::mem::size_of::<u32>()) / core::mem::size_of::<u32>();

/// Sector references held by one indirection sector.
pub const NUM_INDIRECT: usize = SECTOR_SIZE / core::mem::size_of::<u32>();

/// Largest file the header can map: direct refs, one single-indirect table
/// and a full double-indirect table of tables.
pub const MAX_FILE_SIZE: usize = (NUM_DIRECT + NUM_INDIRECT + NUM_INDIRECT * NUM_INDIRECT) * SECTOR_SIZE;

/// Maximum length of one path component, not counting a terminator. Names
/// are stored null-padded in directory entries.
pub const FILE_NAME_MAX_LEN: usize = 24;

/// Initial number of rows in a freshly created directory. The table grows in
/// increments of [`DIRECTORY_GROWTH_INCREMENT`] once these fill up.
pub const NUM_DIR_ENTRIES: usize = 10;

/// Rows added to a directory table each time `add` finds no free row.
pub const DIRECTORY_GROWTH_INCREMENT: usize = 10;

/// On-disk file header (i-node). Exactly one sector wide.
///
/// `num_sectors` counts data sectors only; the indirection sectors are
/// bookkeeping on top of it. A zero in `indirection_sector` or
/// `double_indirection_sector` is meaningful only when `num_sectors` says
/// the corresponding level is unused.
#[derive(Debug, Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct RawFileHeader {
    pub num_bytes: u32,
    pub num_sectors: u32,
    pub direct: [u32; NUM_DIRECT],
    pub indirection_sector: u32,
    pub double_indirection_sector: u32,
}

impl RawFileHeader {
    pub fn empty() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            direct: [0; NUM_DIRECT],
            indirection_sector: 0,
            double_indirection_sector: 0,
        }
    }
}

/// One row of a directory table.
///
/// Flags are stored as bytes so the struct needs no bit twiddling on disk:
/// `in_use` marks a live row, `is_directory` marks the target as a
/// sub-directory, and `marked_for_deletion` hides the row from name lookups
/// until the last open handle goes away.
#[derive(Debug, Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct DirectoryEntry {
    pub in_use: u8,
    pub is_directory: u8,
    pub marked_for_deletion: u8,
    _pad: u8,
    pub name: [u8; FILE_NAME_MAX_LEN],
    pub sector: u32,
}

/// Size of one directory row on disk.
pub const DIRECTORY_ENTRY_SIZE: usize = core::mem::size_of::<DirectoryEntry>();

/// Size in bytes of a freshly created directory body.
pub const DIRECTORY_FILE_SIZE: usize = NUM_DIR_ENTRIES * DIRECTORY_ENTRY_SIZE;

impl DirectoryEntry {
    pub fn vacant() -> Self {
        Self {
            in_use: 0,
            is_directory: 0,
            marked_for_deletion: 0,
            _pad: 0,
            name: [0; FILE_NAME_MAX_LEN],
            sector: 0,
        }
    }

    /// Build a live row. `name` must fit `FILE_NAME_MAX_LEN` bytes.
    pub fn occupied(name: &str, sector: u32, is_directory: bool) -> Self {
        let mut entry = Self::vacant();
        entry.in_use = 1;
        entry.is_directory = is_directory as u8;
        entry.sector = sector;
        let bytes = name.as_bytes();
        entry.name[..bytes.len()].copy_from_slice(bytes);
        entry
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn is_dir(&self) -> bool {
        self.is_directory != 0
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.marked_for_deletion != 0
    }

    /// The stored name up to its null padding.
    pub fn name_as_str(&self) -> &str {
        let end = self.name.iter().position(|&c| c == 0).unwrap_or(FILE_NAME_MAX_LEN);
        core::str::from_utf8(&self.name[..end]).unwrap_or("<invalid>")
    }
}

/// Magic number opening an executable image.
pub const IMAGE_MAGIC: u32 = 0x454D_4249;

/// One loadable segment of an executable image: where it lives in the
/// virtual address space, how many bytes it holds, and where those bytes
/// start inside the image file.
#[derive(Debug, Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct ImageSegment {
    pub virtual_addr: u32,
    pub size: u32,
    pub in_image_offset: u32,
}

impl ImageSegment {
    pub fn empty() -> Self {
        Self {
            virtual_addr: 0,
            size: 0,
            in_image_offset: 0,
        }
    }
}

/// Header of an executable image: code plus initialized data. Uninitialized
/// data and the user stack are materialized as zero-filled pages by the
/// kernel, so they have no presence in the image.
#[derive(Debug, Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct ImageHeader {
    pub magic: u32,
    pub code: ImageSegment,
    pub init_data: ImageSegment,
}

/// Size of the image header on disk.
pub const IMAGE_HEADER_SIZE: usize = core::mem::size_of::<ImageHeader>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_is_exactly_one_sector() {
        assert_eq!(core::mem::size_of::<RawFileHeader>(), SECTOR_SIZE);
    }

    #[test]
    fn directory_entry_has_stable_size() {
        assert_eq!(DIRECTORY_ENTRY_SIZE, 4 + FILE_NAME_MAX_LEN + 4);
    }

    #[test]
    fn header_round_trips_through_bytes() {
        use zerocopy::{AsBytes, FromBytes};

        let mut header = RawFileHeader::empty();
        header.num_bytes = 777;
        header.num_sectors = 7;
        header.direct[0] = 3;
        header.direct[NUM_DIRECT - 1] = 99;
        header.indirection_sector = 42;

        let bytes = header.as_bytes().to_vec();
        let back = RawFileHeader::read_from(bytes.as_slice()).unwrap();
        assert_eq!(back.num_bytes, 777);
        assert_eq!(back.num_sectors, 7);
        assert_eq!(back.direct[0], 3);
        assert_eq!(back.direct[NUM_DIRECT - 1], 99);
        assert_eq!(back.indirection_sector, 42);
    }

    #[test]
    fn entry_name_is_null_padded() {
        let entry = DirectoryEntry::occupied("notes", 12, false);
        assert_eq!(entry.name_as_str(), "notes");
        assert!(entry.is_in_use());
        assert!(!entry.is_dir());
        assert!(!entry.is_marked_for_deletion());
        assert_eq!(entry.name[5], 0);
    }

    #[test]
    fn capacity_formula_matches_layout() {
        assert_eq!(NUM_DIRECT, 28);
        assert_eq!(NUM_INDIRECT, 32);
        assert_eq!(MAX_FILE_SIZE, (28 + 32 + 32 * 32) * SECTOR_SIZE);
    }
}
