//! In-memory file header (i-node) management.
//!
//! The on-disk form is [`RawFileHeader`]: one sector holding the byte count
//! and the direct references plus the roots of the single- and
//! double-indirect block maps. The in-memory form inflates the referenced
//! indirection tables so the sector walk is table lookups.
//!
//! One helper, [`FileHeader::required_sectors`], is the single source of
//! truth for how many sectors a file of a given size consumes, data and
//! indirection included; allocate, extend, deallocate and the consistency
//! walk all derive from it.

use ember_fs::{RawFileHeader, MAX_FILE_SIZE, NUM_DIRECT, NUM_INDIRECT, SECTOR_SIZE};
use log::debug;
use zerocopy::{AsBytes, FromBytes};

use crate::bitmap::Bitmap;
use crate::error::FsError;
use crate::fs::SynchDisk;

#[derive(Clone)]
pub struct FileHeader {
    raw: RawFileHeader,
    indirect: Option<Vec<u32>>,
    double_index: Option<Vec<u32>>,
    double_rows: Vec<Vec<u32>>,
}

fn div_round_up(value: usize, divisor: usize) -> usize {
    value.div_ceil(divisor)
}

fn grab(free_map: &mut Bitmap) -> u32 {
    free_map.find().expect("free map exhausted after availability check") as u32
}

fn table_from_sector(bytes: &[u8; SECTOR_SIZE]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn table_to_sector(table: &[u32]) -> [u8; SECTOR_SIZE] {
    let mut bytes = [0u8; SECTOR_SIZE];
    for (chunk, value) in bytes.chunks_exact_mut(4).zip(table) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    bytes
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            raw: RawFileHeader::empty(),
            indirect: None,
            double_index: None,
            double_rows: Vec::new(),
        }
    }

    pub fn raw(&self) -> &RawFileHeader {
        &self.raw
    }

    pub fn file_length(&self) -> usize {
        self.raw.num_bytes as usize
    }

    fn num_data_sectors(&self) -> usize {
        self.raw.num_sectors as usize
    }

    /// Total sectors a file of `bytes` bytes occupies: data sectors plus
    /// the single-indirect table plus the double-indirect index and its
    /// started rows.
    pub fn required_sectors(bytes: usize) -> usize {
        let data = div_round_up(bytes, SECTOR_SIZE);
        let mut total = data;
        if data > NUM_DIRECT {
            total += 1;
        }
        if data > NUM_DIRECT + NUM_INDIRECT {
            let doubly = data - NUM_DIRECT - NUM_INDIRECT;
            total += 1 + div_round_up(doubly, NUM_INDIRECT);
        }
        total
    }

    /// Claim space for a fresh file of `size` bytes. All or nothing: on
    /// failure no free-map bit has been touched.
    pub fn allocate(&mut self, free_map: &mut Bitmap, size: usize) -> Result<(), FsError> {
        if size > MAX_FILE_SIZE {
            return Err(FsError::OutOfSpace);
        }
        if free_map.count_clear() < Self::required_sectors(size) {
            return Err(FsError::OutOfSpace);
        }

        let sectors = div_round_up(size, SECTOR_SIZE);
        self.raw.num_bytes = size as u32;
        self.raw.num_sectors = sectors as u32;
        for index in 0..sectors {
            self.add_data_sector(free_map, index);
        }
        Ok(())
    }

    /// Grow the file by `bytes`. The free map is consulted for the sector
    /// delta first, so a failed extension leaves both the map and the
    /// header untouched.
    pub fn extend(&mut self, free_map: &mut Bitmap, bytes: usize) -> Result<(), FsError> {
        let new_bytes = self.file_length() + bytes;
        if new_bytes > MAX_FILE_SIZE {
            return Err(FsError::OutOfSpace);
        }

        let old_sectors = self.num_data_sectors();
        let new_sectors = div_round_up(new_bytes, SECTOR_SIZE);
        let delta = Self::required_sectors(new_bytes) - Self::required_sectors(self.file_length());
        if free_map.count_clear() < delta {
            return Err(FsError::OutOfSpace);
        }

        for index in old_sectors..new_sectors {
            self.add_data_sector(free_map, index);
        }
        self.raw.num_bytes = new_bytes as u32;
        self.raw.num_sectors = new_sectors as u32;
        Ok(())
    }

    /// Return every sector of the file, indirection machinery included, to
    /// the free map. Each must currently be marked.
    pub fn deallocate(&self, free_map: &mut Bitmap) {
        for sector in self.data_sectors().into_iter().chain(self.indirection_sectors()) {
            assert!(free_map.test(sector as usize), "freeing an unmarked sector");
            free_map.clear(sector as usize);
        }
    }

    fn add_data_sector(&mut self, free_map: &mut Bitmap, index: usize) {
        if index < NUM_DIRECT {
            self.raw.direct[index] = grab(free_map);
            return;
        }

        if index < NUM_DIRECT + NUM_INDIRECT {
            if index == NUM_DIRECT {
                self.raw.indirection_sector = grab(free_map);
                self.indirect = Some(vec![0; NUM_INDIRECT]);
            }
            let table = self.indirect.as_mut().expect("indirect table missing");
            table[index - NUM_DIRECT] = grab(free_map);
            return;
        }

        let doubly = index - NUM_DIRECT - NUM_INDIRECT;
        if doubly == 0 {
            self.raw.double_indirection_sector = grab(free_map);
            self.double_index = Some(vec![0; NUM_INDIRECT]);
        }
        if doubly % NUM_INDIRECT == 0 {
            let row_pool = grab(free_map);
            let row = doubly / NUM_INDIRECT;
            self.double_index.as_mut().expect("double index missing")[row] = row_pool;
            self.double_rows.push(vec![0; NUM_INDIRECT]);
        }
        self.double_rows[doubly / NUM_INDIRECT][doubly % NUM_INDIRECT] = grab(free_map);
    }

    /// Which sector stores the byte at `offset`.
    pub fn byte_to_sector(&self, offset: usize) -> u32 {
        assert!(offset < self.file_length(), "offset beyond end of file");
        self.data_sector(offset / SECTOR_SIZE)
    }

    fn data_sector(&self, index: usize) -> u32 {
        assert!(index < self.num_data_sectors());
        if index < NUM_DIRECT {
            return self.raw.direct[index];
        }
        if index < NUM_DIRECT + NUM_INDIRECT {
            return self.indirect.as_ref().expect("indirect table missing")[index - NUM_DIRECT];
        }
        let doubly = index - NUM_DIRECT - NUM_INDIRECT;
        self.double_rows[doubly / NUM_INDIRECT][doubly % NUM_INDIRECT]
    }

    /// Every data sector, in file order.
    pub fn data_sectors(&self) -> Vec<u32> {
        (0..self.num_data_sectors()).map(|i| self.data_sector(i)).collect()
    }

    /// Every indirection sector currently in use.
    pub fn indirection_sectors(&self) -> Vec<u32> {
        let data = self.num_data_sectors();
        let mut sectors = Vec::new();
        if data > NUM_DIRECT {
            sectors.push(self.raw.indirection_sector);
        }
        if data > NUM_DIRECT + NUM_INDIRECT {
            sectors.push(self.raw.double_indirection_sector);
            let rows = div_round_up(data - NUM_DIRECT - NUM_INDIRECT, NUM_INDIRECT);
            let index = self.double_index.as_ref().expect("double index missing");
            sectors.extend_from_slice(&index[..rows]);
        }
        sectors
    }

    /// Inflate a header from disk, indirection tables included.
    pub fn fetch_from(disk: &SynchDisk, sector: u32) -> Self {
        let mut buffer = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buffer);
        let raw = RawFileHeader::read_from(buffer.as_slice()).expect("header sector malformed");

        let mut header = Self {
            raw,
            indirect: None,
            double_index: None,
            double_rows: Vec::new(),
        };

        let data = header.num_data_sectors();
        if data > NUM_DIRECT {
            disk.read_sector(header.raw.indirection_sector, &mut buffer);
            header.indirect = Some(table_from_sector(&buffer));
        }
        if data > NUM_DIRECT + NUM_INDIRECT {
            disk.read_sector(header.raw.double_indirection_sector, &mut buffer);
            let index = table_from_sector(&buffer);
            let rows = div_round_up(data - NUM_DIRECT - NUM_INDIRECT, NUM_INDIRECT);
            for row in 0..rows {
                disk.read_sector(index[row], &mut buffer);
                header.double_rows.push(table_from_sector(&buffer));
            }
            header.double_index = Some(index);
        }
        header
    }

    /// Flush the header and its indirection tables to disk.
    pub fn write_back(&self, disk: &SynchDisk, sector: u32) {
        debug!(
            "writing back header at sector {sector}: {} bytes, {} sectors",
            self.raw.num_bytes, self.raw.num_sectors
        );
        let mut buffer = [0u8; SECTOR_SIZE];
        buffer.copy_from_slice(self.raw.as_bytes());
        disk.write_sector(sector, &buffer);

        let data = self.num_data_sectors();
        if data > NUM_DIRECT {
            let table = self.indirect.as_ref().expect("indirect table missing");
            disk.write_sector(self.raw.indirection_sector, &table_to_sector(table));
        }
        if data > NUM_DIRECT + NUM_INDIRECT {
            let index = self.double_index.as_ref().expect("double index missing");
            disk.write_sector(self.raw.double_indirection_sector, &table_to_sector(index));
            for (row, table) in self.double_rows.iter().enumerate() {
                disk.write_sector(index[row], &table_to_sector(table));
            }
        }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: usize = SECTOR_SIZE;

    #[test]
    fn required_sectors_counts_indirection_overhead() {
        assert_eq!(FileHeader::required_sectors(0), 0);
        assert_eq!(FileHeader::required_sectors(1), 1);
        assert_eq!(FileHeader::required_sectors(NUM_DIRECT * S), NUM_DIRECT);
        // One byte past the direct range buys a data sector and the
        // indirect table.
        assert_eq!(FileHeader::required_sectors(NUM_DIRECT * S + 1), NUM_DIRECT + 2);
        let spill = (NUM_DIRECT + NUM_INDIRECT) * S + 1;
        // Past single-indirect: data sector, double index, first row pool.
        assert_eq!(
            FileHeader::required_sectors(spill),
            NUM_DIRECT + NUM_INDIRECT + 1 + 1 + 1 + 1
        );
        assert_eq!(
            FileHeader::required_sectors(MAX_FILE_SIZE),
            NUM_DIRECT + NUM_INDIRECT + NUM_INDIRECT * NUM_INDIRECT + 1 + 1 + NUM_INDIRECT
        );
    }

    #[test]
    fn allocate_is_all_or_nothing() {
        let mut map = Bitmap::new(16);
        let mut header = FileHeader::new();
        // 20 sectors of data cannot fit in 16 free sectors.
        assert_eq!(header.allocate(&mut map, 20 * S), Err(FsError::OutOfSpace));
        assert_eq!(map.count_clear(), 16);

        assert!(header.allocate(&mut map, 10 * S).is_ok());
        assert_eq!(map.count_clear(), 6);
        assert_eq!(header.file_length(), 10 * S);
    }

    #[test]
    fn oversize_allocation_is_rejected() {
        let mut map = Bitmap::new(8);
        let mut header = FileHeader::new();
        assert_eq!(
            header.allocate(&mut map, MAX_FILE_SIZE + 1),
            Err(FsError::OutOfSpace)
        );
        assert_eq!(map.count_clear(), 8);
    }

    #[test]
    fn byte_to_sector_walks_all_three_levels() {
        let sectors = NUM_DIRECT + NUM_INDIRECT + 5;
        let mut map = Bitmap::new(FileHeader::required_sectors(sectors * S) + 4);
        let mut header = FileHeader::new();
        header.allocate(&mut map, sectors * S).unwrap();

        let direct = header.byte_to_sector(0);
        let single = header.byte_to_sector(NUM_DIRECT * S);
        let double = header.byte_to_sector((NUM_DIRECT + NUM_INDIRECT) * S);
        assert_eq!(direct, header.raw().direct[0]);
        assert_ne!(single, direct);
        assert_ne!(double, single);

        // The full walk covers every mapped byte boundary.
        for index in 0..sectors {
            header.byte_to_sector(index * S);
        }
        assert_eq!(header.data_sectors().len(), sectors);
        // indirect table + double index + one row pool
        assert_eq!(header.indirection_sectors().len(), 3);
    }

    #[test]
    fn extend_failure_changes_nothing() {
        let mut map = Bitmap::new(8);
        let mut header = FileHeader::new();
        header.allocate(&mut map, 4 * S).unwrap();
        let clear_before = map.count_clear();
        let length_before = header.file_length();

        assert_eq!(header.extend(&mut map, 32 * S), Err(FsError::OutOfSpace));
        assert_eq!(map.count_clear(), clear_before);
        assert_eq!(header.file_length(), length_before);
    }

    #[test]
    fn extend_crosses_into_indirect_blocks() {
        let total = NUM_DIRECT + 3;
        let mut map = Bitmap::new(total + 8);
        let mut header = FileHeader::new();
        header.allocate(&mut map, 2 * S).unwrap();

        header.extend(&mut map, (total - 2) * S).unwrap();
        assert_eq!(header.file_length(), total * S);
        assert_eq!(header.data_sectors().len(), total);
        assert_eq!(header.indirection_sectors().len(), 1);

        // Slack-only growth allocates nothing.
        let clear = map.count_clear();
        header.extend(&mut map, 0).unwrap();
        assert_eq!(map.count_clear(), clear);
    }

    #[test]
    fn deallocate_returns_every_sector() {
        let sectors = NUM_DIRECT + NUM_INDIRECT + 2;
        let size = sectors * S;
        let mut map = Bitmap::new(FileHeader::required_sectors(size) + 10);
        let mut header = FileHeader::new();
        header.allocate(&mut map, size).unwrap();
        assert_eq!(
            map.count_clear(),
            map.num_bits() - FileHeader::required_sectors(size)
        );

        header.deallocate(&mut map);
        assert_eq!(map.count_clear(), map.num_bits());
    }
}
