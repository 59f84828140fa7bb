//! Executable image reader: header parsing and segment block reads over an
//! open file.

use ember_fs::{ImageHeader, ImageSegment, IMAGE_HEADER_SIZE, IMAGE_MAGIC};
use zerocopy::FromBytes;

use crate::error::VmError;
use crate::fs::OpenFile;

#[derive(Debug, Clone, Copy)]
pub struct Executable {
    header: ImageHeader,
}

impl Executable {
    pub fn parse(file: &OpenFile) -> Result<Self, VmError> {
        let mut bytes = [0u8; IMAGE_HEADER_SIZE];
        if file.read_at(&mut bytes, 0) != IMAGE_HEADER_SIZE {
            return Err(VmError::BadImage);
        }
        let header = ImageHeader::read_from(bytes.as_slice()).ok_or(VmError::BadImage)?;
        if header.magic != IMAGE_MAGIC {
            return Err(VmError::BadImage);
        }
        Ok(Self { header })
    }

    pub fn code(&self) -> ImageSegment {
        self.header.code
    }

    pub fn init_data(&self) -> ImageSegment {
        self.header.init_data
    }

    /// Virtual extent of the loadable segments.
    pub fn size(&self) -> usize {
        (self.header.code.size + self.header.init_data.size) as usize
    }

    pub fn read_code_block(&self, file: &OpenFile, into: &mut [u8], offset: usize) -> usize {
        file.read_at(into, self.header.code.in_image_offset as usize + offset)
    }

    pub fn read_data_block(&self, file: &OpenFile, into: &mut [u8], offset: usize) -> usize {
        file.read_at(into, self.header.init_data.in_image_offset as usize + offset)
    }
}
