//! Building executable images on the host.
//!
//! The image format is the kernel's native one: a fixed header describing
//! the code and initialized-data segments, followed by their bytes. Code is
//! linked at virtual address 0; data follows it unless placed explicitly.

use ember_fs::{ImageHeader, ImageSegment, IMAGE_HEADER_SIZE, IMAGE_MAGIC};
use ember_machine::Instruction;
use zerocopy::AsBytes;

pub struct ImageBuilder {
    code: Vec<u32>,
    data: Vec<u8>,
    data_addr: Option<u32>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            data: Vec::new(),
            data_addr: None,
        }
    }

    /// Append one instruction to the code segment.
    pub fn push(mut self, instruction: Instruction) -> Self {
        self.code.push(instruction.encode());
        self
    }

    /// Append pre-encoded instruction words.
    pub fn push_words(mut self, words: &[u32]) -> Self {
        self.code.extend_from_slice(words);
        self
    }

    /// Set the initialized-data segment. Without an explicit address it is
    /// placed directly after the code.
    pub fn data(mut self, bytes: &[u8], address: Option<u32>) -> Self {
        self.data = bytes.to_vec();
        self.data_addr = address;
        self
    }

    /// Serialize header plus segments.
    pub fn build(self) -> Vec<u8> {
        let code_size = (self.code.len() * 4) as u32;
        let data_offset = IMAGE_HEADER_SIZE as u32 + code_size;
        let header = ImageHeader {
            magic: IMAGE_MAGIC,
            code: ImageSegment {
                virtual_addr: 0,
                size: code_size,
                in_image_offset: IMAGE_HEADER_SIZE as u32,
            },
            init_data: ImageSegment {
                virtual_addr: self.data_addr.unwrap_or(code_size),
                size: self.data.len() as u32,
                in_image_offset: data_offset,
            },
        };

        let mut bytes = header.as_bytes().to_vec();
        for word in &self.code {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
