//! Moving data between simulated user memory and the kernel.
//!
//! Every access goes through the MMU one byte at a time and may fault; the
//! fault is handled in place (loading the page or refilling the TLB) and
//! the access retried until it goes through or the fault proves fatal.

use ember_machine::{Control, Exception};

use crate::Kernel;

impl Kernel {
    fn user_byte_read(&self, address: u32) -> Option<u8> {
        loop {
            match self.machine.read_mem(address, 1) {
                Ok(value) => return Some(value as u8),
                Err(Exception::PageFault { bad_vaddr }) => {
                    if self.handle_page_fault(bad_vaddr) != Control::Resume {
                        return None;
                    }
                }
                Err(_) => return None,
            }
        }
    }

    fn user_byte_write(&self, address: u32, value: u8) -> bool {
        loop {
            match self.machine.write_mem(address, 1, u32::from(value)) {
                Ok(()) => return true,
                Err(Exception::PageFault { bad_vaddr }) => {
                    if self.handle_page_fault(bad_vaddr) != Control::Resume {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    /// Copy `into.len()` bytes out of user memory.
    pub fn read_buffer_from_user(&self, address: u32, into: &mut [u8]) -> bool {
        for (i, slot) in into.iter_mut().enumerate() {
            match self.user_byte_read(address + i as u32) {
                Some(byte) => *slot = byte,
                None => return false,
            }
        }
        true
    }

    /// Read a null-terminated user string of at most `max_len` bytes.
    /// `None` when the terminator does not appear within the bound or the
    /// access faults fatally.
    pub fn read_string_from_user(&self, address: u32, max_len: usize) -> Option<String> {
        let mut bytes = Vec::new();
        for i in 0..max_len {
            let byte = self.user_byte_read(address + i as u32)?;
            if byte == 0 {
                return String::from_utf8(bytes).ok();
            }
            bytes.push(byte);
        }
        None
    }

    /// Copy a kernel buffer into user memory.
    pub fn write_buffer_to_user(&self, from: &[u8], address: u32) -> bool {
        from.iter()
            .enumerate()
            .all(|(i, &byte)| self.user_byte_write(address + i as u32, byte))
    }

    /// Copy a string plus its terminator into user memory.
    pub fn write_string_to_user(&self, string: &str, address: u32) -> bool {
        self.write_buffer_to_user(string.as_bytes(), address)
            && self.user_byte_write(address + string.len() as u32, 0)
    }

    /// Read a word from user memory, faulting pages in as needed.
    pub(crate) fn user_word_read(&self, address: u32) -> Option<u32> {
        loop {
            match self.machine.read_mem(address, 4) {
                Ok(value) => return Some(value),
                Err(Exception::PageFault { bad_vaddr }) => {
                    if self.handle_page_fault(bad_vaddr) != Control::Resume {
                        return None;
                    }
                }
                Err(_) => return None,
            }
        }
    }

    pub(crate) fn user_word_write(&self, address: u32, value: u32) -> bool {
        loop {
            match self.machine.write_mem(address, 4, value) {
                Ok(()) => return true,
                Err(Exception::PageFault { bad_vaddr }) => {
                    if self.handle_page_fault(bad_vaddr) != Control::Resume {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
    }
}
