//! Command-line argument marshalling between parent and child processes.
//!
//! At exec time the argv strings are copied out of the parent's memory;
//! once the child's address space is live they are written onto its stack
//! in reverse order, followed by the argv pointer array, and the stack
//! pointer is lowered past them.

use ember_machine::Register;
use log::debug;

use crate::Kernel;

pub const MAX_ARG_COUNT: usize = 32;
pub const MAX_ARG_LENGTH: usize = 128;

impl Kernel {
    /// Copy the null-terminated argv array at `address` out of the current
    /// (parent) address space.
    pub(crate) fn save_args(&self, address: u32) -> Option<Vec<String>> {
        let mut args = Vec::new();
        for i in 0..MAX_ARG_COUNT {
            let pointer = self.user_word_read(address + 4 * i as u32)?;
            if pointer == 0 {
                debug!("saved {} argument(s) from the parent", args.len());
                return Some(args);
            }
            args.push(self.read_string_from_user(pointer, MAX_ARG_LENGTH)?);
        }
        // Too many arguments without a terminating null.
        None
    }

    /// Write `args` onto the current (child) stack and leave the stack
    /// pointer below the argv array. Returns argc; the caller puts argc
    /// and the argv address into the argument registers.
    pub(crate) fn write_args(&self, args: &[String]) -> Option<u32> {
        assert!(args.len() < MAX_ARG_COUNT);
        debug!("writing {} argument(s) into the child", args.len());

        let mut sp = self.machine.read_register(Register::SP);
        let mut addresses = Vec::with_capacity(args.len());
        for arg in args {
            sp -= arg.len() as u32 + 1;
            if !self.write_string_to_user(arg, sp) {
                return None;
            }
            addresses.push(sp);
        }

        sp -= sp % 4;
        sp -= addresses.len() as u32 * 4 + 4;
        for (i, &address) in addresses.iter().enumerate() {
            if !self.user_word_write(sp + 4 * i as u32, address) {
                return None;
            }
        }
        if !self.user_word_write(sp + 4 * addresses.len() as u32, 0) {
            return None;
        }

        self.machine.write_register(Register::SP, sp);
        Some(args.len() as u32)
    }
}
