//! System-call decoding and dispatch.
//!
//! Convention: the call identifier arrives in `r2` (`V0`), up to four
//! arguments in `r4..r7` (`A0..A3`), and the result goes back into `r2`
//! before the PC is advanced past the trapping instruction. File
//! descriptors 0 and 1 are the console; descriptors handed out by `Open`
//! start at 2.

pub mod args;
pub mod process_table;
pub mod transfer;

use std::sync::Arc;

use log::{debug, error};

use ember_machine::{Control, Register};

use crate::error::FsError;
use crate::thread::{current_thread, Thread};
use crate::Kernel;

pub use process_table::{ProcessTable, MAX_PROCESSES};

/// Longest path accepted from user space, terminator excluded.
pub const MAX_PATH_LENGTH: usize = 256;

pub const CONSOLE_INPUT_FD: u32 = 0;
pub const CONSOLE_OUTPUT_FD: u32 = 1;

pub const SC_HALT: u32 = 0;
pub const SC_EXIT: u32 = 1;
pub const SC_EXEC: u32 = 2;
pub const SC_JOIN: u32 = 3;
pub const SC_CREATE: u32 = 4;
pub const SC_REMOVE: u32 = 5;
pub const SC_OPEN: u32 = 6;
pub const SC_READ: u32 = 7;
pub const SC_WRITE: u32 = 8;
pub const SC_CLOSE: u32 = 9;
pub const SC_PS: u32 = 10;
pub const SC_CD: u32 = 11;
pub const SC_MKDIR: u32 = 12;
pub const SC_LS: u32 = 13;
pub const SC_RMDIR: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt,
    Exit { status: i32 },
    Exec { path_ptr: u32, argv_ptr: u32, parallel: bool },
    Join { pid: i32 },
    Create { path_ptr: u32 },
    Remove { path_ptr: u32 },
    Open { path_ptr: u32 },
    Read { buffer_ptr: u32, size: u32, fd: u32 },
    Write { buffer_ptr: u32, size: u32, fd: u32 },
    Close { fd: u32 },
    Ps,
    ChangeDirectory { path_ptr: u32 },
    CreateDirectory { path_ptr: u32 },
    ListDirectoryContents { path_ptr: u32 },
    RemoveDirectory { path_ptr: u32 },
}

impl Syscall {
    /// Decode the pending call from the conventional registers.
    pub fn from_registers(machine: &ember_machine::Machine) -> Result<Self, u32> {
        let id = machine.read_register(Register::V0);
        let a0 = machine.read_register(Register::A0);
        let a1 = machine.read_register(Register::A1);
        let a2 = machine.read_register(Register::A2);

        let call = match id {
            SC_HALT => Syscall::Halt,
            SC_EXIT => Syscall::Exit { status: a0 as i32 },
            SC_EXEC => Syscall::Exec {
                path_ptr: a0,
                argv_ptr: a1,
                parallel: a2 != 0,
            },
            SC_JOIN => Syscall::Join { pid: a0 as i32 },
            SC_CREATE => Syscall::Create { path_ptr: a0 },
            SC_REMOVE => Syscall::Remove { path_ptr: a0 },
            SC_OPEN => Syscall::Open { path_ptr: a0 },
            SC_READ => Syscall::Read {
                buffer_ptr: a0,
                size: a1,
                fd: a2,
            },
            SC_WRITE => Syscall::Write {
                buffer_ptr: a0,
                size: a1,
                fd: a2,
            },
            SC_CLOSE => Syscall::Close { fd: a0 },
            SC_PS => Syscall::Ps,
            SC_CD => Syscall::ChangeDirectory { path_ptr: a0 },
            SC_MKDIR => Syscall::CreateDirectory { path_ptr: a0 },
            SC_LS => Syscall::ListDirectoryContents { path_ptr: a0 },
            SC_RMDIR => Syscall::RemoveDirectory { path_ptr: a0 },
            unknown => return Err(unknown),
        };
        Ok(call)
    }
}

impl Kernel {
    pub(crate) fn handle_syscall(&self) -> Control {
        let call = match Syscall::from_registers(&self.machine) {
            Ok(call) => call,
            Err(id) => {
                error!("unexpected system call id {id}");
                return Control::Terminate(-1);
            }
        };
        debug!("syscall {call:?} from \"{}\"", current_thread().name());

        match call {
            Syscall::Halt => {
                debug!("halt requested by user program");
                return Control::Halt;
            }
            Syscall::Exit { status } => {
                debug!("\"{}\" exiting with status {status}", current_thread().name());
                return Control::Terminate(status);
            }
            other => {
                let result = self.dispatch(other);
                self.machine.write_register(Register::V0, result as u32);
                self.increment_pc();
            }
        }
        Control::Resume
    }

    fn increment_pc(&self) {
        let pc = self.machine.read_register(Register::PC);
        let next = self.machine.read_register(Register::NEXT_PC);
        self.machine.write_register(Register::PREV_PC, pc);
        self.machine.write_register(Register::PC, next);
        self.machine.write_register(Register::NEXT_PC, next.wrapping_add(4));
    }

    fn user_path(&self, path_ptr: u32) -> Option<String> {
        if path_ptr == 0 {
            debug!("null user path pointer");
            return None;
        }
        self.read_string_from_user(path_ptr, MAX_PATH_LENGTH)
    }

    fn dispatch(&self, call: Syscall) -> i32 {
        match call {
            Syscall::Create { path_ptr } => match self.user_path(path_ptr) {
                Some(path) => fs_result(self.file_system.create_file(&path, 0)),
                None => -1,
            },
            Syscall::Remove { path_ptr } => match self.user_path(path_ptr) {
                Some(path) => fs_result(self.file_system.remove_file(&path)),
                None => -1,
            },
            Syscall::Open { path_ptr } => self.handle_open(path_ptr),
            Syscall::Close { fd } => self.handle_close(fd),
            Syscall::Read { buffer_ptr, size, fd } => self.handle_read(buffer_ptr, size, fd),
            Syscall::Write { buffer_ptr, size, fd } => self.handle_write(buffer_ptr, size, fd),
            Syscall::Exec { path_ptr, argv_ptr, parallel } => self.handle_exec(path_ptr, argv_ptr, parallel),
            Syscall::Join { pid } => self.handle_join(pid),
            Syscall::Ps => {
                self.synch_console.write(self.process_table.listing().as_bytes());
                0
            }
            Syscall::ChangeDirectory { path_ptr } => match self.user_path(path_ptr) {
                Some(path) => fs_result(self.file_system.change_directory(&path)),
                None => -1,
            },
            Syscall::CreateDirectory { path_ptr } => match self.user_path(path_ptr) {
                Some(path) => fs_result(self.file_system.create_directory(&path)),
                None => -1,
            },
            Syscall::ListDirectoryContents { path_ptr } => match self.user_path(path_ptr) {
                Some(path) => match self.file_system.list_directory_contents(&path) {
                    Ok(listing) => {
                        self.synch_console.write(listing.as_bytes());
                        self.synch_console.write(b"\n");
                        0
                    }
                    Err(_) => -1,
                },
                None => -1,
            },
            Syscall::RemoveDirectory { path_ptr } => match self.user_path(path_ptr) {
                Some(path) => fs_result(self.file_system.remove_directory(&path)),
                None => -1,
            },
            Syscall::Halt | Syscall::Exit { .. } => unreachable!("handled before dispatch"),
        }
    }

    fn handle_open(&self, path_ptr: u32) -> i32 {
        let Some(path) = self.user_path(path_ptr) else { return -1 };
        let file = match self.file_system.open(&path) {
            Ok(file) => file,
            Err(_) => {
                debug!("open: \"{path}\" not found");
                return -1;
            }
        };

        let thread = current_thread();
        match thread.with_open_files(|table| table.add(file.clone())) {
            Some(key) => (key as u32 + 2) as i32,
            None => {
                debug!("open: \"{path}\": descriptor table full");
                self.file_system.close(&file);
                -1
            }
        }
    }

    fn handle_close(&self, fd: u32) -> i32 {
        if fd == CONSOLE_INPUT_FD || fd == CONSOLE_OUTPUT_FD {
            debug!("close: cannot close reserved descriptor {fd}");
            return -1;
        }
        let key = (fd - 2) as usize;
        let removed = current_thread().with_open_files(|table| table.remove(key));
        match removed {
            Some(file) => {
                self.file_system.close(&file);
                0
            }
            None => -1,
        }
    }

    fn handle_read(&self, buffer_ptr: u32, size: u32, fd: u32) -> i32 {
        if buffer_ptr == 0 || size == 0 {
            return -1;
        }
        match fd {
            CONSOLE_INPUT_FD => {
                let mut buffer = vec![0u8; size as usize];
                let read = self.synch_console.read(&mut buffer);
                if read > 0 && !self.write_buffer_to_user(&buffer[..read], buffer_ptr) {
                    return -1;
                }
                read as i32
            }
            CONSOLE_OUTPUT_FD => {
                debug!("read: cannot read from console output");
                -1
            }
            fd => {
                let key = (fd - 2) as usize;
                let Some(file) = current_thread().with_open_files(|table| table.get(key).cloned()) else {
                    return -1;
                };
                let mut buffer = vec![0u8; size as usize];
                let read = file.read(&mut buffer);
                if read > 0 && !self.write_buffer_to_user(&buffer[..read], buffer_ptr) {
                    return -1;
                }
                read as i32
            }
        }
    }

    fn handle_write(&self, buffer_ptr: u32, size: u32, fd: u32) -> i32 {
        if buffer_ptr == 0 || size == 0 {
            return -1;
        }
        match fd {
            CONSOLE_OUTPUT_FD => {
                let mut buffer = vec![0u8; size as usize];
                if !self.read_buffer_from_user(buffer_ptr, &mut buffer) {
                    return -1;
                }
                self.synch_console.write(&buffer);
                size as i32
            }
            CONSOLE_INPUT_FD => {
                debug!("write: cannot write to console input");
                -1
            }
            fd => {
                let key = (fd - 2) as usize;
                let Some(file) = current_thread().with_open_files(|table| table.get(key).cloned()) else {
                    return -1;
                };
                let mut buffer = vec![0u8; size as usize];
                if !self.read_buffer_from_user(buffer_ptr, &mut buffer) {
                    return -1;
                }
                file.write(&buffer) as i32
            }
        }
    }

    fn handle_exec(&self, path_ptr: u32, argv_ptr: u32, parallel: bool) -> i32 {
        let Some(path) = self.user_path(path_ptr) else { return -1 };
        let args = if argv_ptr != 0 {
            match self.save_args(argv_ptr) {
                Some(args) => Some(args),
                None => return -1,
            }
        } else {
            None
        };

        match self.spawn_process(&path, args) {
            Ok((pid, child)) => {
                if !parallel {
                    self.threads.join(&child);
                    self.process_table.release(pid);
                }
                pid as i32
            }
            Err(e) => {
                debug!("exec \"{path}\" failed: {e}");
                -1
            }
        }
    }

    fn handle_join(&self, pid: i32) -> i32 {
        if pid < 0 {
            return -1;
        }
        let Some(child) = self.process_table.get(pid as u32) else {
            debug!("join: no process {pid}");
            return -1;
        };
        if Arc::ptr_eq(&child, &current_thread()) || !child.is_joinable() {
            return -1;
        }
        let status = self.threads.join(&child);
        self.process_table.release(pid as u32);
        status
    }

    /// Start a new process running the executable at `path`. The child is
    /// joinable and inherits the caller's priority.
    pub(crate) fn spawn_process(
        &self,
        path: &str,
        args: Option<Vec<String>>,
    ) -> Result<(u32, Arc<Thread>), FsError> {
        let executable = self.file_system.open(path)?;

        let Some(pid) = self.process_table.reserve() else {
            self.file_system.close(&executable);
            return Err(FsError::BadArgument);
        };

        let space = match crate::vm::AddressSpace::new(self, executable.clone(), pid) {
            Ok(space) => space,
            Err(e) => {
                error!("exec \"{path}\": {e}");
                self.process_table.release(pid);
                self.file_system.close(&executable);
                return Err(FsError::NotFound);
            }
        };

        let priority = current_thread().priority();
        let kernel = self.weak_self();
        let thread = self.threads.fork(path, true, priority, move || {
            let kernel = kernel.upgrade().expect("kernel gone while process alive");
            current_thread().set_space(space.clone());
            space.init_registers(&kernel.machine);
            space.restore_state(&kernel.machine);

            if let Some(args) = args {
                match kernel.write_args(&args) {
                    Some(argc) => {
                        let argv = kernel.machine.read_register(Register::SP);
                        kernel.machine.write_register(Register::A0, argc);
                        kernel.machine.write_register(Register::A1, argv);
                        // Room for the argument-passing area of the calling
                        // convention.
                        kernel.machine.write_register(Register::SP, argv - 24);
                    }
                    None => return -1,
                }
            }

            match kernel.machine.run(kernel.as_ref()) {
                ember_machine::RunOutcome::Terminated(status) => status,
                ember_machine::RunOutcome::Halted => kernel.halt(),
            }
        });
        self.process_table.install(pid, thread.clone());
        Ok((pid, thread))
    }
}

fn fs_result(result: Result<(), FsError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
