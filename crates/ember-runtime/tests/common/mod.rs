//! Shared fixtures for the end-to-end tests: scratch disk images, a
//! capturable console sink, and a few hand-assembled user programs.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ember_kernel::syscall::{SC_CREATE, SC_EXIT, SC_OPEN, SC_WRITE};
use ember_machine::{Instruction, Register};
use ember_runtime::{ImageBuilder, Runtime, RuntimeOptions};
use spin::Mutex;

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub struct ScratchDisk {
    pub path: PathBuf,
}

impl ScratchDisk {
    pub fn new(tag: &str) -> Self {
        let serial = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("ember-e2e-{}-{serial}-{tag}.img", std::process::id()));
        Self { path }
    }
}

impl Drop for ScratchDisk {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Console sink whose captured output the test can inspect.
#[derive(Clone, Default)]
pub struct SharedSink(pub Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct Fixture {
    pub runtime: Runtime,
    pub console: SharedSink,
    _disk: ScratchDisk,
}

pub fn boot(tag: &str, configure: impl FnOnce(&mut ember_kernel::KernelConfig)) -> Fixture {
    let disk = ScratchDisk::new(tag);
    let console = SharedSink::default();
    let mut options = RuntimeOptions::new(&disk.path);
    options.format = true;
    options.console_source = Box::new(std::io::empty());
    options.console_sink = Box::new(console.clone());
    configure(&mut options.config);
    let runtime = Runtime::new(options).expect("runtime bootstrap failed");
    Fixture {
        runtime,
        console,
        _disk: disk,
    }
}

fn load_immediate(rt: Register, value: i16) -> Instruction {
    Instruction::Addiu {
        rt,
        rs: Register::ZERO,
        imm: value,
    }
}

fn syscall_id(id: u32) -> Instruction {
    load_immediate(Register::V0, id as i16)
}

/// `Exit(status)` after doing nothing else.
pub fn exit_program(status: i16) -> Vec<u8> {
    ImageBuilder::new()
        .push(load_immediate(Register::A0, status))
        .push(syscall_id(SC_EXIT))
        .push(Instruction::Syscall)
        .build()
}

/// `Exit(argc)`: the exec path puts argc into A0 before the first
/// instruction runs.
pub fn exit_with_argc_program() -> Vec<u8> {
    ImageBuilder::new()
        .push(syscall_id(SC_EXIT))
        .push(Instruction::Syscall)
        .build()
}

/// Code spanning two pages: a jump from the first page to an exit sequence
/// on the second. Demand loading must fault each page in separately.
pub fn two_page_program(status: i16) -> Vec<u8> {
    let mut builder = ImageBuilder::new().push(Instruction::J { target: 32 });
    for _ in 1..32 {
        builder = builder.push(Instruction::Sll {
            rd: Register::ZERO,
            rt: Register::ZERO,
            shamt: 0,
        });
    }
    builder
        .push(load_immediate(Register::A0, status)) // word 32, byte 0x80
        .push(syscall_id(SC_EXIT))
        .push(Instruction::Syscall)
        .build()
}

/// Store a distinct value into each of several pages, read them all back,
/// and exit with the sum. Touches far more pages than a small machine has
/// frames, forcing eviction and swap reload.
pub fn page_stress_program(pages: &[u32]) -> Vec<u8> {
    let mut builder = ImageBuilder::new();
    for (i, &page) in pages.iter().enumerate() {
        builder = builder
            .push(load_immediate(Register::T0, (i + 1) as i16))
            .push(Instruction::Sw {
                rt: Register::T0,
                base: Register::ZERO,
                offset: (page * 128) as i16,
            });
    }
    builder = builder.push(load_immediate(Register::A0, 0));
    for &page in pages {
        builder = builder
            .push(Instruction::Lw {
                rt: Register::T1,
                base: Register::ZERO,
                offset: (page * 128) as i16,
            })
            .push(Instruction::Addu {
                rd: Register::A0,
                rs: Register::A0,
                rt: Register::T1,
            });
    }
    builder.push(syscall_id(SC_EXIT)).push(Instruction::Syscall).build()
}

/// Create a file named by the data segment, write a payload into it
/// through the syscall surface, close it, and exit with the write's result.
pub fn file_writer_program(name: &str, payload: &[u8]) -> Vec<u8> {
    // Data layout: name bytes + NUL, then the payload.
    let mut data = name.as_bytes().to_vec();
    data.push(0);
    let payload_offset = data.len() as u32;
    data.extend_from_slice(payload);

    // Segment addresses are known once the code length is fixed: 15
    // instructions below.
    let code_len = 15 * 4;
    let name_addr = code_len as i16;
    let payload_addr = (code_len + payload_offset as usize) as i16;

    ImageBuilder::new()
        // Create(name)
        .push(load_immediate(Register::A0, name_addr))
        .push(syscall_id(SC_CREATE))
        .push(Instruction::Syscall)
        // fd = Open(name)
        .push(load_immediate(Register::A0, name_addr))
        .push(syscall_id(SC_OPEN))
        .push(Instruction::Syscall)
        .push(Instruction::Addu {
            rd: Register::S0,
            rs: Register::V0,
            rt: Register::ZERO,
        })
        // Write(payload, len, fd)
        .push(load_immediate(Register::A0, payload_addr))
        .push(load_immediate(Register::A1, payload.len() as i16))
        .push(Instruction::Addu {
            rd: Register::A2,
            rs: Register::S0,
            rt: Register::ZERO,
        })
        .push(syscall_id(SC_WRITE))
        .push(Instruction::Syscall)
        // Exit(bytes written). The open descriptor is reclaimed by thread
        // teardown.
        .push(Instruction::Addu {
            rd: Register::A0,
            rs: Register::V0,
            rt: Register::ZERO,
        })
        .push(syscall_id(SC_EXIT))
        .push(Instruction::Syscall)
        .data(&data, None)
        .build()
}

/// Write a data-segment string to the console, then exit 0.
pub fn console_writer_program(message: &str) -> Vec<u8> {
    let code_len = 8 * 4;
    ImageBuilder::new()
        .push(load_immediate(Register::A0, code_len as i16))
        .push(load_immediate(Register::A1, message.len() as i16))
        .push(load_immediate(Register::A2, 1))
        .push(syscall_id(SC_WRITE))
        .push(Instruction::Syscall)
        .push(load_immediate(Register::A0, 0))
        .push(syscall_id(SC_EXIT))
        .push(Instruction::Syscall)
        .data(message.as_bytes(), None)
        .build()
}

pub fn install_program(fixture: &Fixture, path: &str, image: &[u8]) {
    fixture
        .runtime
        .write_file(path, image)
        .expect("installing test program");
}
