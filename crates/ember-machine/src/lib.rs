//! Simulated hardware for the ember kernel.
//!
//! One `Machine` executes user programs on a MIPS-like core: fetch through
//! the MMU, decode, execute, one virtual tick per instruction. Traps are
//! delivered to the kernel through the [`TrapHandler`] seam; the kernel's
//! verdict either resumes the loop, terminates the running process, or halts
//! the machine.
//!
//! The machine is shared by every kernel thread, but the thread system
//! guarantees at most one runs at any instant; the interior lock only covers
//! the brief hand-off window between host threads.

pub mod console;
pub mod cpu;
pub mod disk;
pub mod error;
pub mod instruction;
pub mod interrupt;
pub mod mmu;
pub mod stats;
pub mod timer;
pub mod trap;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::trace;
use spin::Mutex;

pub use cpu::{Register, RegisterFile, NUM_TOTAL_REGS};
pub use error::{DecodeError, DeviceError};
pub use instruction::Instruction;
pub use interrupt::{IntLevel, Interrupt, InterruptGuard};
pub use mmu::{PageTableHandle, TranslationEntry, PAGE_SIZE, TLB_SIZE};
pub use stats::Statistics;
pub use trap::{Control, Exception, RunOutcome, TrapHandler};

use mmu::Mmu;

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub num_phys_pages: usize,
    pub use_tlb: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            num_phys_pages: 32,
            use_tlb: false,
        }
    }
}

struct MachineInner {
    regs: RegisterFile,
    mmu: Mmu,
    memory: Vec<u8>,
}

pub struct Machine {
    config: MachineConfig,
    inner: Mutex<MachineInner>,
    interrupt: Arc<Interrupt>,
    stats: Arc<Statistics>,
}

impl Machine {
    pub fn new(config: MachineConfig, interrupt: Arc<Interrupt>, stats: Arc<Statistics>) -> Arc<Self> {
        let memory = vec![0u8; config.num_phys_pages * PAGE_SIZE];
        let mmu = Mmu::new(config.use_tlb, config.num_phys_pages);
        Arc::new(Self {
            config,
            inner: Mutex::new(MachineInner {
                regs: RegisterFile::new(),
                mmu,
                memory,
            }),
            interrupt,
            stats,
        })
    }

    pub fn num_phys_pages(&self) -> usize {
        self.config.num_phys_pages
    }

    pub fn uses_tlb(&self) -> bool {
        self.config.use_tlb
    }

    // --- register file ---

    pub fn read_register(&self, r: Register) -> u32 {
        self.inner.lock().regs.read(r)
    }

    pub fn write_register(&self, r: Register, value: u32) {
        self.inner.lock().regs.write(r, value);
    }

    pub fn save_registers(&self) -> [u32; NUM_TOTAL_REGS] {
        self.inner.lock().regs.snapshot()
    }

    pub fn restore_registers(&self, saved: &[u32; NUM_TOTAL_REGS]) {
        self.inner.lock().regs.restore(saved);
    }

    // --- translation state ---

    pub fn set_page_table(&self, table: PageTableHandle) {
        self.inner.lock().mmu.set_page_table(table);
    }

    pub fn tlb_snapshot(&self) -> Option<[TranslationEntry; TLB_SIZE]> {
        self.inner.lock().mmu.tlb().copied()
    }

    pub fn tlb_set(&self, index: usize, entry: TranslationEntry) {
        if let Some(tlb) = self.inner.lock().mmu.tlb_mut() {
            tlb[index] = entry;
        }
    }

    pub fn tlb_invalidate_all(&self) {
        if let Some(tlb) = self.inner.lock().mmu.tlb_mut() {
            for entry in tlb.iter_mut() {
                entry.valid = false;
            }
        }
    }

    // --- translated memory access ---

    pub fn read_mem(&self, vaddr: u32, size: usize) -> Result<u32, Exception> {
        self.inner.lock().read_mem(vaddr, size)
    }

    pub fn write_mem(&self, vaddr: u32, size: usize, value: u32) -> Result<(), Exception> {
        self.inner.lock().write_mem(vaddr, size, value)
    }

    // --- physical memory access (kernel paging paths) ---

    pub fn zero_frame(&self, frame: u32) {
        let mut inner = self.inner.lock();
        let start = frame as usize * PAGE_SIZE;
        inner.memory[start..start + PAGE_SIZE].fill(0);
    }

    pub fn write_phys(&self, offset: usize, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.memory[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read_phys(&self, offset: usize, out: &mut [u8]) {
        let inner = self.inner.lock();
        out.copy_from_slice(&inner.memory[offset..offset + out.len()]);
    }

    // --- execution ---

    /// Run user instructions until the handler terminates the process or
    /// halts the machine. The caller must have initialized PC/NEXT_PC and
    /// installed translation state.
    pub fn run(&self, handler: &dyn TrapHandler) -> RunOutcome {
        loop {
            let step = self.step();
            match step {
                Ok(()) => {
                    self.stats.num_instructions.fetch_add(1, Ordering::Relaxed);
                    self.interrupt.tick();
                }
                Err(exception) => {
                    if let Some(outcome) = self.deliver(handler, exception) {
                        return outcome;
                    }
                }
            }
        }
    }

    fn deliver(&self, handler: &dyn TrapHandler, exception: Exception) -> Option<RunOutcome> {
        if let Exception::PageFault { bad_vaddr }
        | Exception::ReadOnlyFault { bad_vaddr }
        | Exception::AddressError { bad_vaddr }
        | Exception::BusError { bad_vaddr }
        | Exception::MisalignedAccess { bad_vaddr } = exception
        {
            self.write_register(Register::BAD_VADDR, bad_vaddr);
        }
        trace!("trap: {exception:?}");
        match handler.handle_trap(exception) {
            Control::Resume => None,
            Control::Terminate(status) => Some(RunOutcome::Terminated(status)),
            Control::Halt => Some(RunOutcome::Halted),
        }
    }

    /// Fetch, decode and execute one instruction. On `Err` no architectural
    /// state has been advanced, so a resumed trap re-executes the same
    /// instruction.
    fn step(&self) -> Result<(), Exception> {
        let mut inner = self.inner.lock();
        let pc = inner.regs.read(Register::PC);
        let word = inner.read_mem(pc, 4)?;
        let instruction =
            Instruction::decode(word).map_err(|_| Exception::IllegalInstruction { word })?;

        inner.regs.write(Register::NEXT_PC, pc.wrapping_add(4));
        inner.execute(pc, instruction)?;

        let next = inner.regs.read(Register::NEXT_PC);
        inner.regs.write(Register::PREV_PC, pc);
        inner.regs.write(Register::PC, next);
        inner.regs.write(Register::NEXT_PC, next.wrapping_add(4));
        Ok(())
    }
}

impl MachineInner {
    fn read_mem(&mut self, vaddr: u32, size: usize) -> Result<u32, Exception> {
        let phys = self.mmu.translate(vaddr, size, false)?;
        let value = match size {
            1 => u32::from(self.memory[phys]),
            2 => u32::from(u16::from_le_bytes([self.memory[phys], self.memory[phys + 1]])),
            4 => u32::from_le_bytes([
                self.memory[phys],
                self.memory[phys + 1],
                self.memory[phys + 2],
                self.memory[phys + 3],
            ]),
            _ => unreachable!("unsupported access width"),
        };
        Ok(value)
    }

    fn write_mem(&mut self, vaddr: u32, size: usize, value: u32) -> Result<(), Exception> {
        let phys = self.mmu.translate(vaddr, size, true)?;
        match size {
            1 => self.memory[phys] = value as u8,
            2 => self.memory[phys..phys + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            4 => self.memory[phys..phys + 4].copy_from_slice(&value.to_le_bytes()),
            _ => unreachable!("unsupported access width"),
        }
        Ok(())
    }

    fn execute(&mut self, pc: u32, instruction: Instruction) -> Result<(), Exception> {
        use Instruction::*;

        let regs = |inner: &Self, r: Register| inner.regs.read(r);

        match instruction {
            Addu { rd, rs, rt } => {
                let v = regs(self, rs).wrapping_add(regs(self, rt));
                self.regs.write(rd, v);
            }
            Subu { rd, rs, rt } => {
                let v = regs(self, rs).wrapping_sub(regs(self, rt));
                self.regs.write(rd, v);
            }
            And { rd, rs, rt } => {
                let v = regs(self, rs) & regs(self, rt);
                self.regs.write(rd, v);
            }
            Or { rd, rs, rt } => {
                let v = regs(self, rs) | regs(self, rt);
                self.regs.write(rd, v);
            }
            Xor { rd, rs, rt } => {
                let v = regs(self, rs) ^ regs(self, rt);
                self.regs.write(rd, v);
            }
            Nor { rd, rs, rt } => {
                let v = !(regs(self, rs) | regs(self, rt));
                self.regs.write(rd, v);
            }
            Slt { rd, rs, rt } => {
                let v = ((regs(self, rs) as i32) < (regs(self, rt) as i32)) as u32;
                self.regs.write(rd, v);
            }
            Sltu { rd, rs, rt } => {
                let v = (regs(self, rs) < regs(self, rt)) as u32;
                self.regs.write(rd, v);
            }
            Sll { rd, rt, shamt } => {
                let v = regs(self, rt) << shamt;
                self.regs.write(rd, v);
            }
            Srl { rd, rt, shamt } => {
                let v = regs(self, rt) >> shamt;
                self.regs.write(rd, v);
            }
            Sra { rd, rt, shamt } => {
                let v = ((regs(self, rt) as i32) >> shamt) as u32;
                self.regs.write(rd, v);
            }
            Addi { rt, rs, imm } => {
                let (v, overflow) = (regs(self, rs) as i32).overflowing_add(i32::from(imm));
                if overflow {
                    return Err(Exception::Overflow);
                }
                self.regs.write(rt, v as u32);
            }
            Addiu { rt, rs, imm } => {
                let v = regs(self, rs).wrapping_add(imm as i32 as u32);
                self.regs.write(rt, v);
            }
            Slti { rt, rs, imm } => {
                let v = ((regs(self, rs) as i32) < i32::from(imm)) as u32;
                self.regs.write(rt, v);
            }
            Sltiu { rt, rs, imm } => {
                let v = (regs(self, rs) < (imm as i32 as u32)) as u32;
                self.regs.write(rt, v);
            }
            Andi { rt, rs, imm } => {
                let v = regs(self, rs) & u32::from(imm);
                self.regs.write(rt, v);
            }
            Ori { rt, rs, imm } => {
                let v = regs(self, rs) | u32::from(imm);
                self.regs.write(rt, v);
            }
            Xori { rt, rs, imm } => {
                let v = regs(self, rs) ^ u32::from(imm);
                self.regs.write(rt, v);
            }
            Lui { rt, imm } => {
                self.regs.write(rt, u32::from(imm) << 16);
            }
            Lb { rt, base, offset } => {
                let addr = regs(self, base).wrapping_add(offset as i32 as u32);
                let v = self.read_mem(addr, 1)? as u8 as i8;
                self.regs.write(rt, v as i32 as u32);
            }
            Lbu { rt, base, offset } => {
                let addr = regs(self, base).wrapping_add(offset as i32 as u32);
                let v = self.read_mem(addr, 1)?;
                self.regs.write(rt, v);
            }
            Lh { rt, base, offset } => {
                let addr = regs(self, base).wrapping_add(offset as i32 as u32);
                let v = self.read_mem(addr, 2)? as u16 as i16;
                self.regs.write(rt, v as i32 as u32);
            }
            Lhu { rt, base, offset } => {
                let addr = regs(self, base).wrapping_add(offset as i32 as u32);
                let v = self.read_mem(addr, 2)?;
                self.regs.write(rt, v);
            }
            Lw { rt, base, offset } => {
                let addr = regs(self, base).wrapping_add(offset as i32 as u32);
                let v = self.read_mem(addr, 4)?;
                self.regs.write(rt, v);
            }
            Sb { rt, base, offset } => {
                let addr = regs(self, base).wrapping_add(offset as i32 as u32);
                self.write_mem(addr, 1, regs(self, rt))?;
            }
            Sh { rt, base, offset } => {
                let addr = regs(self, base).wrapping_add(offset as i32 as u32);
                self.write_mem(addr, 2, regs(self, rt))?;
            }
            Sw { rt, base, offset } => {
                let addr = regs(self, base).wrapping_add(offset as i32 as u32);
                self.write_mem(addr, 4, regs(self, rt))?;
            }
            Beq { rs, rt, offset } => {
                if regs(self, rs) == regs(self, rt) {
                    let target = pc.wrapping_add(4).wrapping_add((offset as i32 as u32) << 2);
                    self.regs.write(Register::NEXT_PC, target);
                }
            }
            Bne { rs, rt, offset } => {
                if regs(self, rs) != regs(self, rt) {
                    let target = pc.wrapping_add(4).wrapping_add((offset as i32 as u32) << 2);
                    self.regs.write(Register::NEXT_PC, target);
                }
            }
            J { target } => {
                let dest = (pc & 0xf000_0000) | (target << 2);
                self.regs.write(Register::NEXT_PC, dest);
            }
            Jal { target } => {
                let dest = (pc & 0xf000_0000) | (target << 2);
                self.regs.write(Register::RA, pc.wrapping_add(4));
                self.regs.write(Register::NEXT_PC, dest);
            }
            Jr { rs } => {
                let dest = regs(self, rs);
                self.regs.write(Register::NEXT_PC, dest);
            }
            Jalr { rd, rs } => {
                let dest = regs(self, rs);
                self.regs.write(rd, pc.wrapping_add(4));
                self.regs.write(Register::NEXT_PC, dest);
            }
            Syscall => return Err(Exception::Syscall),
            Break => return Err(Exception::Breakpoint),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with_program(words: &[u32]) -> (Arc<Machine>, PageTableHandle) {
        let stats = Arc::new(Statistics::new());
        let interrupt = Arc::new(Interrupt::new(stats.clone()));
        interrupt.set_level(IntLevel::On);
        let machine = Machine::new(
            MachineConfig {
                num_phys_pages: 8,
                use_tlb: false,
            },
            interrupt,
            stats,
        );

        // Identity-map enough pages and drop the program at address 0.
        let entries = (0..8)
            .map(|i| TranslationEntry {
                virtual_page: i,
                physical_page: i,
                valid: true,
                ..Default::default()
            })
            .collect::<Vec<_>>();
        let table: PageTableHandle = Arc::new(Mutex::new(entries));
        machine.set_page_table(table.clone());
        for (i, word) in words.iter().enumerate() {
            machine.write_phys(i * 4, &word.to_le_bytes());
        }
        machine.write_register(Register::PC, 0);
        machine.write_register(Register::NEXT_PC, 4);
        (machine, table)
    }

    struct ExitOnSyscall;

    impl TrapHandler for ExitOnSyscall {
        fn handle_trap(&self, exception: Exception) -> Control {
            match exception {
                Exception::Syscall => Control::Terminate(0),
                other => panic!("unexpected trap {other:?}"),
            }
        }
    }

    #[test]
    fn straight_line_arithmetic_executes() {
        use instruction::Instruction::*;
        let program = [
            Addiu {
                rt: Register::A0,
                rs: Register::ZERO,
                imm: 5,
            }
            .encode(),
            Addiu {
                rt: Register::A1,
                rs: Register::ZERO,
                imm: 7,
            }
            .encode(),
            Addu {
                rd: Register::V1,
                rs: Register::A0,
                rt: Register::A1,
            }
            .encode(),
            Syscall.encode(),
        ];
        let (machine, _table) = machine_with_program(&program);
        assert_eq!(machine.run(&ExitOnSyscall), RunOutcome::Terminated(0));
        assert_eq!(machine.read_register(Register::V1), 12);
    }

    #[test]
    fn branches_and_memory_work_together() {
        use instruction::Instruction::*;
        // Store 99 at address 0x100, load it back, then branch over an
        // instruction that would clobber the result.
        let program = [
            Addiu {
                rt: Register::A0,
                rs: Register::ZERO,
                imm: 99,
            }
            .encode(),
            Sw {
                rt: Register::A0,
                base: Register::ZERO,
                offset: 0x100,
            }
            .encode(),
            Lw {
                rt: Register::A1,
                base: Register::ZERO,
                offset: 0x100,
            }
            .encode(),
            Beq {
                rs: Register::A0,
                rt: Register::A1,
                offset: 1,
            }
            .encode(),
            Addiu {
                rt: Register::A1,
                rs: Register::ZERO,
                imm: 0,
            }
            .encode(),
            Syscall.encode(),
        ];
        let (machine, _table) = machine_with_program(&program);
        assert_eq!(machine.run(&ExitOnSyscall), RunOutcome::Terminated(0));
        assert_eq!(machine.read_register(Register::A1), 99);
    }

    #[test]
    fn fault_retry_reexecutes_the_same_instruction() {
        use instruction::Instruction::*;
        struct FixUp {
            table: PageTableHandle,
            fixed: std::sync::atomic::AtomicBool,
        }
        impl TrapHandler for FixUp {
            fn handle_trap(&self, exception: Exception) -> Control {
                match exception {
                    Exception::PageFault { bad_vaddr } => {
                        let vpn = bad_vaddr as usize / PAGE_SIZE;
                        let mut table = self.table.lock();
                        table[vpn].valid = true;
                        table[vpn].physical_page = vpn as u32;
                        self.fixed.store(true, std::sync::atomic::Ordering::Relaxed);
                        Control::Resume
                    }
                    Exception::Syscall => Control::Terminate(0),
                    other => panic!("unexpected trap {other:?}"),
                }
            }
        }

        let program = [
            Lw {
                rt: Register::A0,
                base: Register::ZERO,
                offset: 0x200,
            }
            .encode(),
            Syscall.encode(),
        ];
        let (machine, table) = machine_with_program(&program);
        machine.write_phys(0x200, &123u32.to_le_bytes());
        table.lock()[4].valid = false; // 0x200 lives in page 4
        let handler = FixUp {
            table: table.clone(),
            fixed: std::sync::atomic::AtomicBool::new(false),
        };
        assert_eq!(machine.run(&handler), RunOutcome::Terminated(0));
        assert!(handler.fixed.load(std::sync::atomic::Ordering::Relaxed));
        assert_eq!(machine.read_register(Register::A0), 123);
    }
}
