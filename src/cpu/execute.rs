//! Opal-16 execution engine.
//!
//! Implements the fetch-execute cycle and all instruction behaviors.
//!
//! The cycle order is fixed: read the word under PC, advance PC by 2,
//! count the cycle, test for the HALT word, then dispatch on the opcode.
//! R0 writes are discarded by the register file, so the zero-register
//! invariant holds after every step.

use crate::cpu::{Memory, Registers};
use crate::cpu::decode::{self, Instruction, DecodeError, HALT_WORD};
use crate::cpu::memory::{MemoryError, MEMORY_WORDS};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// CPU execution state.
///
/// `Halted` and `Faulted` are terminal until `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has executed the HALT word.
    Halted,
    /// CPU hit an unknown opcode or a memory fault.
    Faulted,
}

/// Immutable copy of the architectural state, minus memory.
///
/// Memory is excluded so execution histories stay bounded. Field names
/// serialize in the transport's camelCase shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub registers: [u16; 16],
    pub pc: u16,
    pub sp: u16,
    pub lr: u16,
    pub sr: u16,
    pub cycle_count: u64,
    pub halted: bool,
}

/// Outcome of a bounded `run`.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// One snapshot per executed instruction, except the halting step.
    pub history: Vec<Snapshot>,
    /// State after the run stopped.
    pub final_state: Snapshot,
    /// Total cycles executed by this CPU so far.
    pub cycle_count: u64,
    /// Whether the run ended on HALT.
    pub halted: bool,
    /// The fault that stopped the run, if any.
    pub fault: Option<CpuError>,
}

/// The Opal-16 CPU.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Cycle counter, incremented once per successful fetch.
    pub cycles: u64,
    /// When set, out-of-range LOAD/STORE is silently suppressed instead
    /// of faulting.
    lenient_memory: bool,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a new CPU in the architectural initial state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            lenient_memory: false,
            last_instr: None,
        }
    }

    /// Toggle the legacy memory behavior: suppress out-of-range LOAD/STORE
    /// instead of faulting.
    pub fn set_lenient_memory(&mut self, lenient: bool) {
        self.lenient_memory = lenient;
    }

    /// Reset to the initial state. Memory is zeroed as well.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Copy a program into memory at the given byte address.
    ///
    /// No other state changes; callers that want a clean machine should
    /// `reset` first.
    pub fn load_program(&mut self, program: &[u16], start_byte_addr: u16) -> Result<(), MemoryError> {
        self.mem.load_program(start_byte_addr, program)
    }

    /// Execute exactly one instruction.
    ///
    /// Returns the instruction that was executed, or the fault that ended
    /// execution. Faults leave the CPU in a terminal state until `reset`.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        // Fetch; PC advances before execution so branches see PC+2.
        let word = self.fetch();
        self.cycles += 1;

        // The HALT word is tested before opcode dispatch.
        if word == HALT_WORD {
            self.state = CpuState::Halted;
            self.last_instr = Some(Instruction::Halt);
            return Ok(Instruction::Halt);
        }

        let instr = match decode::decode(word) {
            Ok(i) => i,
            Err(e) => {
                self.state = CpuState::Faulted;
                return Err(CpuError::Decode(e));
            }
        };

        if let Err(e) = self.execute(instr) {
            self.state = CpuState::Faulted;
            return Err(e);
        }

        self.last_instr = Some(instr);
        Ok(instr)
    }

    /// Run for at most `max_cycles` instructions, capturing a snapshot
    /// after each step. The halting step contributes no history snapshot;
    /// it is visible through `final_state`.
    pub fn run(&mut self, max_cycles: u64) -> RunResult {
        let mut history = Vec::new();
        let mut fault = None;
        let mut steps = 0;

        while steps < max_cycles && self.state == CpuState::Running {
            match self.step() {
                Ok(_) => {
                    steps += 1;
                    if self.state == CpuState::Running {
                        history.push(self.snapshot());
                    }
                }
                Err(e) => {
                    fault = Some(e);
                    break;
                }
            }
        }

        RunResult {
            history,
            final_state: self.snapshot(),
            cycle_count: self.cycles,
            halted: self.state == CpuState::Halted,
            fault,
        }
    }

    /// Copy the scalar architectural state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            registers: self.regs.file(),
            pc: self.regs.pc,
            sp: self.regs.sp,
            lr: self.regs.lr,
            sr: self.regs.sr,
            cycle_count: self.cycles,
            halted: self.state == CpuState::Halted,
        }
    }

    /// Read the word under PC and advance PC by one instruction.
    ///
    /// A PC outside memory fetches the HALT word, which stops the machine
    /// on this step.
    fn fetch(&mut self) -> u16 {
        let index = (self.regs.pc / 2) as usize;
        let word = if index < MEMORY_WORDS {
            self.mem.read(index)
        } else {
            HALT_WORD
        };
        self.regs.advance_pc();
        word
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction) -> Result<(), CpuError> {
        match instr {
            Instruction::Nop => {}

            // ==================== Arithmetic ====================

            Instruction::Add { rd, rs, rt } => {
                let wide = self.regs.get(rs) as u32 + self.regs.get(rt) as u32;
                self.regs.set(rd, wide as u16);
                self.regs.set_flags_znc(wide);
            }

            Instruction::Addi { rd, imm } => {
                let wide = self.regs.get(rd) as u32 + imm as u32;
                self.regs.set(rd, wide as u16);
                self.regs.set_flags_znc(wide);
            }

            Instruction::Sub { rd, rs, rt } => {
                let result = self.regs.get(rs).wrapping_sub(self.regs.get(rt));
                self.regs.set(rd, result);
                self.regs.set_flags_zn(result);
            }

            // ==================== Logic and shifts ====================

            Instruction::And { rd, rs, rt } => {
                let result = self.regs.get(rs) & self.regs.get(rt);
                self.regs.set(rd, result);
                self.regs.set_flags_zn(result);
            }

            Instruction::Or { rd, rs, rt } => {
                let result = self.regs.get(rs) | self.regs.get(rt);
                self.regs.set(rd, result);
                self.regs.set_flags_zn(result);
            }

            Instruction::Xor { rd, rs, rt } => {
                let result = self.regs.get(rs) ^ self.regs.get(rt);
                self.regs.set(rd, result);
                self.regs.set_flags_zn(result);
            }

            Instruction::Not { rd, rs } => {
                let result = !self.regs.get(rs);
                self.regs.set(rd, result);
                self.regs.set_flags_zn(result);
            }

            Instruction::Shl { rd, rs, rt } => {
                let shift = self.regs.get(rt) & 0xF;
                let result = self.regs.get(rs) << shift;
                self.regs.set(rd, result);
                self.regs.set_flags_zn(result);
            }

            Instruction::Shr { rd, rs, rt } => {
                let shift = self.regs.get(rt) & 0xF;
                let result = self.regs.get(rs) >> shift;
                self.regs.set(rd, result);
                self.regs.set_flags_zn(result);
            }

            // ==================== Memory ====================

            Instruction::Load { rd, rs, offset } => {
                let addr = self.regs.get(rs) as u32 + offset as u32 * 2;
                match self.mem.read_byte_addr(addr) {
                    Ok(value) => self.regs.set(rd, value),
                    Err(_) if self.lenient_memory => {}
                    Err(e) => return Err(CpuError::Memory(e)),
                }
            }

            Instruction::Store { rd, rs, offset } => {
                let addr = self.regs.get(rs) as u32 + offset as u32 * 2;
                match self.mem.write_byte_addr(addr, self.regs.get(rd)) {
                    Ok(()) => {}
                    Err(_) if self.lenient_memory => {}
                    Err(e) => return Err(CpuError::Memory(e)),
                }
            }

            Instruction::Loadi { rd, imm } => {
                let value = imm as i8 as i16 as u16;
                self.regs.set(rd, value);
            }

            // ==================== Control flow ====================

            Instruction::Jmp { addr } => {
                self.regs.jump(addr & 0xFFF);
            }

            Instruction::Beq { rd, offset } => {
                if self.regs.get(rd) == 0 {
                    self.branch(offset);
                }
            }

            Instruction::Bne { rd, offset } => {
                if self.regs.get(rd) != 0 {
                    self.branch(offset);
                }
            }

            // Reached only through the fetch path, which handles it there.
            Instruction::Halt => {
                self.state = CpuState::Halted;
            }
        }

        Ok(())
    }

    /// Apply a PC-relative branch. The target is computed in 32-bit signed
    /// arithmetic from the post-increment PC, then narrowed to 16 bits.
    fn branch(&mut self, offset: i8) {
        let target = self.regs.pc as i32 + offset as i32 * 2;
        self.regs.jump(target as u16);
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU has halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, Error)]
pub enum CpuError {
    #[error("cpu is not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;

    fn make_program(instructions: &[Instruction]) -> Vec<u16> {
        instructions.iter().map(encode).collect()
    }

    fn loaded_cpu(program: &[u16]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_program(program, 0).unwrap();
        cpu
    }

    #[test]
    fn test_loadi_then_halt() {
        // LOADI R1, 0x2A / HALT
        let mut cpu = loaded_cpu(&[0xC12A, 0xFFFF]);
        let result = cpu.run(1000);

        assert_eq!(cpu.regs.get(1), 0x002A);
        assert_eq!(cpu.regs.pc, 0x0004);
        assert!(result.halted);
        assert_eq!(result.cycle_count, 2);
    }

    #[test]
    fn test_loadi_sign_extends() {
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 2, imm: 0xFF },
            Instruction::Halt,
        ]));
        cpu.run(1000);

        assert_eq!(cpu.regs.get(2), 0xFFFF);
    }

    #[test]
    fn test_addi_carry_wraps_to_zero() {
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Addi { rd: 3, imm: 0x01 },
            Instruction::Halt,
        ]));
        cpu.regs.set(3, 0xFFFF);
        cpu.run(1000);

        assert_eq!(cpu.regs.get(3), 0x0000);
        assert!(cpu.regs.zero());
        assert!(!cpu.regs.negative());
        assert!(cpu.regs.carry());
    }

    #[test]
    fn test_addi_zero_extends_immediate() {
        // 0xFF is +255, not -1.
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Addi { rd: 1, imm: 0xFF },
            Instruction::Halt,
        ]));
        cpu.run(1000);

        assert_eq!(cpu.regs.get(1), 0x00FF);
    }

    #[test]
    fn test_forward_branch_skips_instruction() {
        // LOADI R1, 0 / BEQ R1, +1 / LOADI R2, 1 / HALT
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 1, imm: 0 },
            Instruction::Beq { rd: 1, offset: 1 },
            Instruction::Loadi { rd: 2, imm: 1 },
            Instruction::Halt,
        ]));
        let result = cpu.run(1000);

        assert_eq!(cpu.regs.get(2), 0, "LOADI R2 must be skipped");
        assert!(result.halted);
        assert_eq!(result.cycle_count, 3);
    }

    #[test]
    fn test_backward_branch_countdown() {
        // R1 := 3; loop: R1 := R1 - R2 (R2 = 1); BNE R1, loop
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 1, imm: 3 },
            Instruction::Loadi { rd: 2, imm: 1 },
            Instruction::Sub { rd: 1, rs: 1, rt: 2 },
            Instruction::Bne { rd: 1, offset: -2 },
            Instruction::Halt,
        ]));
        let result = cpu.run(1000);

        assert_eq!(cpu.regs.get(1), 0);
        assert!(result.halted);
        assert_eq!(result.cycle_count, 9);
    }

    #[test]
    fn test_r0_is_hardwired_zero() {
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 0, imm: 0x7F },
            Instruction::Halt,
        ]));
        let result = cpu.run(1000);

        assert_eq!(cpu.regs.get(0), 0);
        assert!(result.halted);
    }

    #[test]
    fn test_r0_reads_as_zero_operand() {
        // R1 := 5 + R0 = 5
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 2, imm: 5 },
            Instruction::Add { rd: 1, rs: 2, rt: 0 },
            Instruction::Halt,
        ]));
        cpu.run(1000);

        assert_eq!(cpu.regs.get(1), 5);
    }

    #[test]
    fn test_sub_leaves_carry_untouched() {
        // ADDI sets carry, the following SUB must not clear it.
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Addi { rd: 1, imm: 1 },
            Instruction::Sub { rd: 2, rs: 1, rt: 1 },
            Instruction::Halt,
        ]));
        cpu.regs.set(1, 0xFFFF);
        cpu.run(1000);

        assert!(cpu.regs.carry());
        assert!(cpu.regs.zero());
    }

    #[test]
    fn test_logic_and_shift_flags() {
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 1, imm: 1 },
            Instruction::Loadi { rd: 2, imm: 15 },
            Instruction::Shl { rd: 3, rs: 1, rt: 2 },
            Instruction::Halt,
        ]));
        cpu.run(1000);

        assert_eq!(cpu.regs.get(3), 0x8000);
        assert!(cpu.regs.negative());
        assert!(!cpu.regs.zero());
    }

    #[test]
    fn test_load_store_roundtrip_through_memory() {
        // R1 := 0x2A; MEM[0x40 + 2] := R1; R2 := MEM[0x40 + 2]
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 1, imm: 0x2A },
            Instruction::Loadi { rd: 3, imm: 0x40 },
            Instruction::Store { rd: 1, rs: 3, offset: 1 },
            Instruction::Load { rd: 2, rs: 3, offset: 1 },
            Instruction::Halt,
        ]));
        cpu.run(1000);

        assert_eq!(cpu.regs.get(2), 0x2A);
        assert_eq!(cpu.mem.read_byte_addr(0x42).unwrap(), 0x2A);
    }

    #[test]
    fn test_load_does_not_touch_flags() {
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Addi { rd: 1, imm: 1 },
            Instruction::Load { rd: 2, rs: 3, offset: 0 },
            Instruction::Halt,
        ]));
        cpu.regs.set(1, 0xFFFF);
        cpu.run(1000);

        // Flags still reflect the ADDI.
        assert!(cpu.regs.zero());
        assert!(cpu.regs.carry());
    }

    #[test]
    fn test_jmp_overwrites_pc() {
        // JMP 0x006 lands on the HALT, skipping the LOADI pair.
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Jmp { addr: 0x006 },
            Instruction::Loadi { rd: 1, imm: 1 },
            Instruction::Loadi { rd: 2, imm: 2 },
            Instruction::Halt,
        ]));
        let result = cpu.run(1000);

        assert_eq!(cpu.regs.get(1), 0);
        assert_eq!(cpu.regs.get(2), 0);
        assert!(result.halted);
        assert_eq!(result.cycle_count, 2);
    }

    #[test]
    fn test_step_on_halted_cpu_fails() {
        let mut cpu = loaded_cpu(&[0xFFFF]);
        cpu.step().unwrap();
        assert!(cpu.is_halted());

        let err = cpu.step().unwrap_err();
        assert!(matches!(err, CpuError::NotRunning(CpuState::Halted)));
    }

    #[test]
    fn test_halt_preserves_other_state() {
        let mut cpu = loaded_cpu(&[0xC105, 0xFFFF]);
        cpu.step().unwrap();
        let before = cpu.snapshot();

        cpu.step().unwrap();
        let after = cpu.snapshot();

        assert!(after.halted);
        assert_eq!(after.registers, before.registers);
        assert_eq!(after.sr, before.sr);
        assert_eq!(after.pc, before.pc + 2);
        assert_eq!(after.cycle_count, before.cycle_count + 1);
    }

    #[test]
    fn test_cycle_counter_increments_once_per_step() {
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Nop,
            Instruction::Nop,
            Instruction::Halt,
        ]));

        for expected in 1..=3 {
            cpu.step().unwrap();
            assert_eq!(cpu.cycles, expected);
        }
    }

    #[test]
    fn test_run_history_excludes_halting_step() {
        let mut cpu = loaded_cpu(&[0xC12A, 0xFFFF]);
        let result = cpu.run(1000);

        assert_eq!(result.history.len(), 1);
        assert_eq!(result.history[0].cycle_count, 1);
        assert!(!result.history[0].halted);
        assert!(result.final_state.halted);
        assert_eq!(result.final_state.cycle_count, 2);
    }

    #[test]
    fn test_run_respects_cycle_budget() {
        // JMP 0 spins forever.
        let mut cpu = loaded_cpu(&make_program(&[Instruction::Jmp { addr: 0 }]));
        let result = cpu.run(10);

        assert_eq!(result.cycle_count, 10);
        assert_eq!(result.history.len(), 10);
        assert!(!result.halted);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_strict_memory_faults_on_out_of_range_load() {
        // RF near the top of the address space pushes the effective
        // address past 0xFFFF.
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 0xF, imm: 0xFF },
            Instruction::Load { rd: 1, rs: 0xF, offset: 1 },
            Instruction::Halt,
        ]));
        let result = cpu.run(1000);

        assert!(matches!(result.fault, Some(CpuError::Memory(_))));
        assert_eq!(cpu.state, CpuState::Faulted);
        assert!(!result.halted);

        let err = cpu.step().unwrap_err();
        assert!(matches!(err, CpuError::NotRunning(CpuState::Faulted)));
    }

    #[test]
    fn test_lenient_memory_suppresses_out_of_range_access() {
        let mut cpu = loaded_cpu(&make_program(&[
            Instruction::Loadi { rd: 0xF, imm: 0xFF },
            Instruction::Loadi { rd: 1, imm: 7 },
            Instruction::Load { rd: 1, rs: 0xF, offset: 1 },
            Instruction::Store { rd: 1, rs: 0xF, offset: 1 },
            Instruction::Halt,
        ]));
        cpu.set_lenient_memory(true);
        let result = cpu.run(1000);

        assert!(result.fault.is_none());
        assert!(result.halted);
        // The suppressed load left R1 alone.
        assert_eq!(cpu.regs.get(1), 7);
    }

    #[test]
    fn test_reset_zeroes_memory_and_state() {
        let mut cpu = loaded_cpu(&[0xC12A, 0xFFFF]);
        cpu.run(1000);
        cpu.reset();

        assert!(cpu.is_running());
        assert_eq!(cpu.cycles, 0);
        assert_eq!(cpu.regs.pc, 0);
        assert_eq!(cpu.regs.sp, 0xFFFE);
        assert_eq!(cpu.mem.read(0), 0);
        assert_eq!(cpu.regs.get(1), 0);
    }

    #[test]
    fn test_load_program_preserves_other_state() {
        let mut cpu = Cpu::new();
        cpu.regs.set(5, 0x1234);
        cpu.cycles = 7;

        cpu.load_program(&[0xFFFF], 0x100).unwrap();

        assert_eq!(cpu.regs.get(5), 0x1234);
        assert_eq!(cpu.cycles, 7);
    }
}
