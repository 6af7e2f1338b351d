//! CPU emulation for the Opal-16.
//!
//! This module implements the complete architecture:
//! - 32768 sixteen-bit memory words (64KB, byte-addressed, word-aligned)
//! - 16 general-purpose registers with a hard-wired-zero R0
//! - PC, SP, LR and SR special registers
//! - the 16-opcode instruction set with the reserved HALT word

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use memory::{Memory, MemoryError, MEMORY_BYTES, MEMORY_WORDS};
pub use registers::Registers;
pub use decode::{Instruction, DecodeError, HALT_WORD};
pub use execute::{Cpu, CpuError, CpuState, RunResult, Snapshot};
