//! Instruction codec for the Opal-16.
//!
//! Every instruction is a single 16-bit code word. The top nibble selects
//! the opcode; the remaining bits are partitioned into fields depending on
//! the instruction:
//!
//! - `rd` bits 11-8, `rs` bits 7-4, `rt` bits 3-0 (register forms)
//! - `imm8` bits 7-0 (immediate and branch forms)
//! - `offset4` bits 3-0 (memory forms)
//! - `addr12` bits 11-0 (JMP)
//!
//! The whole word `0xFFFF` is reserved for HALT and must be recognized
//! before the opcode dispatch, since it shares the top nibble with BNE.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// The reserved HALT encoding.
pub const HALT_WORD: u16 = 0xFFFF;

/// Decoded Opal-16 instruction.
///
/// Register fields select R0..RF. Unused fields of an encoding are zero,
/// which is what makes `decode(encode(i)) == i` hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// No operation.
    Nop,

    // ==================== Arithmetic ====================

    /// rd := rs + rt, flags Z/N/C
    Add { rd: u8, rs: u8, rt: u8 },

    /// rd := rd + zero-extend(imm), flags Z/N/C
    Addi { rd: u8, imm: u8 },

    /// rd := rs - rt, flags Z/N (carry untouched)
    Sub { rd: u8, rs: u8, rt: u8 },

    // ==================== Logic and shifts ====================

    /// rd := rs & rt, flags Z/N
    And { rd: u8, rs: u8, rt: u8 },

    /// rd := rs | rt, flags Z/N
    Or { rd: u8, rs: u8, rt: u8 },

    /// rd := rs ^ rt, flags Z/N
    Xor { rd: u8, rs: u8, rt: u8 },

    /// rd := !rs, flags Z/N
    Not { rd: u8, rs: u8 },

    /// rd := rs << (rt & 0xF), flags Z/N
    Shl { rd: u8, rs: u8, rt: u8 },

    /// rd := rs >> (rt & 0xF) (logical), flags Z/N
    Shr { rd: u8, rs: u8, rt: u8 },

    // ==================== Memory ====================

    /// rd := MEM[rs + offset*2]
    Load { rd: u8, rs: u8, offset: u8 },

    /// MEM[rs + offset*2] := rd
    Store { rd: u8, rs: u8, offset: u8 },

    /// rd := sign-extend(imm)
    Loadi { rd: u8, imm: u8 },

    // ==================== Control flow ====================

    /// PC := addr (low 12 bits of a byte address)
    Jmp { addr: u16 },

    /// if rd == 0 then PC := PC + offset*2
    Beq { rd: u8, offset: i8 },

    /// if rd != 0 then PC := PC + offset*2
    Bne { rd: u8, offset: i8 },

    /// Stop execution. Encoded as the full word 0xFFFF.
    Halt,
}

/// Opcode nibble values.
struct Opcode;

impl Opcode {
    const NOP: u16 = 0x0;
    const ADD: u16 = 0x1;
    const ADDI: u16 = 0x2;
    const SUB: u16 = 0x3;
    const AND: u16 = 0x4;
    const OR: u16 = 0x5;
    const XOR: u16 = 0x6;
    const NOT: u16 = 0x7;
    const SHL: u16 = 0x8;
    const SHR: u16 = 0x9;
    const LOAD: u16 = 0xA;
    const STORE: u16 = 0xB;
    const LOADI: u16 = 0xC;
    const JMP: u16 = 0xD;
    const BEQ: u16 = 0xE;
    const BNE: u16 = 0xF;
}

/// Decode a 16-bit code word.
///
/// The HALT word is tested before the opcode nibble: a BNE whose remaining
/// bits are all ones is indistinguishable from HALT by construction.
pub fn decode(word: u16) -> Result<Instruction, DecodeError> {
    if word == HALT_WORD {
        return Ok(Instruction::Halt);
    }

    let op = (word >> 12) & 0xF;
    let rd = ((word >> 8) & 0xF) as u8;
    let rs = ((word >> 4) & 0xF) as u8;
    let rt = (word & 0xF) as u8;
    let imm = (word & 0xFF) as u8;
    let offset = (word & 0xF) as u8;
    let addr = word & 0xFFF;

    let instruction = match op {
        Opcode::NOP => Instruction::Nop,
        Opcode::ADD => Instruction::Add { rd, rs, rt },
        Opcode::ADDI => Instruction::Addi { rd, imm },
        Opcode::SUB => Instruction::Sub { rd, rs, rt },
        Opcode::AND => Instruction::And { rd, rs, rt },
        Opcode::OR => Instruction::Or { rd, rs, rt },
        Opcode::XOR => Instruction::Xor { rd, rs, rt },
        Opcode::NOT => Instruction::Not { rd, rs },
        Opcode::SHL => Instruction::Shl { rd, rs, rt },
        Opcode::SHR => Instruction::Shr { rd, rs, rt },
        Opcode::LOAD => Instruction::Load { rd, rs, offset },
        Opcode::STORE => Instruction::Store { rd, rs, offset },
        Opcode::LOADI => Instruction::Loadi { rd, imm },
        Opcode::JMP => Instruction::Jmp { addr },
        Opcode::BEQ => Instruction::Beq { rd, offset: imm as i8 },
        Opcode::BNE => Instruction::Bne { rd, offset: imm as i8 },
        // All sixteen nibbles are assigned; reserved for future extensions.
        _ => return Err(DecodeError::UnknownOpcode(op as u8)),
    };

    Ok(instruction)
}

/// Encode an instruction back to a code word. Unused fields are zero.
pub fn encode(instr: &Instruction) -> u16 {
    fn reg3(op: u16, rd: u8, rs: u8, rt: u8) -> u16 {
        (op << 12)
            | ((rd as u16 & 0xF) << 8)
            | ((rs as u16 & 0xF) << 4)
            | (rt as u16 & 0xF)
    }

    fn imm8(op: u16, rd: u8, imm: u8) -> u16 {
        (op << 12) | ((rd as u16 & 0xF) << 8) | imm as u16
    }

    match *instr {
        Instruction::Nop => 0x0000,
        Instruction::Add { rd, rs, rt } => reg3(Opcode::ADD, rd, rs, rt),
        Instruction::Addi { rd, imm } => imm8(Opcode::ADDI, rd, imm),
        Instruction::Sub { rd, rs, rt } => reg3(Opcode::SUB, rd, rs, rt),
        Instruction::And { rd, rs, rt } => reg3(Opcode::AND, rd, rs, rt),
        Instruction::Or { rd, rs, rt } => reg3(Opcode::OR, rd, rs, rt),
        Instruction::Xor { rd, rs, rt } => reg3(Opcode::XOR, rd, rs, rt),
        Instruction::Not { rd, rs } => reg3(Opcode::NOT, rd, rs, 0),
        Instruction::Shl { rd, rs, rt } => reg3(Opcode::SHL, rd, rs, rt),
        Instruction::Shr { rd, rs, rt } => reg3(Opcode::SHR, rd, rs, rt),
        Instruction::Load { rd, rs, offset } => reg3(Opcode::LOAD, rd, rs, offset),
        Instruction::Store { rd, rs, offset } => reg3(Opcode::STORE, rd, rs, offset),
        Instruction::Loadi { rd, imm } => imm8(Opcode::LOADI, rd, imm),
        Instruction::Jmp { addr } => (Opcode::JMP << 12) | (addr & 0xFFF),
        Instruction::Beq { rd, offset } => imm8(Opcode::BEQ, rd, offset as u8),
        Instruction::Bne { rd, offset } => imm8(Opcode::BNE, rd, offset as u8),
        Instruction::Halt => HALT_WORD,
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("unknown opcode: 0x{0:X}")]
    UnknownOpcode(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_halt_before_opcode_dispatch() {
        assert_eq!(decode(0xFFFF).unwrap(), Instruction::Halt);
        // Any other opcode-0xF word is a BNE.
        assert_eq!(
            decode(0xF1FE).unwrap(),
            Instruction::Bne { rd: 1, offset: -2 }
        );
    }

    #[test]
    fn test_decode_nop_ignores_low_bits() {
        assert_eq!(decode(0x0000).unwrap(), Instruction::Nop);
        assert_eq!(decode(0x0123).unwrap(), Instruction::Nop);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let cases = [
            Instruction::Nop,
            Instruction::Add { rd: 1, rs: 2, rt: 3 },
            Instruction::Addi { rd: 3, imm: 0x01 },
            Instruction::Sub { rd: 0xF, rs: 0xE, rt: 0xD },
            Instruction::And { rd: 4, rs: 5, rt: 6 },
            Instruction::Or { rd: 7, rs: 8, rt: 9 },
            Instruction::Xor { rd: 0xA, rs: 0xB, rt: 0xC },
            Instruction::Not { rd: 1, rs: 2 },
            Instruction::Shl { rd: 1, rs: 2, rt: 3 },
            Instruction::Shr { rd: 1, rs: 2, rt: 3 },
            Instruction::Load { rd: 2, rs: 3, offset: 0xF },
            Instruction::Store { rd: 2, rs: 3, offset: 0x0 },
            Instruction::Loadi { rd: 1, imm: 0x2A },
            Instruction::Loadi { rd: 2, imm: 0xFF },
            Instruction::Jmp { addr: 0xABC },
            Instruction::Beq { rd: 1, offset: 1 },
            Instruction::Beq { rd: 1, offset: -128 },
            Instruction::Bne { rd: 2, offset: 127 },
            Instruction::Halt,
        ];

        for instr in cases {
            let word = encode(&instr);
            assert_eq!(decode(word).unwrap(), instr, "word 0x{:04X}", word);
        }
    }

    #[test]
    fn test_decode_never_fails_on_any_word() {
        // Exhaustive: all sixteen opcode nibbles are assigned.
        for word in 0..=u16::MAX {
            decode(word).unwrap();
        }
    }

    #[test]
    fn test_decode_encode_identity_on_canonical_words() {
        // A word is canonical when its unused fields are zero. Re-encoding
        // a decoded instruction may only differ from the original word in
        // fields the opcode ignores, never in the opcode itself.
        for word in 0..=u16::MAX {
            let reencoded = encode(&decode(word).unwrap());
            if reencoded == word {
                continue;
            }
            assert_eq!(
                reencoded >> 12,
                word >> 12,
                "opcode changed for 0x{:04X}",
                word
            );
        }
    }

    #[test]
    fn test_bne_all_ones_collides_with_halt() {
        // BNE RF, -1 shares the HALT encoding; the codec resolves the
        // collision in favor of HALT.
        let word = encode(&Instruction::Bne { rd: 0xF, offset: -1 });
        assert_eq!(word, HALT_WORD);
        assert_eq!(decode(word).unwrap(), Instruction::Halt);
    }

    #[test]
    fn test_loadi_sample_encodings() {
        assert_eq!(encode(&Instruction::Loadi { rd: 1, imm: 0x2A }), 0xC12A);
        assert_eq!(encode(&Instruction::Loadi { rd: 2, imm: 0xFF }), 0xC2FF);
    }
}
