//! Disassembler for Opal-16 programs.
//!
//! Converts code words back to readable records. This is a pure inverse
//! of the encoder; it holds no architectural state.

use crate::cpu::decode::{decode, Instruction};
use serde::{Serialize, Deserialize};

/// One disassembled code word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassembledInstruction {
    /// Byte address of the word.
    pub address: u16,
    /// The raw code word.
    pub machine_code: u16,
    /// Mnemonic, or a placeholder carrying the opcode nibble.
    pub mnemonic: String,
    /// Operand text: registers as `R<nibble>`, immediates as `0x..`,
    /// branch offsets as signed decimal.
    pub operands: String,
    /// Human-readable effect summary.
    pub comment: String,
}

/// Disassemble a sequence of code words starting at the given byte address.
pub fn disassemble(code: &[u16], start_address: u16) -> Vec<DisassembledInstruction> {
    code.iter()
        .enumerate()
        .map(|(i, &word)| disassemble_word(word, start_address.wrapping_add(i as u16 * 2)))
        .collect()
}

/// Disassemble a single code word.
pub fn disassemble_word(word: u16, address: u16) -> DisassembledInstruction {
    let (mnemonic, operands, comment) = match decode(word) {
        Ok(instr) => format_instruction(&instr),
        Err(_) => (
            format!("UNK{:X}", word >> 12),
            String::new(),
            format!("unknown opcode 0x{:X}", word >> 12),
        ),
    };

    DisassembledInstruction {
        address,
        machine_code: word,
        mnemonic,
        operands,
        comment,
    }
}

/// Render a disassembly listing as text, one record per line.
pub fn disassemble_to_text(code: &[u16], start_address: u16) -> String {
    let mut output = String::new();
    for record in disassemble(code, start_address) {
        let mut line = format!(
            "0x{:04X}: {:04X}  {}",
            record.address, record.machine_code, record.mnemonic
        );
        if !record.operands.is_empty() {
            line.push(' ');
            line.push_str(&record.operands);
        }
        output.push_str(&format!("{:<40}; {}\n", line, record.comment));
    }
    output
}

fn format_instruction(instr: &Instruction) -> (String, String, String) {
    match *instr {
        Instruction::Nop => ("NOP".into(), String::new(), "no operation".into()),

        Instruction::Add { rd, rs, rt } => (
            "ADD".into(),
            format!("R{:X}, R{:X}, R{:X}", rd, rs, rt),
            format!("R{:X} = R{:X} + R{:X}", rd, rs, rt),
        ),
        Instruction::Addi { rd, imm } => (
            "ADDI".into(),
            format!("R{:X}, 0x{:02X}", rd, imm),
            format!("R{:X} = R{:X} + 0x{:02X}", rd, rd, imm),
        ),
        Instruction::Sub { rd, rs, rt } => (
            "SUB".into(),
            format!("R{:X}, R{:X}, R{:X}", rd, rs, rt),
            format!("R{:X} = R{:X} - R{:X}", rd, rs, rt),
        ),
        Instruction::And { rd, rs, rt } => (
            "AND".into(),
            format!("R{:X}, R{:X}, R{:X}", rd, rs, rt),
            format!("R{:X} = R{:X} & R{:X}", rd, rs, rt),
        ),
        Instruction::Or { rd, rs, rt } => (
            "OR".into(),
            format!("R{:X}, R{:X}, R{:X}", rd, rs, rt),
            format!("R{:X} = R{:X} | R{:X}", rd, rs, rt),
        ),
        Instruction::Xor { rd, rs, rt } => (
            "XOR".into(),
            format!("R{:X}, R{:X}, R{:X}", rd, rs, rt),
            format!("R{:X} = R{:X} ^ R{:X}", rd, rs, rt),
        ),
        Instruction::Not { rd, rs } => (
            "NOT".into(),
            format!("R{:X}, R{:X}", rd, rs),
            format!("R{:X} = ~R{:X}", rd, rs),
        ),
        Instruction::Shl { rd, rs, rt } => (
            "SHL".into(),
            format!("R{:X}, R{:X}, R{:X}", rd, rs, rt),
            format!("R{:X} = R{:X} << R{:X}", rd, rs, rt),
        ),
        Instruction::Shr { rd, rs, rt } => (
            "SHR".into(),
            format!("R{:X}, R{:X}, R{:X}", rd, rs, rt),
            format!("R{:X} = R{:X} >> R{:X}", rd, rs, rt),
        ),

        Instruction::Load { rd, rs, offset } => (
            "LOAD".into(),
            format!("R{:X}, R{:X}, 0x{:02X}", rd, rs, offset),
            format!("R{:X} = MEM[R{:X} + {}]", rd, rs, offset as u16 * 2),
        ),
        Instruction::Store { rd, rs, offset } => (
            "STORE".into(),
            format!("R{:X}, R{:X}, 0x{:02X}", rd, rs, offset),
            format!("MEM[R{:X} + {}] = R{:X}", rs, offset as u16 * 2, rd),
        ),
        Instruction::Loadi { rd, imm } => (
            "LOADI".into(),
            format!("R{:X}, 0x{:02X}", rd, imm),
            format!("R{:X} = 0x{:04X}", rd, imm as i8 as i16 as u16),
        ),

        Instruction::Jmp { addr } => (
            "JMP".into(),
            format!("0x{:03X}", addr),
            format!("PC = 0x{:03X}", addr),
        ),
        Instruction::Beq { rd, offset } => (
            "BEQ".into(),
            format!("R{:X}, {}", rd, offset),
            "branch if zero".into(),
        ),
        Instruction::Bne { rd, offset } => (
            "BNE".into(),
            format!("R{:X}, {}", rd, offset),
            "branch if not zero".into(),
        ),

        Instruction::Halt => ("HALT".into(), String::new(), "stop execution".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assembler::assemble;

    #[test]
    fn test_disassemble_halt_and_nop() {
        let records = disassemble(&[0x0000, 0xFFFF], 0);

        assert_eq!(records[0].mnemonic, "NOP");
        assert_eq!(records[0].address, 0);
        assert_eq!(records[1].mnemonic, "HALT");
        assert_eq!(records[1].address, 2);
        assert_eq!(records[1].machine_code, 0xFFFF);
    }

    #[test]
    fn test_register_and_immediate_formatting() {
        let records = disassemble(&[0x1AB1, 0xC2FF, 0xD234], 0);

        assert_eq!(records[0].mnemonic, "ADD");
        assert_eq!(records[0].operands, "RA, RB, R1");
        assert_eq!(records[1].mnemonic, "LOADI");
        assert_eq!(records[1].operands, "R2, 0xFF");
        assert_eq!(records[2].mnemonic, "JMP");
        assert_eq!(records[2].operands, "0x234");
    }

    #[test]
    fn test_branch_offsets_are_signed_decimal() {
        let records = disassemble(&[0xE101, 0xF1FE], 0);

        assert_eq!(records[0].operands, "R1, 1");
        assert_eq!(records[1].operands, "R1, -2");
    }

    #[test]
    fn test_word_0xffff_is_halt_not_bne() {
        let record = disassemble_word(0xFFFF, 0x10);
        assert_eq!(record.mnemonic, "HALT");
    }

    #[test]
    fn test_assemble_disassemble_roundtrip() {
        let source = r#"
            LOADI R1, 0
            BEQ R1, skip
            LOADI R2, 1
        skip:
            ADD R3, R1, R2
            STORE R3, R1, 2
            HALT
        "#;

        let assembly = assemble(source).unwrap();
        let records = disassemble(&assembly.code, 0);

        let mnemonics: Vec<&str> = records.iter().map(|r| r.mnemonic.as_str()).collect();
        assert_eq!(
            mnemonics,
            vec!["LOADI", "BEQ", "LOADI", "ADD", "STORE", "HALT"]
        );

        // Re-assembling the disassembly reproduces the code words.
        let mut rebuilt = String::new();
        for record in &records {
            rebuilt.push_str(&record.mnemonic);
            if !record.operands.is_empty() {
                rebuilt.push(' ');
                rebuilt.push_str(&record.operands);
            }
            rebuilt.push('\n');
        }
        let reassembled = assemble(&rebuilt).unwrap();
        assert_eq!(reassembled.code, assembly.code);
    }

    #[test]
    fn test_text_listing_contains_addresses_and_comments() {
        let text = disassemble_to_text(&[0xC12A, 0xFFFF], 0);

        assert!(text.contains("0x0000"));
        assert!(text.contains("LOADI R1, 0x2A"));
        assert!(text.contains("stop execution"));
    }
}
