//! Two-pass assembler for Opal-16 programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! start:              ; Define a label (case-sensitive)
//!     LOADI R1, 0x2A  ; Mnemonics and registers are case-insensitive
//!     ADD R2, R1, R1
//!     BEQ R2, start   ; Branch targets may be labels or raw offsets
//!     JMP end
//! end:
//!     HALT
//! ```
//!
//! The first pass tokenizes each line into an instruction record and
//! assigns addresses (2 bytes per instruction); the second pass encodes
//! every record through the codec, resolving label references.

use crate::cpu::decode::{encode, Instruction};
use std::collections::HashMap;
use thiserror::Error;

/// Successful assembly: the code words plus the final label table.
///
/// The label table is advisory output for diagnostics; it is not part of
/// the code stream.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// One 16-bit code word per source instruction.
    pub code: Vec<u16>,
    /// Label name to byte address.
    pub labels: HashMap<String, u16>,
}

/// Assemble source text to code words and a label table.
pub fn assemble(source: &str) -> Result<Assembly, AsmError> {
    let mut asm = Assembler::new();
    asm.first_pass(source)?;
    let code = asm.second_pass()?;
    Ok(Assembly {
        code,
        labels: asm.labels,
    })
}

/// One tokenized source instruction, produced by the first pass.
#[derive(Debug, Clone)]
struct SourceInstruction {
    mnemonic: String,
    operands: Vec<String>,
    /// Assigned byte address.
    address: u16,
    /// 1-based source line.
    line: usize,
}

/// The assembler state.
struct Assembler {
    /// Label table (name -> byte address). Labels are case-sensitive.
    labels: HashMap<String, u16>,
    /// Instruction records in source order.
    instructions: Vec<SourceInstruction>,
    /// Current byte address.
    address: u16,
}

impl Assembler {
    fn new() -> Self {
        Self {
            labels: HashMap::new(),
            instructions: Vec::new(),
            address: 0,
        }
    }

    /// Tokenize lines, record labels, assign addresses.
    fn first_pass(&mut self, source: &str) -> Result<(), AsmError> {
        for (idx, raw_line) in source.lines().enumerate() {
            let line_num = idx + 1;

            // Strip comment and surrounding whitespace
            let line = match raw_line.find(';') {
                Some(i) => &raw_line[..i],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Leading label, if any
            let text = if let Some((head, rest)) = line.split_once(':') {
                let label = head.trim();
                if !is_identifier(label) {
                    return Err(AsmError::Lex {
                        line: line_num,
                        literal: label.to_string(),
                    });
                }
                if self.labels.contains_key(label) {
                    return Err(AsmError::DuplicateLabel {
                        line: line_num,
                        label: label.to_string(),
                    });
                }
                self.labels.insert(label.to_string(), self.address);
                rest.trim()
            } else {
                line
            };

            if text.is_empty() {
                continue;
            }

            let (mnemonic, operand_text) = match text.split_once(char::is_whitespace) {
                Some((m, rest)) => (m, rest.trim()),
                None => (text, ""),
            };

            let operands = if operand_text.is_empty() {
                Vec::new()
            } else {
                operand_text
                    .split(',')
                    .map(|op| op.trim().to_string())
                    .collect()
            };

            self.instructions.push(SourceInstruction {
                mnemonic: mnemonic.to_uppercase(),
                operands,
                address: self.address,
                line: line_num,
            });
            self.address += 2;
        }

        Ok(())
    }

    /// Encode every record through the codec.
    fn second_pass(&self) -> Result<Vec<u16>, AsmError> {
        let mut code = Vec::with_capacity(self.instructions.len());
        for record in &self.instructions {
            let instr = self.encode_record(record)?;
            code.push(encode(&instr));
        }
        Ok(code)
    }

    fn encode_record(&self, record: &SourceInstruction) -> Result<Instruction, AsmError> {
        let instr = match record.mnemonic.as_str() {
            "NOP" => {
                self.expect_arity(record, 0)?;
                Instruction::Nop
            }
            "HALT" => {
                self.expect_arity(record, 0)?;
                Instruction::Halt
            }

            "ADD" | "SUB" | "AND" | "OR" | "XOR" | "SHL" | "SHR" => {
                self.expect_arity(record, 3)?;
                let rd = self.parse_register(record, 0)?;
                let rs = self.parse_register(record, 1)?;
                let rt = self.parse_register(record, 2)?;
                match record.mnemonic.as_str() {
                    "ADD" => Instruction::Add { rd, rs, rt },
                    "SUB" => Instruction::Sub { rd, rs, rt },
                    "AND" => Instruction::And { rd, rs, rt },
                    "OR" => Instruction::Or { rd, rs, rt },
                    "XOR" => Instruction::Xor { rd, rs, rt },
                    "SHL" => Instruction::Shl { rd, rs, rt },
                    _ => Instruction::Shr { rd, rs, rt },
                }
            }

            "NOT" => {
                self.expect_arity(record, 2)?;
                let rd = self.parse_register(record, 0)?;
                let rs = self.parse_register(record, 1)?;
                Instruction::Not { rd, rs }
            }

            "ADDI" | "LOADI" => {
                self.expect_arity(record, 2)?;
                let rd = self.parse_register(record, 0)?;
                let imm = self.parse_imm8(record, 1)?;
                if record.mnemonic == "ADDI" {
                    Instruction::Addi { rd, imm }
                } else {
                    Instruction::Loadi { rd, imm }
                }
            }

            "LOAD" | "STORE" => {
                self.expect_arity(record, 3)?;
                let rd = self.parse_register(record, 0)?;
                let rs = self.parse_register(record, 1)?;
                let offset = self.parse_offset4(record, 2)?;
                if record.mnemonic == "LOAD" {
                    Instruction::Load { rd, rs, offset }
                } else {
                    Instruction::Store { rd, rs, offset }
                }
            }

            "JMP" => {
                self.expect_arity(record, 1)?;
                // Label or immediate byte address; the low 12 bits are taken.
                let target = self.parse_target(record, 0)?;
                Instruction::Jmp {
                    addr: (target as u16) & 0xFFF,
                }
            }

            "BEQ" | "BNE" => {
                self.expect_arity(record, 2)?;
                let rd = self.parse_register(record, 0)?;
                let offset = self.parse_branch_offset(record, 1)?;
                if record.mnemonic == "BEQ" {
                    Instruction::Beq { rd, offset }
                } else {
                    Instruction::Bne { rd, offset }
                }
            }

            _ => {
                return Err(AsmError::UnknownMnemonic {
                    line: record.line,
                    mnemonic: record.mnemonic.clone(),
                })
            }
        };

        Ok(instr)
    }

    fn expect_arity(&self, record: &SourceInstruction, expected: usize) -> Result<(), AsmError> {
        if record.operands.len() != expected {
            return Err(AsmError::OperandArity {
                line: record.line,
                address: record.address,
                mnemonic: record.mnemonic.clone(),
                expected,
                found: record.operands.len(),
            });
        }
        Ok(())
    }

    fn parse_register(&self, record: &SourceInstruction, idx: usize) -> Result<u8, AsmError> {
        let operand = &record.operands[idx];
        register_value(operand).ok_or_else(|| AsmError::OperandShape {
            line: record.line,
            address: record.address,
            mnemonic: record.mnemonic.clone(),
            operand: operand.clone(),
        })
    }

    fn parse_imm8(&self, record: &SourceInstruction, idx: usize) -> Result<u8, AsmError> {
        let operand = &record.operands[idx];
        let value = parse_number(operand).ok_or_else(|| AsmError::Lex {
            line: record.line,
            literal: operand.clone(),
        })?;
        // Accept the signed and the unsigned reading of 8 bits.
        if !(-128..=255).contains(&value) {
            return Err(AsmError::ImmediateOutOfRange {
                line: record.line,
                mnemonic: record.mnemonic.clone(),
                value,
            });
        }
        Ok((value & 0xFF) as u8)
    }

    fn parse_offset4(&self, record: &SourceInstruction, idx: usize) -> Result<u8, AsmError> {
        let operand = &record.operands[idx];
        let value = parse_number(operand).ok_or_else(|| AsmError::Lex {
            line: record.line,
            literal: operand.clone(),
        })?;
        if !(0..=15).contains(&value) {
            return Err(AsmError::ImmediateOutOfRange {
                line: record.line,
                mnemonic: record.mnemonic.clone(),
                value,
            });
        }
        Ok(value as u8)
    }

    /// Resolve a JMP target: a label's byte address, or a raw immediate.
    fn parse_target(&self, record: &SourceInstruction, idx: usize) -> Result<i64, AsmError> {
        let operand = &record.operands[idx];

        if register_value(operand).is_some() {
            return Err(AsmError::OperandShape {
                line: record.line,
                address: record.address,
                mnemonic: record.mnemonic.clone(),
                operand: operand.clone(),
            });
        }
        if let Some(&addr) = self.labels.get(operand.as_str()) {
            return Ok(addr as i64);
        }
        if let Some(value) = parse_number(operand) {
            return Ok(value);
        }
        if is_identifier(operand) {
            return Err(AsmError::UnknownLabel {
                line: record.line,
                label: operand.clone(),
            });
        }
        Err(AsmError::Lex {
            line: record.line,
            literal: operand.clone(),
        })
    }

    /// Resolve a BEQ/BNE target to a signed instruction-count offset.
    ///
    /// A label resolves relative to the post-increment PC:
    /// `(target - (addr + 2)) / 2`. A numeric operand is taken as the
    /// offset itself. Either way it must fit in signed 8 bits.
    fn parse_branch_offset(&self, record: &SourceInstruction, idx: usize) -> Result<i8, AsmError> {
        let operand = &record.operands[idx];

        let offset = if register_value(operand).is_some() {
            return Err(AsmError::OperandShape {
                line: record.line,
                address: record.address,
                mnemonic: record.mnemonic.clone(),
                operand: operand.clone(),
            });
        } else if let Some(&target) = self.labels.get(operand.as_str()) {
            (target as i64 - (record.address as i64 + 2)) / 2
        } else if let Some(value) = parse_number(operand) {
            value
        } else if is_identifier(operand) {
            return Err(AsmError::UnknownLabel {
                line: record.line,
                label: operand.clone(),
            });
        } else {
            return Err(AsmError::Lex {
                line: record.line,
                literal: operand.clone(),
            });
        };

        if !(-128..=127).contains(&offset) {
            return Err(AsmError::BranchOutOfRange {
                line: record.line,
                offset,
            });
        }
        Ok(offset as i8)
    }
}

/// `R0`..`RF`, case-insensitive.
fn register_value(operand: &str) -> Option<u8> {
    let rest = operand
        .strip_prefix('R')
        .or_else(|| operand.strip_prefix('r'))?;
    if rest.len() != 1 {
        return None;
    }
    rest.chars().next()?.to_digit(16).map(|d| d as u8)
}

/// Signed numeric literal: decimal, `0x` hex or `0b` binary.
fn parse_number(operand: &str) -> Option<i64> {
    let (negative, body) = match operand.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, operand),
    };
    if body.is_empty() {
        return None;
    }

    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else if body.chars().all(|c| c.is_ascii_digit()) {
        body.parse().ok()?
    } else {
        return None;
    };

    Some(if negative { -value } else { value })
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("line {line}: malformed literal `{literal}`")]
    Lex { line: usize, literal: String },

    #[error("line {line}: unknown mnemonic `{mnemonic}`")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("line {line}: unknown label `{label}`")]
    UnknownLabel { line: usize, label: String },

    #[error("line {line}: duplicate label `{label}`")]
    DuplicateLabel { line: usize, label: String },

    #[error("line {line} (address 0x{address:04X}): {mnemonic} expects {expected} operands, found {found}")]
    OperandArity {
        line: usize,
        address: u16,
        mnemonic: String,
        expected: usize,
        found: usize,
    },

    #[error("line {line} (address 0x{address:04X}): bad operand `{operand}` for {mnemonic}")]
    OperandShape {
        line: usize,
        address: u16,
        mnemonic: String,
        operand: String,
    },

    #[error("line {line}: immediate {value} out of range for {mnemonic}")]
    ImmediateOutOfRange {
        line: usize,
        mnemonic: String,
        value: i64,
    },

    #[error("line {line}: branch offset {offset} out of range (-128..=127)")]
    BranchOutOfRange { line: usize, offset: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_loadi_halt() {
        let assembly = assemble("LOADI R1, 0x2A\nHALT\n").unwrap();
        assert_eq!(assembly.code, vec![0xC12A, 0xFFFF]);
        assert!(assembly.labels.is_empty());
    }

    #[test]
    fn test_forward_branch_to_label() {
        let source = r#"
            LOADI R1, 0
            BEQ R1, skip
            LOADI R2, 1
        skip:
            HALT
        "#;

        let assembly = assemble(source).unwrap();
        assert_eq!(assembly.code, vec![0xC100, 0xE101, 0xC201, 0xFFFF]);
        assert_eq!(assembly.labels.get("skip"), Some(&6));
    }

    #[test]
    fn test_backward_branch_to_label() {
        let source = r#"
            LOADI R1, 3
            LOADI R2, 1
        loop:
            SUB R1, R1, R2
            BNE R1, loop
            HALT
        "#;

        let assembly = assemble(source).unwrap();
        // (4 - (6 + 2)) / 2 = -2 = 0xFE
        assert_eq!(assembly.code[3], 0xF1FE);
        assert_eq!(assembly.labels.get("loop"), Some(&4));
    }

    #[test]
    fn test_unknown_label_is_reported() {
        let err = assemble("JMP nowhere\nHALT\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::UnknownLabel {
                line: 1,
                label: "nowhere".into()
            }
        );
    }

    #[test]
    fn test_duplicate_label_is_reported() {
        let err = assemble("here:\nNOP\nhere:\nHALT\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::DuplicateLabel {
                line: 3,
                label: "here".into()
            }
        );
    }

    #[test]
    fn test_labels_are_case_sensitive() {
        let err = assemble("Loop:\nJMP loop\n").unwrap_err();
        assert!(matches!(err, AsmError::UnknownLabel { ref label, .. } if label == "loop"));
    }

    #[test]
    fn test_mnemonics_and_registers_are_case_insensitive() {
        let assembly = assemble("loadi r1, 0x2A\nadd Ra, rB, R1\nhalt\n").unwrap();
        assert_eq!(assembly.code, vec![0xC12A, 0x1AB1, 0xFFFF]);
    }

    #[test]
    fn test_numeric_literal_forms() {
        let assembly = assemble(
            "LOADI R1, 42\nLOADI R2, 0x2A\nLOADI R3, 0b101010\nLOADI R4, -1\nHALT\n",
        )
        .unwrap();
        assert_eq!(assembly.code[0], 0xC12A);
        assert_eq!(assembly.code[1], 0xC22A);
        assert_eq!(assembly.code[2], 0xC32A);
        assert_eq!(assembly.code[3], 0xC4FF);
    }

    #[test]
    fn test_malformed_literal_is_a_lex_error() {
        let err = assemble("LOADI R1, 0xZZ\n").unwrap_err();
        assert!(matches!(err, AsmError::Lex { line: 1, .. }));
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = assemble("FROB R1, R2\n").unwrap_err();
        assert!(matches!(err, AsmError::UnknownMnemonic { ref mnemonic, .. } if mnemonic == "FROB"));
    }

    #[test]
    fn test_operand_arity_mismatch() {
        let err = assemble("ADD R1, R2\n").unwrap_err();
        assert!(matches!(
            err,
            AsmError::OperandArity {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_register_where_immediate_expected() {
        let err = assemble("JMP R1\n").unwrap_err();
        assert!(matches!(err, AsmError::OperandShape { .. }));
    }

    #[test]
    fn test_immediate_out_of_range() {
        let err = assemble("ADDI R1, 300\n").unwrap_err();
        assert!(matches!(
            err,
            AsmError::ImmediateOutOfRange { value: 300, .. }
        ));

        let err = assemble("LOAD R1, R2, 16\n").unwrap_err();
        assert!(matches!(err, AsmError::ImmediateOutOfRange { value: 16, .. }));
    }

    #[test]
    fn test_branch_offset_out_of_range() {
        let mut source = String::from("BEQ R1, far\n");
        for _ in 0..130 {
            source.push_str("NOP\n");
        }
        source.push_str("far:\nHALT\n");

        let err = assemble(&source).unwrap_err();
        assert!(matches!(err, AsmError::BranchOutOfRange { offset: 130, .. }));
    }

    #[test]
    fn test_numeric_branch_offset_is_taken_verbatim() {
        let assembly = assemble("BEQ R1, -2\nBNE R2, 3\nHALT\n").unwrap();
        assert_eq!(assembly.code[0], 0xE1FE);
        assert_eq!(assembly.code[1], 0xF203);
    }

    #[test]
    fn test_jmp_takes_low_12_bits() {
        let assembly = assemble("JMP 0x1234\nHALT\n").unwrap();
        assert_eq!(assembly.code[0], 0xD234);
    }

    #[test]
    fn test_jmp_to_label_uses_byte_address() {
        let source = "NOP\nNOP\ntarget:\nJMP target\n";
        let assembly = assemble(source).unwrap();
        assert_eq!(assembly.labels.get("target"), Some(&4));
        assert_eq!(assembly.code[2], 0xD004);
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let source = "; leading comment\n\nNOP ; trailing comment\n   \nHALT\n";
        let assembly = assemble(source).unwrap();
        assert_eq!(assembly.code, vec![0x0000, 0xFFFF]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let assembly = assemble("LOADI R1, 1\r\nHALT\r\n").unwrap();
        assert_eq!(assembly.code, vec![0xC101, 0xFFFF]);
    }

    #[test]
    fn test_label_on_same_line_as_instruction() {
        let assembly = assemble("start: LOADI R1, 1\nJMP start\n").unwrap();
        assert_eq!(assembly.labels.get("start"), Some(&0));
        assert_eq!(assembly.code[1], 0xD000);
    }

    #[test]
    fn test_labels_do_not_advance_the_address() {
        let source = "a:\nb:\nNOP\n";
        let assembly = assemble(source).unwrap();
        assert_eq!(assembly.labels.get("a"), Some(&0));
        assert_eq!(assembly.labels.get("b"), Some(&0));
    }

    #[test]
    fn test_halt_is_only_emitted_from_the_halt_mnemonic() {
        // The all-ones BNE collides with HALT at the encoding level; the
        // assembler still emits it verbatim, as written.
        let assembly = assemble("BNE RF, -1\nHALT\n").unwrap();
        assert_eq!(assembly.code, vec![0xFFFF, 0xFFFF]);
    }
}
