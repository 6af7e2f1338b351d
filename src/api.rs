//! Transport-facing request and response types.
//!
//! These are the JSON shapes a host wraps around the core: assemble,
//! execute, disassemble. The HTTP layer itself lives outside this crate;
//! everything here is plain serde values and pure functions over them.

use crate::asm::{self, AsmError, DisassembledInstruction};
use crate::cpu::{Cpu, Snapshot};
use serde::{Serialize, Deserialize};
use std::collections::HashMap;

/// Default cycle budget when a request leaves `maxCycles` unset.
pub const DEFAULT_MAX_CYCLES: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembleRequest {
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembleResponse {
    pub machine_code: Vec<u16>,
    pub labels: HashMap<String, u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub machine_code: Vec<u16>,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,
}

fn default_max_cycles() -> u64 {
    DEFAULT_MAX_CYCLES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    /// One snapshot per executed instruction (the halting step excluded).
    pub history: Vec<Snapshot>,
    pub final_state: Snapshot,
    pub cycle_count: u64,
    pub halted: bool,
    /// Set when execution stopped on a fault.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassembleRequest {
    pub machine_code: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisassembleResponse {
    pub instructions: Vec<DisassembledInstruction>,
}

/// Assemble source text.
pub fn assemble(request: &AssembleRequest) -> Result<AssembleResponse, AsmError> {
    let assembly = asm::assemble(&request.source)?;
    Ok(AssembleResponse {
        machine_code: assembly.code,
        labels: assembly.labels,
    })
}

/// Execute a program on a fresh machine, from address 0.
pub fn execute(request: &ExecuteRequest) -> ExecuteResponse {
    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_program(&request.machine_code, 0) {
        return ExecuteResponse {
            history: Vec::new(),
            final_state: cpu.snapshot(),
            cycle_count: 0,
            halted: false,
            error: Some(e.to_string()),
        };
    }

    let result = cpu.run(request.max_cycles);
    ExecuteResponse {
        history: result.history,
        final_state: result.final_state,
        cycle_count: result.cycle_count,
        halted: result.halted,
        error: result.fault.map(|e| e.to_string()),
    }
}

/// Disassemble a program.
pub fn disassemble(request: &DisassembleRequest) -> DisassembleResponse {
    DisassembleResponse {
        instructions: asm::disassemble(&request.machine_code, 0),
    }
}
