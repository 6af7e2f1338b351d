//! WebAssembly bindings for the Opal-16 toolchain.
//!
//! This module provides JavaScript-friendly wrappers around the core
//! assembler, disassembler and executor.

use wasm_bindgen::prelude::*;
use crate::asm::assembler::assemble;
use crate::asm::disasm::{disassemble_to_text, disassemble_word};
use crate::cpu::{Cpu, MEMORY_WORDS};
use crate::cpu::decode::encode;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly VM wrapper.
#[wasm_bindgen]
pub struct WasmVm {
    cpu: Cpu,
    program: Vec<u16>,
}

#[wasm_bindgen]
impl WasmVm {
    /// Create a new VM instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            program: Vec::new(),
        }
    }

    /// Load a program from assembly source code. Returns the word count.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let assembly = assemble(source).map_err(|e| JsError::new(&format!("{}", e)))?;

        let len = assembly.code.len();
        self.program = assembly.code;
        self.cpu = Cpu::new();
        self.cpu
            .load_program(&self.program, 0)
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        Ok(len)
    }

    /// Load a program from raw code words.
    #[wasm_bindgen]
    pub fn load_words(&mut self, words: &[u16]) -> Result<usize, JsError> {
        self.program = words.to_vec();
        self.cpu = Cpu::new();
        self.cpu
            .load_program(&self.program, 0)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        Ok(self.program.len())
    }

    /// Step one instruction. Returns the disassembled instruction text.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        let instr = self
            .cpu
            .step()
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        let word = encode(&instr);
        let record = disassemble_word(word, self.cpu.regs.pc.wrapping_sub(2));
        Ok(format!("{} {}", record.mnemonic, record.operands).trim_end().to_string())
    }

    /// Run until halt, fault, or max cycles. Returns total cycles.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> u64 {
        let _ = self.cpu.run(max_cycles as u64);
        self.cpu.cycles
    }

    /// Reset to initial state with the loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        if !self.program.is_empty() {
            let _ = self.cpu.load_program(&self.program, 0);
        }
    }

    /// Check if the VM is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if the VM is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> u16 {
        self.cpu.regs.pc
    }

    /// Get stack pointer.
    #[wasm_bindgen]
    pub fn sp(&self) -> u16 {
        self.cpu.regs.sp
    }

    /// Get link register.
    #[wasm_bindgen]
    pub fn lr(&self) -> u16 {
        self.cpu.regs.lr
    }

    /// Get status register.
    #[wasm_bindgen]
    pub fn sr(&self) -> u16 {
        self.cpu.regs.sr
    }

    /// Get a general-purpose register value.
    #[wasm_bindgen]
    pub fn register(&self, r: u8) -> u16 {
        self.cpu.regs.get(r)
    }

    /// Get all general-purpose registers.
    #[wasm_bindgen]
    pub fn registers(&self) -> Vec<u16> {
        self.cpu.regs.file().to_vec()
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Get a memory word by word index (0-32767).
    #[wasm_bindgen]
    pub fn memory_at(&self, index: usize) -> u16 {
        if index < MEMORY_WORDS {
            self.cpu.mem.read(index)
        } else {
            0
        }
    }

    /// Get the architectural snapshot as a JSON string.
    #[wasm_bindgen]
    pub fn snapshot_json(&self) -> String {
        serde_json::to_string(&self.cpu.snapshot()).unwrap_or_default()
    }
}

impl Default for WasmVm {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the code words.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<Vec<u16>, JsError> {
    let assembly = assemble(source).map_err(|e| JsError::new(&format!("{}", e)))?;
    Ok(assembly.code)
}

/// Disassemble code words to a text listing.
#[wasm_bindgen]
pub fn wasm_disassemble(words: &[u16]) -> String {
    disassemble_to_text(words, 0)
}
