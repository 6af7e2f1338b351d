//! TUI debugger for the Opal-16 emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and flag visualization
//! - Memory view with scrolling
//! - Step/run/breakpoint controls
//! - Disassembly view around the program counter

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
