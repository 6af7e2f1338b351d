//! Opal-16 Emulator - CLI Entry Point
//!
//! Commands:
//! - `opal16-emu run <program>` - Run an image or ASM file
//! - `opal16-emu debug <program>` - Interactive debugger
//! - `opal16-emu asm <source>` - Assemble to a program image
//! - `opal16-emu disasm <image>` - Disassemble a program image
//! - `opal16-emu test` - Run the built-in self-test

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "opal16-emu")]
#[command(version = "0.1.0")]
#[command(about = "An emulator toolchain for the Opal-16, a 16-bit teaching RISC")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the image or ASM file to execute
        program: String,
        /// Maximum number of cycles to run
        #[arg(short, long, default_value = "10000")]
        max_cycles: u64,
        /// Show trace output
        #[arg(short, long)]
        trace: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the image or ASM file to debug
        program: String,
    },
    /// Assemble source to a program image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble a program image to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace }) => {
            run_program(&program, max_cycles, trace);
        }
        Some(Commands::Debug { program }) => {
            debug_program(&program);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("Opal-16 Emulator v0.1.0");
            println!("A 16-bit teaching RISC toolchain");
            println!();
            println!("Use --help for available commands");
        }
    }
}

/// Load a program from an ASM source file or an image file.
fn load_words(path: &str) -> Vec<u16> {
    use opal16::{assemble, load_image};

    if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match assemble(&source) {
            Ok(assembly) => {
                println!("📝 Assembled {} words", assembly.code.len());
                assembly.code
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_image(path) {
            Ok(image) => {
                println!("📂 Loaded {} words", image.len());
                image.words
            }
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_program(path: &str, max_cycles: u64, trace: bool) {
    use opal16::Cpu;
    use opal16::asm::disasm::disassemble_word;

    println!("🔧 Running: {}", path);

    let words = load_words(path);
    if words.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_program(&words, 0) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }

    println!();
    println!("━━━ Execution ━━━");

    let mut steps = 0u64;
    while cpu.is_running() && steps < max_cycles {
        let pc = cpu.regs.pc;
        let word = cpu.mem.read((pc / 2) as usize);

        match cpu.step() {
            Ok(_) => {
                if trace {
                    let record = disassemble_word(word, pc);
                    println!(
                        "0x{:04X}: {:<20} SR={:04X}",
                        pc,
                        format!("{} {}", record.mnemonic, record.operands),
                        cpu.regs.sr
                    );
                }
                steps += 1;
            }
            Err(e) => {
                eprintln!("❌ CPU error at PC=0x{:04X}: {}", pc, e);
                std::process::exit(1);
            }
        }
    }

    println!();
    println!("━━━ Result ━━━");
    println!("Cycles: {}", cpu.cycles);
    println!("State: {:?}", cpu.state);
    for row in 0..4 {
        let line: Vec<String> = (0..4)
            .map(|col| {
                let r = row * 4 + col;
                format!("R{:X}={:04X}", r, cpu.regs.get(r as u8))
            })
            .collect();
        println!("{}", line.join("  "));
    }
    println!(
        "PC={:04X}  SP={:04X}  LR={:04X}  SR={:04X}",
        cpu.regs.pc, cpu.regs.sp, cpu.regs.lr, cpu.regs.sr
    );

    if steps >= max_cycles && cpu.is_running() {
        println!();
        println!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.", max_cycles);
    }
}

fn debug_program(path: &str) {
    use opal16::tui::run_debugger;

    println!("🔍 Loading: {}", path);

    let words = load_words(path);
    if words.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    println!("🚀 Launching debugger...");
    println!();

    if let Err(e) = run_debugger(words) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }
}

fn assemble_file(source_path: &str, output: Option<String>) {
    use opal16::{assemble, save_image};

    let out_path = output.unwrap_or_else(|| source_path.replace(".asm", ".rom"));

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let assembly = match assemble(&source) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} words", assembly.code.len());

    if !assembly.labels.is_empty() {
        let mut labels: Vec<_> = assembly.labels.iter().collect();
        labels.sort_by_key(|(_, &addr)| addr);
        for (name, addr) in labels {
            println!("  {} = 0x{:04X}", name, addr);
        }
    }

    if let Err(e) = save_image(&out_path, &assembly.code) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str) {
    use opal16::load_image;
    use opal16::asm::disassemble_to_text;

    println!("📖 Disassembling: {}", image_path);
    println!();

    let image = match load_image(image_path) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    print!("{}", disassemble_to_text(&image.words, 0));
}

fn run_self_test() {
    use opal16::{assemble, disassemble, Cpu};

    println!("━━━ Opal-16 Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    let mut check = |name: &str, ok: bool| {
        if ok {
            println!("{}... ✓", name);
            passed += 1;
        } else {
            println!("{}... ✗", name);
            failed += 1;
        }
    };

    // LOADI then HALT
    let assembly = assemble("LOADI R1, 0x2A\nHALT\n").unwrap();
    check("Assemble LOADI/HALT", assembly.code == vec![0xC12A, 0xFFFF]);

    let mut cpu = Cpu::new();
    cpu.load_program(&assembly.code, 0).unwrap();
    let result = cpu.run(1000);
    check(
        "Run LOADI/HALT",
        cpu.regs.get(1) == 0x2A && cpu.regs.pc == 4 && result.halted && result.cycle_count == 2,
    );

    // Sign extension
    let mut cpu = Cpu::new();
    cpu.load_program(&[0xC2FF, 0xFFFF], 0).unwrap();
    cpu.run(1000);
    check("LOADI sign-extends", cpu.regs.get(2) == 0xFFFF);

    // Carry flag
    let mut cpu = Cpu::new();
    cpu.load_program(&[0x2301, 0xFFFF], 0).unwrap();
    cpu.regs.set(3, 0xFFFF);
    cpu.run(1000);
    check(
        "ADDI carry",
        cpu.regs.get(3) == 0 && cpu.regs.zero() && !cpu.regs.negative() && cpu.regs.carry(),
    );

    // Forward branch
    let source = "LOADI R1, 0\nBEQ R1, skip\nLOADI R2, 1\nskip:\nHALT\n";
    let assembly = assemble(source).unwrap();
    let mut cpu = Cpu::new();
    cpu.load_program(&assembly.code, 0).unwrap();
    let result = cpu.run(1000);
    check("Forward branch", cpu.regs.get(2) == 0 && result.halted);

    // R0 hard-wired zero
    let mut cpu = Cpu::new();
    cpu.load_program(&[0xC07F, 0xFFFF], 0).unwrap();
    let result = cpu.run(1000);
    check("R0 hard-wired zero", cpu.regs.get(0) == 0 && result.halted);

    // Round trip
    let assembly = assemble("ADD R1, R2, R3\nJMP 0x004\nHALT\n").unwrap();
    let records = disassemble(&assembly.code, 0);
    check(
        "Disassembly round trip",
        records[0].mnemonic == "ADD" && records[1].mnemonic == "JMP" && records[2].mnemonic == "HALT",
    );

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
