//! NES CLI - Command line interface for NES emulator
//!
//! Loads a cartridge, runs the processor, picture unit and audio unit
//! loops in real time for a fixed duration and reports the result.

use clap::Parser;
use log::{error, info};
use nes_core::cartridge::Cartridge;
use nes_core::power::PowerState;
use nes_core::system::{NesSystem, SystemConfig};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

/// NES Emulator CLI
#[derive(Parser, Debug)]
#[command(name = "nes-cli")]
#[command(about = "A NES emulator CLI", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Seconds of wall-clock time to run
    #[arg(short, long, default_value = "1.0")]
    seconds: f64,

    /// Start address (hex, e.g. C000) instead of the reset vector
    #[arg(long, value_parser = parse_address)]
    start: Option<u16>,

    /// Processor clock in Hz; defaults to the cartridge's TV system
    #[arg(long)]
    frequency: Option<u32>,

    /// Run as fast as possible
    #[arg(long)]
    unthrottled: bool,

    /// Start suspended and single-step once per frame period
    #[arg(long)]
    paused: bool,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Log filter, e.g. `debug` or `nes_core::cpu=trace` (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_address(value: &str) -> Result<u16, String> {
    let digits = value
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .trim_start_matches('$');
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid address '{}': {}", value, e))
}

fn main() {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    );
    if let Some(filters) = &args.log_level {
        logger.parse_filters(filters);
    }
    logger.init();

    let cartridge = match Cartridge::load(&args.rom) {
        Ok(cart) => cart,
        Err(e) => {
            error!("Failed to load cartridge: {}", e);
            process::exit(1);
        }
    };

    println!("Loaded cartridge:");
    println!("  PRG ROM: {} bytes", cartridge.program_rom().len());
    println!("  CHR ROM: {} bytes", cartridge.character_rom().len());
    println!("  Mapper: {}", cartridge.attributes().mapper);
    println!("  TV system: {:?}", cartridge.attributes().tv_system);

    let config = SystemConfig {
        cpu_frequency_hz: args.frequency,
        throttle: !args.unthrottled,
        initial_state: if args.paused {
            PowerState::Suspended
        } else {
            PowerState::Run
        },
        ..SystemConfig::default()
    };
    let frame_period = config.frame_period;

    let mut system = NesSystem::new(cartridge, config);
    if let Err(e) = system.start(args.start) {
        error!("Failed to start system: {}", e);
        process::exit(1);
    }

    let duration = Duration::from_secs_f64(args.seconds.max(0.0));
    info!("Running for {:?}", duration);
    if args.paused {
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            system.single_step();
            thread::sleep(frame_period);
            elapsed += frame_period;
        }
    } else {
        thread::sleep(duration);
    }

    system.suspend();
    let state = system.power_state();
    if let Err(e) = system.shutdown() {
        error!("Shutdown failed: {}", e);
        process::exit(1);
    }

    println!("Completed {} cycles ({:?}).", system.total_cycles(), state);

    if args.dump_cpu {
        dump_cpu_state(&system);
    }
}

fn dump_cpu_state(system: &NesSystem) {
    let regs = system.registers();
    let status = system.flags();

    println!("\nCPU State:");
    println!("  A:    ${:02X}", regs.a);
    println!("  X:    ${:02X}", regs.x);
    println!("  Y:    ${:02X}", regs.y);
    println!("  PC:   ${:04X}", regs.pc);
    println!("  SP:   ${:02X}", regs.sp);
    println!("  P:    {} (${:02X})", status, status.bits());
    println!("  Cycles: {}", system.total_cycles());
}
