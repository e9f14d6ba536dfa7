//! NES System Integration
//!
//! Assembles the address space, the processor engine and the picture and
//! audio unit loops, and runs each loop on its own thread. All three share
//! one [`PowerHandler`]; every state change wakes every loop.
//!
//! Memory layout, in routing order:
//!
//! | Chunk          | Start   | Size     | Type | Owner        |
//! |----------------|---------|----------|------|--------------|
//! | CPU RAM        | `$0000` | 2 KiB    | RAM  | processor    |
//! | PPU registers  | `$2000` | 8        | IO   | picture unit |
//! | CPU registers  | `$4000` | `$18`    | IO   | processor    |
//! | PRG ROM        | `$8000` | 16/32 KiB| ROM  | cartridge    |
//! | PRG ROM mirror | `$C000` | 16 KiB   | ROM  | cartridge    |
//! | OAM            | `$0000` | 256      | RAM  | picture unit |
//! | Audio RAM      | `$0000` | 16       | RAM  | audio unit   |
//!
//! The mirror is only mapped for a single 16 KiB program bank.
//!
//! IO cells are shared without locks; each field has exactly one writer:
//!
//! - PPUCTRL (`$2000`): processor
//! - PPUSTATUS (`$2002`): picture unit
//! - OAM/APU DMA triggers (`$4014`, `$4015`): processor
//! - controller port (`$4016`): processor loop, from [`Controller`]

use crate::apu::{AudioUnit, AUDIO_RAM_SIZE};
use crate::bus::{MemoryChunk, MemoryManager, MemoryOwner, MemoryType};
use crate::cartridge::{Cartridge, PRG_BANK_SIZE};
use crate::clock::{MonotonicClock, Pacer};
use crate::controller::Controller;
use crate::cpu::{Bus, Cpu, CpuHandle};
use crate::power::{PowerHandler, PowerState, RunGate};
use crate::ppu::{PictureUnit, NTSC_FRAME_PERIOD, OAM_SIZE};
use crate::registers::{Registers, StatusFlags};
use log::info;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Internal RAM size
pub const CPU_RAM_SIZE: u32 = 0x0800;

/// Picture unit register window
pub const PPU_IO_START: u16 = 0x2000;
pub const PPU_IO_SIZE: u32 = 8;

/// APU and I/O register window
pub const CPU_IO_START: u16 = 0x4000;
pub const CPU_IO_SIZE: u32 = 0x18;

/// First program ROM address
pub const PRG_ROM_START: u16 = 0x8000;

/// System error types
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("system already started")]
    AlreadyStarted,
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Assembly options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    /// Processor clock; `None` follows the cartridge's TV system
    pub cpu_frequency_hz: Option<u32>,
    /// Pace the processor to its clock
    pub throttle: bool,
    /// Picture unit frame period
    pub frame_period: Duration,
    /// Power state when the loops start
    pub initial_state: PowerState,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            cpu_frequency_hz: None,
            throttle: true,
            frame_period: NTSC_FRAME_PERIOD,
            initial_state: PowerState::Run,
        }
    }
}

/// Build the standard address space around `cartridge`
pub fn build_memory(cartridge: Cartridge) -> MemoryManager {
    let single_bank = cartridge.program_rom().len() <= PRG_BANK_SIZE;
    let mut memory = MemoryManager::new(cartridge);

    memory.add_chunk(MemoryChunk::new(
        0x0000,
        CPU_RAM_SIZE,
        MemoryType::Ram,
        MemoryOwner::Processor,
        "CPU RAM",
    ));
    memory.add_chunk(MemoryChunk::new(
        PPU_IO_START,
        PPU_IO_SIZE,
        MemoryType::Io,
        MemoryOwner::PictureUnit,
        "PPU registers",
    ));
    memory.add_chunk(MemoryChunk::new(
        CPU_IO_START,
        CPU_IO_SIZE,
        MemoryType::Io,
        MemoryOwner::Processor,
        "CPU registers",
    ));

    if single_bank {
        let bank = PRG_BANK_SIZE as u32;
        memory.add_chunk(MemoryChunk::new(
            PRG_ROM_START,
            bank,
            MemoryType::Rom,
            MemoryOwner::Cartridge,
            "PRG ROM",
        ));
        memory.add_chunk(MemoryChunk::new(
            PRG_ROM_START + bank as u16,
            bank,
            MemoryType::Rom,
            MemoryOwner::Cartridge,
            "PRG ROM mirror",
        ));
    } else {
        memory.add_chunk(MemoryChunk::new(
            PRG_ROM_START,
            0x8000,
            MemoryType::Rom,
            MemoryOwner::Cartridge,
            "PRG ROM",
        ));
    }

    memory.add_chunk(MemoryChunk::new(
        0x0000,
        OAM_SIZE,
        MemoryType::Ram,
        MemoryOwner::PictureUnit,
        "OAM",
    ));
    memory.add_chunk(MemoryChunk::new(
        0x0000,
        AUDIO_RAM_SIZE,
        MemoryType::Ram,
        MemoryOwner::AudioUnit,
        "Audio RAM",
    ));
    memory
}

/// NES System - integrates all components
pub struct NesSystem {
    memory: Arc<MemoryManager>,
    power: Arc<PowerHandler>,
    controller: Arc<Controller>,
    cpu: Option<Cpu>,
    ppu: Option<PictureUnit>,
    apu: Option<AudioUnit>,
    cpu_handle: CpuHandle,
    ppu_gate: Arc<RunGate>,
    apu_gate: Arc<RunGate>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl NesSystem {
    /// Assemble a system around `cartridge`; nothing runs until `start`
    pub fn new(cartridge: Cartridge, config: SystemConfig) -> Self {
        let frequency = config
            .cpu_frequency_hz
            .unwrap_or_else(|| cartridge.attributes().tv_system.cpu_frequency());
        let memory = Arc::new(build_memory(cartridge));
        let power = Arc::new(PowerHandler::new(config.initial_state));
        let controller = Arc::new(Controller::new());

        let pacer = if config.throttle {
            Pacer::new(MonotonicClock::new(), frequency)
        } else {
            Pacer::unthrottled(MonotonicClock::new())
        };
        info!(
            "CPU clock {} Hz{}",
            frequency,
            if config.throttle { "" } else { " (unthrottled)" }
        );

        let cpu = Cpu::new(
            Arc::clone(&memory) as Arc<dyn Bus>,
            Arc::clone(&power),
            Arc::clone(&controller),
            pacer,
        );
        let cpu_handle = cpu.handle();
        let ppu = PictureUnit::new(
            Arc::clone(&memory),
            Arc::clone(&power),
            cpu_handle.requester(),
            config.frame_period,
        );
        let apu = AudioUnit::new(Arc::clone(&memory), Arc::clone(&power), config.frame_period);

        Self {
            ppu_gate: ppu.gate(),
            apu_gate: apu.gate(),
            memory,
            power,
            controller,
            cpu: Some(cpu),
            ppu: Some(ppu),
            apu: Some(apu),
            cpu_handle,
            threads: Vec::new(),
        }
    }

    /// Spawn the processor, picture unit and audio unit threads
    pub fn start(&mut self, start_vector: Option<u16>) -> Result<(), SystemError> {
        let (Some(mut cpu), Some(mut ppu), Some(mut apu)) =
            (self.cpu.take(), self.ppu.take(), self.apu.take())
        else {
            return Err(SystemError::AlreadyStarted);
        };

        self.spawn("cpu", move || cpu.execute(start_vector))?;
        self.spawn("ppu", move || ppu.execute())?;
        self.spawn("apu", move || apu.execute())?;
        Ok(())
    }

    fn spawn<F>(&mut self, name: &'static str, body: F) -> Result<(), SystemError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|source| SystemError::Spawn { name, source })?;
        self.threads.push((name, handle));
        Ok(())
    }

    /// Store a power state and wake every loop
    pub fn set_power_state(&self, state: PowerState) {
        self.power.set_state(state);
        self.cpu_handle.notify();
        self.ppu_gate.notify();
        self.apu_gate.notify();
    }

    pub fn run(&self) {
        self.set_power_state(PowerState::Run);
    }

    pub fn suspend(&self) {
        self.set_power_state(PowerState::Suspended);
    }

    /// Run exactly one more processor instruction.
    ///
    /// The picture and audio loops may also take one iteration, depending
    /// on which loop observes `SingleStep` first.
    pub fn single_step(&self) {
        // Store the state before granting, or the processor may step twice
        let previous = self.power.replace(PowerState::SingleStep);
        if previous == PowerState::Suspended {
            self.cpu_handle.single_step();
        } else {
            // A running processor takes its step from the state alone
            self.cpu_handle.notify();
        }
        self.ppu_gate.notify();
        self.apu_gate.notify();
    }

    /// Run until the next RTS retires, then suspend
    pub fn step_to_return(&self) {
        self.cpu_handle.step_to_return();
        self.run();
    }

    pub fn request_interrupt(&self) {
        self.cpu_handle.request_interrupt();
    }

    pub fn registers(&self) -> Registers {
        self.cpu_handle.registers()
    }

    pub fn flags(&self) -> StatusFlags {
        self.cpu_handle.flags()
    }

    pub fn total_cycles(&self) -> u64 {
        self.cpu_handle.total_cycles()
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Stop every loop and join its thread
    pub fn shutdown(&mut self) -> Result<(), SystemError> {
        self.cpu_handle.stop();
        self.ppu_gate.stop();
        self.apu_gate.stop();

        let mut result = Ok(());
        for (name, handle) in self.threads.drain(..) {
            if handle.join().is_err() {
                result = Err(SystemError::Panicked(name));
            }
        }
        result
    }
}

impl Drop for NesSystem {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
