//! NES Core - Pure Rust NES processor core
//!
//! This crate provides the 2A03 execution engine, the owner-tagged address
//! space with its DMA channels, and the run-state coordination shared by
//! the processor, picture unit and audio unit loops.

#![forbid(unsafe_code)]

/// Register file and status flags
pub mod registers;
/// RAM and ROM backing stores
pub mod memory;
/// Address-space router
pub mod bus;
/// Fixed DMA channels
pub mod dma;
/// Run state shared by every loop
pub mod power;
/// Clock sources and cycle pacing
pub mod clock;
/// NMI line
pub mod interrupt;
/// Opcode dispatch table
pub mod dispatch;
/// CPU module containing the 2A03 (6502 variant) implementation
pub mod cpu;
/// Controller button state
pub mod controller;
/// iNES cartridge images
pub mod cartridge;
/// PPU (Picture Processing Unit) register stub
pub mod ppu;
/// APU (Audio Processing Unit) stub
pub mod apu;
/// Integration module for complete NES system
pub mod system;

pub use bus::{MemoryChunk, MemoryManager, MemoryOwner, MemoryType};
pub use cartridge::{Cartridge, CartridgeError};
pub use cpu::{Bus, Cpu, CpuHandle, Step};
pub use power::{PowerHandler, PowerState};
pub use registers::{Register, Registers, StatusFlags};
pub use system::{NesSystem, SystemConfig, SystemError};
