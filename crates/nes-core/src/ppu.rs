//! PPU (Picture Processing Unit) loop
//!
//! Only the register contract of the picture unit is modelled here: once
//! per frame it pulses the vertical-blank bit of PPUSTATUS and, when
//! PPUCTRL enables it, raises the NMI. Tile and pixel decoding live
//! outside the core.
//!
//! The unit owns OAM, a 256-byte RAM chunk at `$0000` of its own address
//! space, filled by OAM DMA.

use crate::bus::{MemoryManager, MemoryOwner};
use crate::interrupt::InterruptRequester;
use crate::power::{PowerHandler, RunGate};
use bitflags::bitflags;
use log::{info, trace};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Object Attribute Memory
pub const OAM_SIZE: u32 = 256;

/// $2000 - PPUCTRL, written by the processor
pub const PPUCTRL: u16 = 0x2000;

/// $2001 - PPUMASK
pub const PPUMASK: u16 = 0x2001;

/// $2002 - PPUSTATUS, written by the picture unit
pub const PPUSTATUS: u16 = 0x2002;

/// Scanlines with VBlank clear
pub const VISIBLE_SCANLINES: u32 = 240;

/// Scanlines per NTSC frame
pub const SCANLINES_PER_FRAME: u32 = 262;

/// NTSC frame period (60.0988 Hz)
pub const NTSC_FRAME_PERIOD: Duration = Duration::from_nanos(16_639_267);

bitflags! {
    /// PPU control flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PpuCtrl: u8 {
        const NAMETABLE = 0b0000_0011;
        const VRAM_INC = 0b0000_0100;
        const SPR_PATTERN_TABLE = 0b0000_1000;
        const BG_PATTERN_TABLE = 0b0001_0000;
        const SPRITE_SIZE = 0b0010_0000;
        const MASTER_SLAVE = 0b0100_0000;
        const NMI_ENABLE = 0b1000_0000;
    }
}

bitflags! {
    /// PPU status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PpuStatus: u8 {
        const SPRITE_OVERFLOW = 0b0010_0000;
        const SPRITE_ZERO_HIT = 0b0100_0000;
        const VBLANK = 0b1000_0000;
    }
}

/// Picture unit stub
pub struct PictureUnit {
    memory: Arc<MemoryManager>,
    power: Arc<PowerHandler>,
    gate: Arc<RunGate>,
    nmi: InterruptRequester,
    frame_period: Duration,
    frame_count: u64,
}

impl PictureUnit {
    pub fn new(
        memory: Arc<MemoryManager>,
        power: Arc<PowerHandler>,
        nmi: InterruptRequester,
        frame_period: Duration,
    ) -> Self {
        Self {
            memory,
            power,
            gate: Arc::new(RunGate::new()),
            nmi,
            frame_period,
            frame_count: 0,
        }
    }

    /// Wait/stop control for this loop
    pub fn gate(&self) -> Arc<RunGate> {
        Arc::clone(&self.gate)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// One OAM byte, as seen from the picture unit's space
    pub fn oam(&self, index: u8) -> u8 {
        self.memory
            .read_memory(MemoryOwner::PictureUnit, index as u16)
    }

    /// Start of the visible lines: vertical blank ends
    pub fn begin_frame(&mut self) {
        self.memory
            .io_address_handle(PPUSTATUS)
            .fetch_and(!PpuStatus::VBLANK.bits(), Ordering::Relaxed);
    }

    /// Start of vertical blank: set the status bit and raise the NMI when
    /// PPUCTRL enables it
    pub fn enter_vblank(&mut self) {
        self.memory
            .io_address_handle(PPUSTATUS)
            .fetch_or(PpuStatus::VBLANK.bits(), Ordering::Relaxed);

        let ctrl = PpuCtrl::from_bits_retain(
            self.memory.io_address_handle(PPUCTRL).load(Ordering::Relaxed),
        );
        if ctrl.contains(PpuCtrl::NMI_ENABLE) {
            self.nmi.request();
        }

        self.frame_count += 1;
        trace!("Frame {} (PPUCTRL {:#04X})", self.frame_count, ctrl.bits());
    }

    /// Part of the frame period spent on visible lines
    pub fn visible_period(&self) -> Duration {
        self.frame_period * VISIBLE_SCANLINES / SCANLINES_PER_FRAME
    }

    /// Run frames until the gate is stopped
    pub fn execute(&mut self) {
        info!("PPU started");
        let visible = self.visible_period();
        while self.gate.wait_for_permission(&self.power) {
            let start = Instant::now();
            self.begin_frame();
            thread::sleep(visible.saturating_sub(start.elapsed()));
            self.enter_vblank();
            thread::sleep(self.frame_period.saturating_sub(start.elapsed()));
        }
        info!("PPU stopped after {} frames", self.frame_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryChunk, MemoryType};
    use crate::cartridge::Cartridge;
    use crate::interrupt::InterruptLine;
    use crate::power::PowerState;

    fn picture_unit() -> (PictureUnit, Arc<MemoryManager>, Arc<InterruptLine>) {
        let mut memory = MemoryManager::new(Cartridge::default());
        memory.add_chunk(MemoryChunk::new(
            PPUCTRL,
            8,
            MemoryType::Io,
            MemoryOwner::PictureUnit,
            "PPU registers",
        ));
        let memory = Arc::new(memory);
        let line = Arc::new(InterruptLine::new());
        let ppu = PictureUnit::new(
            Arc::clone(&memory),
            Arc::new(PowerHandler::new(PowerState::Run)),
            InterruptRequester::new(Arc::clone(&line)),
            Duration::from_millis(1),
        );
        (ppu, memory, line)
    }

    #[test]
    fn test_vblank_toggles_per_frame() {
        let (mut ppu, memory, line) = picture_unit();
        ppu.enter_vblank();
        assert_eq!(memory.read_memory(MemoryOwner::Processor, PPUSTATUS) & 0x80, 0x80);
        assert!(!line.is_pending());
        assert_eq!(ppu.frame_count(), 1);

        ppu.begin_frame();
        assert_eq!(memory.read_memory(MemoryOwner::Processor, PPUSTATUS) & 0x80, 0);
    }

    #[test]
    fn test_frame_requests_nmi_when_enabled() {
        let (mut ppu, memory, line) = picture_unit();
        memory.write_memory(MemoryOwner::Processor, PPUCTRL, PpuCtrl::NMI_ENABLE.bits());
        ppu.begin_frame();
        assert!(!line.is_pending());
        ppu.enter_vblank();
        assert!(line.take());
    }

    #[test]
    fn test_visible_period() {
        let (ppu, _memory, _line) = picture_unit();
        assert_eq!(ppu.visible_period(), Duration::from_nanos(1_000_000 * 240 / 262));
    }

    #[test]
    fn test_loop_reader_sees_both_phases() {
        let mut memory = MemoryManager::new(Cartridge::default());
        memory.add_chunk(MemoryChunk::new(
            PPUCTRL,
            8,
            MemoryType::Io,
            MemoryOwner::PictureUnit,
            "PPU registers",
        ));
        let memory = Arc::new(memory);
        let mut ppu = PictureUnit::new(
            Arc::clone(&memory),
            Arc::new(PowerHandler::new(PowerState::Run)),
            InterruptRequester::new(Arc::new(InterruptLine::new())),
            Duration::from_millis(100),
        );
        let gate = ppu.gate();
        let worker = thread::spawn(move || ppu.execute());

        let deadline = Instant::now() + Duration::from_secs(2);
        let (mut clear_seen, mut set_seen) = (false, false);
        while Instant::now() < deadline && !(clear_seen && set_seen) {
            let vblank = memory.read_memory(MemoryOwner::Processor, PPUSTATUS) & 0x80 != 0;
            clear_seen |= !vblank;
            set_seen |= vblank;
            thread::sleep(Duration::from_millis(1));
        }
        gate.stop();
        worker.join().unwrap();

        assert!(clear_seen);
        assert!(set_seen);
    }

    #[test]
    fn test_execute_stops() {
        let (mut ppu, _memory, _line) = picture_unit();
        let gate = ppu.gate();
        let worker = thread::spawn(move || {
            ppu.execute();
            ppu.frame_count()
        });
        thread::sleep(Duration::from_millis(20));
        gate.stop();
        assert!(worker.join().unwrap() > 0);
    }
}
