//! APU (Audio Processing Unit) stub
//!
//! Sound synthesis is not modelled. The unit owns a small RAM chunk at
//! `$0000` of its own space that receives the audio DMA burst, and its loop
//! takes part in the run/suspend protocol like the other two.

use crate::bus::{MemoryManager, MemoryOwner};
use crate::power::{PowerHandler, RunGate};
use log::{info, trace};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Audio RAM size
pub const AUDIO_RAM_SIZE: u32 = 16;

/// APU state
pub struct AudioUnit {
    memory: Arc<MemoryManager>,
    power: Arc<PowerHandler>,
    gate: Arc<RunGate>,
    /// Sleep between ticks
    period: Duration,
    /// Loop iterations so far
    ticks: u64,
}

impl AudioUnit {
    /// Create a new APU instance
    pub fn new(memory: Arc<MemoryManager>, power: Arc<PowerHandler>, period: Duration) -> Self {
        Self {
            memory,
            power,
            gate: Arc::new(RunGate::new()),
            period,
            ticks: 0,
        }
    }

    pub fn gate(&self) -> Arc<RunGate> {
        Arc::clone(&self.gate)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One byte of audio RAM
    pub fn sample(&self, offset: u16) -> u8 {
        self.memory.read_memory(MemoryOwner::AudioUnit, offset)
    }

    pub fn tick(&mut self) {
        self.ticks += 1;
        trace!("APU tick {} [{:02X} {:02X}]", self.ticks, self.sample(0), self.sample(1));
    }

    /// Tick until the gate is stopped
    pub fn execute(&mut self) {
        info!("APU started");
        while self.gate.wait_for_permission(&self.power) {
            self.tick();
            thread::sleep(self.period);
        }
        info!("APU stopped after {} ticks", self.ticks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryChunk, MemoryType};
    use crate::cartridge::Cartridge;
    use crate::power::PowerState;

    #[test]
    fn test_audio_dma_lands_in_ram() {
        let mut memory = MemoryManager::new(Cartridge::default());
        memory.add_chunk(MemoryChunk::new(0x0000, 0x0800, MemoryType::Ram, MemoryOwner::Processor, "RAM"));
        memory.add_chunk(MemoryChunk::new(
            0x0000,
            AUDIO_RAM_SIZE,
            MemoryType::Ram,
            MemoryOwner::AudioUnit,
            "audio RAM",
        ));
        memory.write_memory(MemoryOwner::Processor, 0x0300, 0xAB);
        memory.write_memory(MemoryOwner::Processor, 0x0301, 0xCD);

        let memory = Arc::new(memory);
        assert_eq!(memory.write_memory(MemoryOwner::Processor, 0x4015, 0x03), 4);

        let apu = AudioUnit::new(memory, Arc::new(PowerHandler::new(PowerState::Run)), Duration::ZERO);
        assert_eq!(apu.sample(0), 0xAB);
        assert_eq!(apu.sample(1), 0xCD);
    }

    #[test]
    fn test_suspended_loop_does_not_tick() {
        let memory = Arc::new(MemoryManager::new(Cartridge::default()));
        let power = Arc::new(PowerHandler::new(PowerState::Suspended));
        let mut apu = AudioUnit::new(memory, power, Duration::from_millis(1));
        let gate = apu.gate();

        let worker = thread::spawn(move || {
            apu.execute();
            apu.ticks()
        });
        thread::sleep(Duration::from_millis(20));
        gate.stop();
        assert_eq!(worker.join().unwrap(), 0);
    }
}
