//! Owner-tagged address space
//!
//! The address space is an ordered list of chunks. Each chunk declares a
//! start, a size, a backing type and an owner:
//!
//! - IO chunks are shared mailboxes: every owner reaches them.
//! - RAM chunks serve only their declared owner.
//! - ROM chunks redirect into the cartridge: the processor reads the
//!   program image, the picture unit reads the character image.
//!
//! Several owners can map different stores at the same address (the
//! picture unit's OAM lives at `$0000` in its own space). The first chunk,
//! in registration order, that contains the address and accepts the
//! requester serves the access.

use crate::cartridge::Cartridge;
use crate::cpu::Bus as CpuBus;
use crate::dma::DmaChannel;
use crate::memory::{MemoryError, Ram, Rom};
use log::{debug, warn};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Backing store type of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Rom,
    Ram,
    Io,
}

/// Component on whose behalf an access is made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOwner {
    Processor,
    PictureUnit,
    AudioUnit,
    Cartridge,
}

impl fmt::Display for MemoryOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryOwner::Processor => "processor",
            MemoryOwner::PictureUnit => "picture unit",
            MemoryOwner::AudioUnit => "audio unit",
            MemoryOwner::Cartridge => "cartridge",
        };
        f.write_str(name)
    }
}

/// Registered address range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
    /// First address
    pub start: u16,
    /// Length in bytes; up to 0x10000 so a chunk can cover $FFFF
    pub size: u32,
    /// Identity assigned at registration, starting at 1
    pub id: u8,
    pub kind: MemoryType,
    pub owner: MemoryOwner,
    pub name: String,
}

impl MemoryChunk {
    pub fn new(
        start: u16,
        size: u32,
        kind: MemoryType,
        owner: MemoryOwner,
        name: impl Into<String>,
    ) -> Self {
        Self {
            start,
            size,
            id: 0,
            kind,
            owner,
            name: name.into(),
        }
    }

    pub fn contains(&self, address: u16) -> bool {
        let address = address as u32;
        let start = self.start as u32;
        address >= start && address < start + self.size
    }

    /// Offset of `address` inside the chunk
    pub fn offset(&self, address: u16) -> u16 {
        address.wrapping_sub(self.start)
    }
}

/// A chunk plus its private store (none for ROM chunks)
#[derive(Debug)]
struct Region {
    chunk: MemoryChunk,
    ram: Option<Ram>,
}

/// Address-space router
#[derive(Debug)]
pub struct MemoryManager {
    regions: Vec<Region>,
    cartridge: Cartridge,
    /// Stand-in byte for unmapped accesses
    sentinel: AtomicU8,
}

impl MemoryManager {
    /// Create an empty address space backed by `cartridge`
    pub fn new(cartridge: Cartridge) -> Self {
        Self {
            regions: Vec::new(),
            cartridge,
            sentinel: AtomicU8::new(0),
        }
    }

    /// Register a chunk and allocate its store; returns the chunk id.
    ///
    /// Ids run from 1 to 255. Once they are exhausted the chunk is not
    /// registered and 0 is returned.
    pub fn add_chunk(&mut self, mut chunk: MemoryChunk) -> u8 {
        let Some(id) = u8::try_from(self.regions.len())
            .ok()
            .and_then(|count| count.checked_add(1))
        else {
            warn!(
                "Chunk '{}' not registered: all {} ids in use",
                chunk.name,
                u8::MAX
            );
            return 0;
        };
        chunk.id = id;
        let ram = match chunk.kind {
            MemoryType::Ram | MemoryType::Io => Some(Ram::new(chunk.size as usize)),
            MemoryType::Rom => None,
        };
        debug!(
            "Chunk {} '{}': {:?} {:#06X}+{:#X} owned by {}",
            id, chunk.name, chunk.kind, chunk.start, chunk.size, chunk.owner
        );
        self.regions.push(Region { chunk, ram });
        id
    }

    /// Registered chunks, in routing order
    pub fn chunks(&self) -> impl Iterator<Item = &MemoryChunk> + '_ {
        self.regions.iter().map(|region| &region.chunk)
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    /// Read one byte on behalf of `owner`
    pub fn read_memory(&self, owner: MemoryOwner, address: u16) -> u8 {
        let Some(region) = self.route(owner, address) else {
            warn!("Unmapped read by {} at {:#06X}", owner, address);
            return self.sentinel.load(Ordering::Relaxed);
        };

        let offset = region.chunk.offset(address);
        let result = match &region.ram {
            Some(ram) => ram.read(offset),
            None => match self.image_for(owner) {
                Some(rom) => rom.read(offset),
                None => Ok(self.sentinel.load(Ordering::Relaxed)),
            },
        };
        result.unwrap_or_else(|e| self.fault(&region.chunk, e))
    }

    /// Write one byte on behalf of `owner`.
    ///
    /// Returns the stall cycles charged to the writer: non-zero only for a
    /// DMA trigger, which also stores the value like a normal write.
    pub fn write_memory(&self, owner: MemoryOwner, address: u16, value: u8) -> u32 {
        let stall = match DmaChannel::for_trigger(address) {
            Some(channel) => self.dma_transfer(channel.target, value),
            None => 0,
        };
        self.store(owner, address, value);
        stall
    }

    /// Copy a burst from processor page `high` into `target`'s space.
    ///
    /// Returns the stall cost of the channel, or 0 when `target` has none.
    pub fn dma_transfer(&self, target: MemoryOwner, high: u8) -> u32 {
        let Some(channel) = DmaChannel::for_target(target) else {
            warn!("No DMA channel delivers to {}", target);
            return 0;
        };

        debug!(
            "DMA {:#06X}..+{} -> {} $0000",
            DmaChannel::source_address(high, 0),
            channel.length,
            target
        );
        for index in 0..channel.length {
            let byte = self.read_memory(
                MemoryOwner::Processor,
                DmaChannel::source_address(high, index),
            );
            self.store(target, index, byte);
        }
        channel.stall_cycles
    }

    /// Direct handle to an IO cell; unmapped addresses get the sentinel
    pub fn io_address_handle(&self, address: u16) -> &AtomicU8 {
        self.io_cell(address).unwrap_or_else(|| {
            warn!("No IO register at {:#06X}", address);
            &self.sentinel
        })
    }

    /// Cell of the first IO chunk containing `address`
    fn io_cell(&self, address: u16) -> Option<&AtomicU8> {
        let region = self
            .regions
            .iter()
            .find(|region| region.chunk.kind == MemoryType::Io && region.chunk.contains(address))?;
        region.ram.as_ref()?.cell(region.chunk.offset(address)).ok()
    }

    fn store(&self, owner: MemoryOwner, address: u16, value: u8) {
        let Some(region) = self.route(owner, address) else {
            warn!(
                "Unmapped write by {} at {:#06X} ({:#04X})",
                owner, address, value
            );
            self.sentinel.store(value, Ordering::Relaxed);
            return;
        };

        match &region.ram {
            Some(ram) => {
                if let Err(e) = ram.write(region.chunk.offset(address), value) {
                    self.fault(&region.chunk, e);
                    self.sentinel.store(value, Ordering::Relaxed);
                }
            }
            None => debug!(
                "Ignored write to ROM '{}' at {:#06X}",
                region.chunk.name, address
            ),
        }
    }

    /// First region that contains `address` and serves `owner`
    fn route(&self, owner: MemoryOwner, address: u16) -> Option<&Region> {
        self.regions
            .iter()
            .find(|region| region.chunk.contains(address) && self.accepts(&region.chunk, owner))
    }

    fn accepts(&self, chunk: &MemoryChunk, owner: MemoryOwner) -> bool {
        match chunk.kind {
            MemoryType::Io => true,
            MemoryType::Ram => chunk.owner == owner,
            MemoryType::Rom => {
                (chunk.owner == owner || chunk.owner == MemoryOwner::Cartridge)
                    && self.image_for(owner).is_some()
            }
        }
    }

    /// Cartridge image a requester sees through a ROM chunk
    fn image_for(&self, owner: MemoryOwner) -> Option<&Rom> {
        match owner {
            MemoryOwner::Processor => Some(self.cartridge.program_rom()),
            MemoryOwner::PictureUnit => Some(self.cartridge.character_rom()),
            MemoryOwner::AudioUnit | MemoryOwner::Cartridge => None,
        }
    }

    fn fault(&self, chunk: &MemoryChunk, error: MemoryError) -> u8 {
        warn!("Access to '{}' failed: {}", chunk.name, error);
        self.sentinel.load(Ordering::Relaxed)
    }
}

impl CpuBus for MemoryManager {
    fn read(&self, address: u16) -> u8 {
        self.read_memory(MemoryOwner::Processor, address)
    }

    fn write(&self, address: u16, value: u8) -> u32 {
        self.write_memory(MemoryOwner::Processor, address, value)
    }

    /// Silently dropped when no IO chunk maps `address`
    fn publish(&self, address: u16, value: u8) {
        if let Some(cell) = self.io_cell(address) {
            cell.store(value, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::CartridgeAttributes;

    fn cartridge() -> Cartridge {
        Cartridge::from_parts(
            vec![0xEA, 0x01, 0x02],
            vec![0xC0, 0xC1],
            CartridgeAttributes::default(),
        )
    }

    fn manager() -> MemoryManager {
        let mut memory = MemoryManager::new(cartridge());
        memory.add_chunk(MemoryChunk::new(
            0x0000,
            0x0800,
            MemoryType::Ram,
            MemoryOwner::Processor,
            "cpu ram",
        ));
        memory.add_chunk(MemoryChunk::new(
            0x2000,
            8,
            MemoryType::Io,
            MemoryOwner::PictureUnit,
            "ppu io",
        ));
        memory.add_chunk(MemoryChunk::new(
            0x0000,
            0x100,
            MemoryType::Ram,
            MemoryOwner::PictureUnit,
            "oam",
        ));
        memory.add_chunk(MemoryChunk::new(
            0x8000,
            0x8000,
            MemoryType::Rom,
            MemoryOwner::Cartridge,
            "prg",
        ));
        memory
    }

    #[test]
    fn test_chunk_ids() {
        let memory = manager();
        let ids: Vec<u8> = memory.chunks().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_chunk_contains_top_of_space() {
        let chunk = MemoryChunk::new(0x8000, 0x8000, MemoryType::Rom, MemoryOwner::Cartridge, "prg");
        assert!(chunk.contains(0xFFFF));
        assert!(!chunk.contains(0x7FFF));
        assert_eq!(chunk.offset(0x8002), 2);
    }

    #[test]
    fn test_ram_is_owner_private() {
        let memory = manager();
        memory.write_memory(MemoryOwner::Processor, 0x0010, 0x11);
        memory.write_memory(MemoryOwner::PictureUnit, 0x0010, 0x22);
        assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x0010), 0x11);
        assert_eq!(memory.read_memory(MemoryOwner::PictureUnit, 0x0010), 0x22);
    }

    #[test]
    fn test_io_is_shared() {
        let memory = manager();
        memory.write_memory(MemoryOwner::Processor, 0x2000, 0x80);
        assert_eq!(memory.read_memory(MemoryOwner::PictureUnit, 0x2000), 0x80);
        assert_eq!(memory.io_address_handle(0x2000).load(Ordering::Relaxed), 0x80);
    }

    #[test]
    fn test_rom_redirects_by_owner() {
        let memory = manager();
        assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x8001), 0x01);
        assert_eq!(memory.read_memory(MemoryOwner::PictureUnit, 0x8001), 0xC1);
    }

    #[test]
    fn test_rom_write_ignored() {
        let memory = manager();
        assert_eq!(memory.write_memory(MemoryOwner::Processor, 0x8000, 0x55), 0);
        assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x8000), 0xEA);
    }

    #[test]
    fn test_unmapped_uses_sentinel() {
        let memory = manager();
        assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x5000), 0);
        memory.write_memory(MemoryOwner::AudioUnit, 0x0000, 0x33);
        assert_eq!(memory.read_memory(MemoryOwner::AudioUnit, 0x0000), 0x33);
    }

    #[test]
    fn test_rom_past_image_end_uses_sentinel() {
        let memory = manager();
        assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x9000), 0);
    }

    #[test]
    fn test_oam_dma() {
        let memory = manager();
        for i in 0..256u16 {
            memory.write_memory(MemoryOwner::Processor, 0x0200 + i, i as u8);
        }
        assert_eq!(memory.dma_transfer(MemoryOwner::PictureUnit, 0x02), 514);
        assert_eq!(memory.read_memory(MemoryOwner::PictureUnit, 0x00FF), 0xFF);
        assert_eq!(memory.read_memory(MemoryOwner::PictureUnit, 0x0042), 0x42);
    }

    #[test]
    fn test_dma_without_channel() {
        let memory = manager();
        assert_eq!(memory.dma_transfer(MemoryOwner::Processor, 0x02), 0);
    }

    #[test]
    fn test_io_handle_unmapped() {
        let memory = manager();
        let cell = memory.io_address_handle(0x4016);
        cell.store(0x7F, Ordering::Relaxed);
        assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x5000), 0x7F);
    }

    #[test]
    fn test_publish_without_io_keeps_sentinel() {
        let memory = manager();
        CpuBus::publish(&memory, 0x4016, 0x7F);
        assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x5000), 0);

        CpuBus::publish(&memory, 0x2002, 0x80);
        assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x2002), 0x80);
    }

    #[test]
    fn test_chunk_ids_exhausted() {
        let mut memory = MemoryManager::new(Cartridge::default());
        for i in 0..255u16 {
            let id = memory.add_chunk(MemoryChunk::new(i, 1, MemoryType::Ram, MemoryOwner::Processor, "cell"));
            assert_eq!(id as u16, i + 1);
        }
        let overflow = MemoryChunk::new(0x1000, 1, MemoryType::Ram, MemoryOwner::Processor, "overflow");
        assert_eq!(memory.add_chunk(overflow), 0);
        assert_eq!(memory.chunks().count(), 255);
        assert!(memory.chunks().all(|chunk| chunk.name != "overflow"));
    }
}
