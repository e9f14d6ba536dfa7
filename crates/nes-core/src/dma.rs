//! Fixed DMA channels
//!
//! A one-byte write to a trigger address copies a burst from processor
//! page `value << 8` into the target owner's space starting at offset 0.
//! The burst completes synchronously and the writer is stalled.

use crate::bus::MemoryOwner;

/// One burst-copy channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannel {
    /// Processor address whose write starts the burst
    pub trigger: u16,
    /// Owner whose space receives the bytes
    pub target: MemoryOwner,
    /// Bytes copied per burst
    pub length: u16,
    /// Cycles charged to the writer
    pub stall_cycles: u32,
}

/// Sprite attribute memory burst
pub const OAM_DMA: DmaChannel = DmaChannel {
    trigger: 0x4014,
    target: MemoryOwner::PictureUnit,
    length: 256,
    stall_cycles: 514,
};

/// Audio unit burst
pub const APU_DMA: DmaChannel = DmaChannel {
    trigger: 0x4015,
    target: MemoryOwner::AudioUnit,
    length: 2,
    stall_cycles: 4,
};

static CHANNELS: [DmaChannel; 2] = [OAM_DMA, APU_DMA];

impl DmaChannel {
    /// Channel triggered by a write to `address`
    pub fn for_trigger(address: u16) -> Option<&'static DmaChannel> {
        CHANNELS.iter().find(|channel| channel.trigger == address)
    }

    /// Channel delivering into `owner`'s space
    pub fn for_target(owner: MemoryOwner) -> Option<&'static DmaChannel> {
        CHANNELS.iter().find(|channel| channel.target == owner)
    }

    /// Processor address of byte `index` of a burst from page `high`
    pub fn source_address(high: u8, index: u16) -> u16 {
        ((high as u16) << 8).wrapping_add(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_lookup() {
        assert_eq!(DmaChannel::for_trigger(0x4014), Some(&OAM_DMA));
        assert_eq!(DmaChannel::for_trigger(0x4015), Some(&APU_DMA));
        assert_eq!(DmaChannel::for_trigger(0x4016), None);
        assert_eq!(
            DmaChannel::for_target(MemoryOwner::AudioUnit).map(|c| c.length),
            Some(2)
        );
        assert_eq!(DmaChannel::for_target(MemoryOwner::Processor), None);
    }

    #[test]
    fn test_source_address_wraps() {
        assert_eq!(DmaChannel::source_address(0x02, 0x10), 0x0210);
        assert_eq!(DmaChannel::source_address(0xFF, 0x100), 0x0000);
    }
}
