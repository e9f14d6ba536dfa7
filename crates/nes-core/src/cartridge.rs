//! Cartridge images
//!
//! Decodes an iNES file into the program/character ROM pair the address
//! space serves, plus the attribute record carried in the header flags.

use crate::clock::{NTSC_CPU_FREQUENCY, PAL_CPU_FREQUENCY};
use crate::memory::Rom;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// iNES header size
pub const HEADER_SIZE: usize = 16;

/// Trainer block size, present when flags 6 bit 2 is set
pub const TRAINER_SIZE: usize = 512;

/// Program ROM bank unit
pub const PRG_BANK_SIZE: usize = 16 * 1024;

/// Character ROM bank unit
pub const CHR_BANK_SIZE: usize = 8 * 1024;

const MAGIC: [u8; 4] = [b'N', b'E', b'S', 0x1A];

/// Cartridge error types
#[derive(Error, Debug)]
pub enum CartridgeError {
    #[error("image is {0} bytes, shorter than the iNES header")]
    TooShort(usize),
    #[error("invalid iNES signature {0:02X?}")]
    InvalidMagic([u8; 4]),
    #[error("image truncated: {section} needs {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        section: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("failed to read cartridge: {0}")]
    Io(#[from] std::io::Error),
}

/// Nametable arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mirroring {
    #[default]
    Horizontal,
    Vertical,
    FourScreen,
}

/// Video standard the image targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TvSystem {
    #[default]
    Ntsc,
    Pal,
}

impl TvSystem {
    /// Processor clock of the matching console
    pub fn cpu_frequency(&self) -> u32 {
        match self {
            TvSystem::Ntsc => NTSC_CPU_FREQUENCY,
            TvSystem::Pal => PAL_CPU_FREQUENCY,
        }
    }
}

/// iNES header structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InesHeader {
    /// PRG ROM size in 16KB units
    pub prg_rom_banks: u8,
    /// CHR ROM size in 8KB units
    pub chr_rom_banks: u8,
    /// Flags 6
    pub flags_6: u8,
    /// Flags 7
    pub flags_7: u8,
    /// PRG RAM size in 8KB units
    pub prg_ram_banks: u8,
    /// Flags 9
    pub flags_9: u8,
    /// Flags 10
    pub flags_10: u8,
}

impl InesHeader {
    /// Parse an iNES header from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CartridgeError::TooShort(bytes.len()));
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MAGIC {
            return Err(CartridgeError::InvalidMagic(magic));
        }

        Ok(Self {
            prg_rom_banks: bytes[4],
            chr_rom_banks: bytes[5],
            flags_6: bytes[6],
            flags_7: bytes[7],
            prg_ram_banks: bytes[8],
            flags_9: bytes[9],
            flags_10: bytes[10],
        })
    }

    /// Mapper number, low nibble from flags 6 and high nibble from flags 7
    pub fn mapper_number(&self) -> u8 {
        (self.flags_7 & 0xF0) | (self.flags_6 >> 4)
    }

    pub fn mirroring(&self) -> Mirroring {
        if self.flags_6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if self.flags_6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }

    /// Battery-backed PRG RAM present
    pub fn has_prg_ram(&self) -> bool {
        (self.flags_6 & 0x02) != 0
    }

    pub fn has_trainer(&self) -> bool {
        (self.flags_6 & 0x04) != 0
    }

    pub fn is_nes2(&self) -> bool {
        (self.flags_7 & 0x0C) == 0x08
    }

    pub fn tv_system(&self) -> TvSystem {
        if self.flags_9 & 0x01 != 0 {
            TvSystem::Pal
        } else {
            TvSystem::Ntsc
        }
    }

    pub fn prg_rom_size(&self) -> usize {
        self.prg_rom_banks as usize * PRG_BANK_SIZE
    }

    pub fn chr_rom_size(&self) -> usize {
        self.chr_rom_banks as usize * CHR_BANK_SIZE
    }

    pub fn attributes(&self) -> CartridgeAttributes {
        CartridgeAttributes {
            mapper: self.mapper_number(),
            mirroring: self.mirroring(),
            has_prg_ram: self.has_prg_ram(),
            has_trainer: self.has_trainer(),
            nes2: self.is_nes2(),
            tv_system: self.tv_system(),
        }
    }
}

/// Flags record decoded from the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CartridgeAttributes {
    pub mapper: u8,
    pub mirroring: Mirroring,
    pub has_prg_ram: bool,
    pub has_trainer: bool,
    pub nes2: bool,
    pub tv_system: TvSystem,
}

/// Decoded cartridge: program image, character image and attributes
#[derive(Debug, Clone, Default)]
pub struct Cartridge {
    program: Rom,
    character: Rom,
    attributes: CartridgeAttributes,
    trainer: Option<Vec<u8>>,
}

impl Cartridge {
    /// Build a cartridge from already-decoded buffers
    pub fn from_parts(program: Vec<u8>, character: Vec<u8>, attributes: CartridgeAttributes) -> Self {
        Self {
            program: Rom::new(program),
            character: Rom::new(character),
            attributes,
            trainer: None,
        }
    }

    /// Create a new cartridge from iNES ROM data
    pub fn from_rom(rom_data: &[u8]) -> Result<Self, CartridgeError> {
        let header = InesHeader::parse(rom_data)?;
        let mut offset = HEADER_SIZE;

        let trainer = if header.has_trainer() {
            let data = slice(rom_data, "trainer", offset, TRAINER_SIZE)?;
            offset += TRAINER_SIZE;
            Some(data.to_vec())
        } else {
            None
        };

        let prg_size = header.prg_rom_size();
        let program = slice(rom_data, "program ROM", offset, prg_size)?;
        offset += prg_size;

        let character = slice(rom_data, "character ROM", offset, header.chr_rom_size())?;

        let attributes = header.attributes();
        log::info!(
            "Cartridge: PRG {} KB, CHR {} KB, mapper {}, {:?} mirroring, trainer {}, PRG RAM {}, NES 2.0 {}, {:?}",
            program.len() / 1024,
            character.len() / 1024,
            attributes.mapper,
            attributes.mirroring,
            attributes.has_trainer,
            attributes.has_prg_ram,
            attributes.nes2,
            attributes.tv_system,
        );

        Ok(Self {
            program: Rom::new(program.to_vec()),
            character: Rom::new(character.to_vec()),
            attributes,
            trainer,
        })
    }

    /// Read and decode an iNES file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        let data = fs::read(path)?;
        Self::from_rom(&data)
    }

    /// Program image, read by the processor
    pub fn program_rom(&self) -> &Rom {
        &self.program
    }

    /// Character image, read by the picture unit
    pub fn character_rom(&self) -> &Rom {
        &self.character
    }

    pub fn attributes(&self) -> &CartridgeAttributes {
        &self.attributes
    }

    pub fn trainer(&self) -> Option<&[u8]> {
        self.trainer.as_deref()
    }
}

fn slice<'a>(
    data: &'a [u8],
    section: &'static str,
    offset: usize,
    needed: usize,
) -> Result<&'a [u8], CartridgeError> {
    data.get(offset..offset + needed)
        .ok_or(CartridgeError::Truncated {
            section,
            offset,
            needed,
            available: data.len().saturating_sub(offset),
        })
}
