//! Processor-visible register file and status flags

use bitflags::bitflags;
use std::fmt;

/// Base address of the hardware stack page
pub const STACK_PAGE: u16 = 0x0100;

/// Stack pointer value after power-on
pub const INITIAL_SP: u8 = 0xFD;

bitflags! {
    /// Processor status register (P)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct StatusFlags: u8 {
        /// Carry out of bit 7 / no borrow
        const CARRY = 0b0000_0001;
        /// Result was zero
        const ZERO = 0b0000_0010;
        /// Maskable interrupts disabled
        const INTERRUPT_DISABLE = 0b0000_0100;
        /// Decimal mode; stored and restored, never used by the 2A03 ALU
        const DECIMAL = 0b0000_1000;
        /// Set in the copy pushed by BRK/PHP
        const BREAK = 0b0001_0000;
        /// Reads back as 1
        const UNUSED = 0b0010_0000;
        /// Signed overflow
        const OVERFLOW = 0b0100_0000;
        /// Bit 7 of the result
        const NEGATIVE = 0b1000_0000;
    }
}

impl StatusFlags {
    /// Flags after power-on: interrupts disabled, unused bit set
    pub fn power_on() -> Self {
        Self::INTERRUPT_DISABLE | Self::UNUSED
    }

    /// Update Negative and Zero from a result byte
    pub fn update_nz(&mut self, value: u8) {
        self.set(Self::ZERO, value == 0);
        self.set(Self::NEGATIVE, value & 0x80 != 0);
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbols = [
            (Self::NEGATIVE, 'N'),
            (Self::OVERFLOW, 'V'),
            (Self::UNUSED, '-'),
            (Self::BREAK, 'B'),
            (Self::DECIMAL, 'D'),
            (Self::INTERRUPT_DISABLE, 'I'),
            (Self::ZERO, 'Z'),
            (Self::CARRY, 'C'),
        ];
        for (flag, symbol) in symbols {
            let c = if self.contains(flag) {
                symbol
            } else {
                symbol.to_ascii_lowercase()
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// General purpose register selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    A,
    X,
    Y,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::A => "A",
            Register::X => "X",
            Register::Y => "Y",
        };
        f.write_str(name)
    }
}

/// 2A03 register file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Accumulator
    pub a: u8,
    /// X index register
    pub x: u8,
    /// Y index register
    pub y: u8,
    /// Program counter
    pub pc: u16,
    /// Stack pointer (offset into the stack page)
    pub sp: u8,
}

impl Registers {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            sp: INITIAL_SP,
        }
    }

    /// Read a general register
    pub fn get(&self, register: Register) -> u8 {
        match register {
            Register::A => self.a,
            Register::X => self.x,
            Register::Y => self.y,
        }
    }

    /// Write a general register
    pub fn set(&mut self, register: Register, value: u8) {
        match register {
            Register::A => self.a = value,
            Register::X => self.x = value,
            Register::Y => self.y = value,
        }
    }

    /// Absolute address the stack pointer currently designates
    pub fn stack_address(&self) -> u16 {
        STACK_PAGE | self.sp as u16
    }

    /// Pack the register file and a flag byte into one word (used by the
    /// lock-free inspector mirror)
    pub fn pack(&self, flags: StatusFlags) -> u64 {
        self.a as u64
            | (self.x as u64) << 8
            | (self.y as u64) << 16
            | (self.sp as u64) << 24
            | (flags.bits() as u64) << 32
            | (self.pc as u64) << 40
    }

    /// Inverse of [`Registers::pack`]
    pub fn unpack(word: u64) -> (Self, StatusFlags) {
        let registers = Self {
            a: word as u8,
            x: (word >> 8) as u8,
            y: (word >> 16) as u8,
            sp: (word >> 24) as u8,
            pc: (word >> 40) as u16,
        };
        (registers, StatusFlags::from_bits_retain((word >> 32) as u8))
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A:{:02X} X:{:02X} Y:{:02X} PC:{:04X} SP:{:02X}",
            self.a, self.x, self.y, self.pc, self.sp
        )
    }
}
