//! Opcode dispatch table
//!
//! Every one of the 256 opcode values is decoded explicitly. The 151
//! documented 2A03 opcodes carry an operation, addressing mode and base
//! cycle cost; every other value decodes to [`Operation::Invalid`] with a
//! zero cycle cost, which the engine treats as a halt.

use crate::registers::{Register, StatusFlags};
use std::fmt;

/// Operand addressing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
    Relative,
}

impl AddressingMode {
    /// Instruction length in bytes, opcode included
    pub fn length(&self) -> u8 {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 1,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed
            | AddressingMode::Relative => 2,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 3,
        }
    }
}

/// What an opcode does, with its register or flag parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load(Register),
    Store(Register),
    Transfer { from: Register, to: Register },
    /// TSX
    StackToX,
    /// TXS
    XToStack,
    Compare(Register),
    Increment(Register),
    Decrement(Register),
    IncrementMemory,
    DecrementMemory,
    And,
    Or,
    Eor,
    Adc,
    Sbc,
    Bit,
    Asl,
    Lsr,
    Rol,
    Ror,
    /// Taken when `flag` is `set`
    Branch { flag: StatusFlags, set: bool },
    Jmp,
    Jsr,
    Rts,
    Rti,
    Brk,
    PushAccumulator,
    PullAccumulator,
    PushStatus,
    PullStatus,
    SetFlag(StatusFlags),
    ClearFlag(StatusFlags),
    Nop,
    Invalid,
}

/// One dispatch table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub mnemonic: &'static str,
    pub mode: AddressingMode,
    pub operation: Operation,
    /// Base cycle cost; 0 marks an invalid opcode
    pub cycles: u8,
    /// One extra cycle when indexing crosses a page
    pub page_penalty: bool,
}

impl Instruction {
    pub fn is_valid(&self) -> bool {
        self.cycles != 0
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {} {:?}", self.opcode, self.mnemonic, self.mode)
    }
}

/// Materialise the full table
pub fn build_table() -> [Instruction; 256] {
    std::array::from_fn(|opcode| decode(opcode as u8))
}

/// Decode one opcode value
pub fn decode(opcode: u8) -> Instruction {
    use AddressingMode::*;
    use Operation::*;
    use Register::{A, X, Y};

    const C: StatusFlags = StatusFlags::CARRY;
    const Z: StatusFlags = StatusFlags::ZERO;
    const I: StatusFlags = StatusFlags::INTERRUPT_DISABLE;
    const D: StatusFlags = StatusFlags::DECIMAL;
    const V: StatusFlags = StatusFlags::OVERFLOW;
    const N: StatusFlags = StatusFlags::NEGATIVE;

    let (mnemonic, mode, operation, cycles, page_penalty) = match opcode {
        // Loads
        0xA9 => ("LDA", Immediate, Load(A), 2, false),
        0xA5 => ("LDA", ZeroPage, Load(A), 3, false),
        0xB5 => ("LDA", ZeroPageX, Load(A), 4, false),
        0xAD => ("LDA", Absolute, Load(A), 4, false),
        0xBD => ("LDA", AbsoluteX, Load(A), 4, true),
        0xB9 => ("LDA", AbsoluteY, Load(A), 4, true),
        0xA1 => ("LDA", IndexedIndirect, Load(A), 6, false),
        0xB1 => ("LDA", IndirectIndexed, Load(A), 5, true),
        0xA2 => ("LDX", Immediate, Load(X), 2, false),
        0xA6 => ("LDX", ZeroPage, Load(X), 3, false),
        0xB6 => ("LDX", ZeroPageY, Load(X), 4, false),
        0xAE => ("LDX", Absolute, Load(X), 4, false),
        0xBE => ("LDX", AbsoluteY, Load(X), 4, true),
        0xA0 => ("LDY", Immediate, Load(Y), 2, false),
        0xA4 => ("LDY", ZeroPage, Load(Y), 3, false),
        0xB4 => ("LDY", ZeroPageX, Load(Y), 4, false),
        0xAC => ("LDY", Absolute, Load(Y), 4, false),
        0xBC => ("LDY", AbsoluteX, Load(Y), 4, true),

        // Stores
        0x85 => ("STA", ZeroPage, Store(A), 3, false),
        0x95 => ("STA", ZeroPageX, Store(A), 4, false),
        0x8D => ("STA", Absolute, Store(A), 4, false),
        0x9D => ("STA", AbsoluteX, Store(A), 5, false),
        0x99 => ("STA", AbsoluteY, Store(A), 5, false),
        0x81 => ("STA", IndexedIndirect, Store(A), 6, false),
        0x91 => ("STA", IndirectIndexed, Store(A), 6, false),
        0x86 => ("STX", ZeroPage, Store(X), 3, false),
        0x96 => ("STX", ZeroPageY, Store(X), 4, false),
        0x8E => ("STX", Absolute, Store(X), 4, false),
        0x84 => ("STY", ZeroPage, Store(Y), 3, false),
        0x94 => ("STY", ZeroPageX, Store(Y), 4, false),
        0x8C => ("STY", Absolute, Store(Y), 4, false),

        // Transfers
        0xAA => ("TAX", Implied, Transfer { from: A, to: X }, 2, false),
        0xA8 => ("TAY", Implied, Transfer { from: A, to: Y }, 2, false),
        0x8A => ("TXA", Implied, Transfer { from: X, to: A }, 2, false),
        0x98 => ("TYA", Implied, Transfer { from: Y, to: A }, 2, false),
        0xBA => ("TSX", Implied, StackToX, 2, false),
        0x9A => ("TXS", Implied, XToStack, 2, false),

        // Stack
        0x48 => ("PHA", Implied, PushAccumulator, 3, false),
        0x68 => ("PLA", Implied, PullAccumulator, 4, false),
        0x08 => ("PHP", Implied, PushStatus, 3, false),
        0x28 => ("PLP", Implied, PullStatus, 4, false),

        // Logic
        0x29 => ("AND", Immediate, And, 2, false),
        0x25 => ("AND", ZeroPage, And, 3, false),
        0x35 => ("AND", ZeroPageX, And, 4, false),
        0x2D => ("AND", Absolute, And, 4, false),
        0x3D => ("AND", AbsoluteX, And, 4, true),
        0x39 => ("AND", AbsoluteY, And, 4, true),
        0x21 => ("AND", IndexedIndirect, And, 6, false),
        0x31 => ("AND", IndirectIndexed, And, 5, true),
        0x09 => ("ORA", Immediate, Or, 2, false),
        0x05 => ("ORA", ZeroPage, Or, 3, false),
        0x15 => ("ORA", ZeroPageX, Or, 4, false),
        0x0D => ("ORA", Absolute, Or, 4, false),
        0x1D => ("ORA", AbsoluteX, Or, 4, true),
        0x19 => ("ORA", AbsoluteY, Or, 4, true),
        0x01 => ("ORA", IndexedIndirect, Or, 6, false),
        0x11 => ("ORA", IndirectIndexed, Or, 5, true),
        0x49 => ("EOR", Immediate, Eor, 2, false),
        0x45 => ("EOR", ZeroPage, Eor, 3, false),
        0x55 => ("EOR", ZeroPageX, Eor, 4, false),
        0x4D => ("EOR", Absolute, Eor, 4, false),
        0x5D => ("EOR", AbsoluteX, Eor, 4, true),
        0x59 => ("EOR", AbsoluteY, Eor, 4, true),
        0x41 => ("EOR", IndexedIndirect, Eor, 6, false),
        0x51 => ("EOR", IndirectIndexed, Eor, 5, true),
        0x24 => ("BIT", ZeroPage, Bit, 3, false),
        0x2C => ("BIT", Absolute, Bit, 4, false),

        // Arithmetic
        0x69 => ("ADC", Immediate, Adc, 2, false),
        0x65 => ("ADC", ZeroPage, Adc, 3, false),
        0x75 => ("ADC", ZeroPageX, Adc, 4, false),
        0x6D => ("ADC", Absolute, Adc, 4, false),
        0x7D => ("ADC", AbsoluteX, Adc, 4, true),
        0x79 => ("ADC", AbsoluteY, Adc, 4, true),
        0x61 => ("ADC", IndexedIndirect, Adc, 6, false),
        0x71 => ("ADC", IndirectIndexed, Adc, 5, true),
        0xE9 => ("SBC", Immediate, Sbc, 2, false),
        0xE5 => ("SBC", ZeroPage, Sbc, 3, false),
        0xF5 => ("SBC", ZeroPageX, Sbc, 4, false),
        0xED => ("SBC", Absolute, Sbc, 4, false),
        0xFD => ("SBC", AbsoluteX, Sbc, 4, true),
        0xF9 => ("SBC", AbsoluteY, Sbc, 4, true),
        0xE1 => ("SBC", IndexedIndirect, Sbc, 6, false),
        0xF1 => ("SBC", IndirectIndexed, Sbc, 5, true),

        // Compares
        0xC9 => ("CMP", Immediate, Compare(A), 2, false),
        0xC5 => ("CMP", ZeroPage, Compare(A), 3, false),
        0xD5 => ("CMP", ZeroPageX, Compare(A), 4, false),
        0xCD => ("CMP", Absolute, Compare(A), 4, false),
        0xDD => ("CMP", AbsoluteX, Compare(A), 4, true),
        0xD9 => ("CMP", AbsoluteY, Compare(A), 4, true),
        0xC1 => ("CMP", IndexedIndirect, Compare(A), 6, false),
        0xD1 => ("CMP", IndirectIndexed, Compare(A), 5, true),
        0xE0 => ("CPX", Immediate, Compare(X), 2, false),
        0xE4 => ("CPX", ZeroPage, Compare(X), 3, false),
        0xEC => ("CPX", Absolute, Compare(X), 4, false),
        0xC0 => ("CPY", Immediate, Compare(Y), 2, false),
        0xC4 => ("CPY", ZeroPage, Compare(Y), 3, false),
        0xCC => ("CPY", Absolute, Compare(Y), 4, false),

        // Increments and decrements
        0xE6 => ("INC", ZeroPage, IncrementMemory, 5, false),
        0xF6 => ("INC", ZeroPageX, IncrementMemory, 6, false),
        0xEE => ("INC", Absolute, IncrementMemory, 6, false),
        0xFE => ("INC", AbsoluteX, IncrementMemory, 7, false),
        0xC6 => ("DEC", ZeroPage, DecrementMemory, 5, false),
        0xD6 => ("DEC", ZeroPageX, DecrementMemory, 6, false),
        0xCE => ("DEC", Absolute, DecrementMemory, 6, false),
        0xDE => ("DEC", AbsoluteX, DecrementMemory, 7, false),
        0xE8 => ("INX", Implied, Increment(X), 2, false),
        0xC8 => ("INY", Implied, Increment(Y), 2, false),
        0xCA => ("DEX", Implied, Decrement(X), 2, false),
        0x88 => ("DEY", Implied, Decrement(Y), 2, false),

        // Shifts and rotates
        0x0A => ("ASL", Accumulator, Asl, 2, false),
        0x06 => ("ASL", ZeroPage, Asl, 5, false),
        0x16 => ("ASL", ZeroPageX, Asl, 6, false),
        0x0E => ("ASL", Absolute, Asl, 6, false),
        0x1E => ("ASL", AbsoluteX, Asl, 7, false),
        0x4A => ("LSR", Accumulator, Lsr, 2, false),
        0x46 => ("LSR", ZeroPage, Lsr, 5, false),
        0x56 => ("LSR", ZeroPageX, Lsr, 6, false),
        0x4E => ("LSR", Absolute, Lsr, 6, false),
        0x5E => ("LSR", AbsoluteX, Lsr, 7, false),
        0x2A => ("ROL", Accumulator, Rol, 2, false),
        0x26 => ("ROL", ZeroPage, Rol, 5, false),
        0x36 => ("ROL", ZeroPageX, Rol, 6, false),
        0x2E => ("ROL", Absolute, Rol, 6, false),
        0x3E => ("ROL", AbsoluteX, Rol, 7, false),
        0x6A => ("ROR", Accumulator, Ror, 2, false),
        0x66 => ("ROR", ZeroPage, Ror, 5, false),
        0x76 => ("ROR", ZeroPageX, Ror, 6, false),
        0x6E => ("ROR", Absolute, Ror, 6, false),
        0x7E => ("ROR", AbsoluteX, Ror, 7, false),

        // Jumps and subroutines
        0x4C => ("JMP", Absolute, Jmp, 3, false),
        0x6C => ("JMP", Indirect, Jmp, 5, false),
        0x20 => ("JSR", Absolute, Jsr, 6, false),
        0x60 => ("RTS", Implied, Rts, 6, false),
        0x40 => ("RTI", Implied, Rti, 6, false),
        0x00 => ("BRK", Implied, Brk, 7, false),

        // Branches
        0x10 => ("BPL", Relative, Branch { flag: N, set: false }, 2, false),
        0x30 => ("BMI", Relative, Branch { flag: N, set: true }, 2, false),
        0x50 => ("BVC", Relative, Branch { flag: V, set: false }, 2, false),
        0x70 => ("BVS", Relative, Branch { flag: V, set: true }, 2, false),
        0x90 => ("BCC", Relative, Branch { flag: C, set: false }, 2, false),
        0xB0 => ("BCS", Relative, Branch { flag: C, set: true }, 2, false),
        0xD0 => ("BNE", Relative, Branch { flag: Z, set: false }, 2, false),
        0xF0 => ("BEQ", Relative, Branch { flag: Z, set: true }, 2, false),

        // Flag changes
        0x18 => ("CLC", Implied, ClearFlag(C), 2, false),
        0x38 => ("SEC", Implied, SetFlag(C), 2, false),
        0x58 => ("CLI", Implied, ClearFlag(I), 2, false),
        0x78 => ("SEI", Implied, SetFlag(I), 2, false),
        0xB8 => ("CLV", Implied, ClearFlag(V), 2, false),
        0xD8 => ("CLD", Implied, ClearFlag(D), 2, false),
        0xF8 => ("SED", Implied, SetFlag(D), 2, false),

        0xEA => ("NOP", Implied, Nop, 2, false),

        // Undocumented
        0x02 | 0x03 | 0x04 | 0x07 | 0x0B | 0x0C | 0x0F | 0x12
        | 0x13 | 0x14 | 0x17 | 0x1A | 0x1B | 0x1C | 0x1F | 0x22
        | 0x23 | 0x27 | 0x2B | 0x2F | 0x32 | 0x33 | 0x34 | 0x37
        | 0x3A | 0x3B | 0x3C | 0x3F | 0x42 | 0x43 | 0x44 | 0x47
        | 0x4B | 0x4F | 0x52 | 0x53 | 0x54 | 0x57 | 0x5A | 0x5B
        | 0x5C | 0x5F | 0x62 | 0x63 | 0x64 | 0x67 | 0x6B | 0x6F
        | 0x72 | 0x73 | 0x74 | 0x77 | 0x7A | 0x7B | 0x7C | 0x7F
        | 0x80 | 0x82 | 0x83 | 0x87 | 0x89 | 0x8B | 0x8F | 0x92
        | 0x93 | 0x97 | 0x9B | 0x9C | 0x9E | 0x9F | 0xA3 | 0xA7
        | 0xAB | 0xAF | 0xB2 | 0xB3 | 0xB7 | 0xBB | 0xBF | 0xC2
        | 0xC3 | 0xC7 | 0xCB | 0xCF | 0xD2 | 0xD3 | 0xD4 | 0xD7
        | 0xDA | 0xDB | 0xDC | 0xDF | 0xE2 | 0xE3 | 0xE7 | 0xEB
        | 0xEF | 0xF2 | 0xF3 | 0xF4 | 0xF7 | 0xFA | 0xFB | 0xFC
        | 0xFF => ("???", Implied, Invalid, 0, false),
    };

    Instruction {
        opcode,
        mnemonic,
        mode,
        operation,
        cycles,
        page_penalty,
    }
}
