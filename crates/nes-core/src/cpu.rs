//! CPU module - 2A03 (6502 variant) execution engine
//!
//! The engine owns its register file, a 256-entry dispatch table and the
//! NMI state machine. Memory is reached only through [`Bus`]. The run loop
//! is gated by the shared [`PowerHandler`] and paced per instruction by a
//! [`Pacer`].
//!
//! The NES uses a modified 6502 without decimal mode: the D flag is stored
//! and restored but ADC/SBC are always binary.

use crate::clock::Pacer;
use crate::controller::Controller;
use crate::dispatch::{self, AddressingMode, Instruction, Operation};
use crate::interrupt::{InterruptLine, InterruptRequester};
use crate::power::{PowerHandler, PowerState, RunGate};
use crate::registers::{Registers, StatusFlags};
use log::{debug, error, info, trace};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// NMI vector
pub const NMI_VECTOR: u16 = 0xFFFA;

/// Reset vector
pub const RESET_VECTOR: u16 = 0xFFFC;

/// IRQ/BRK vector
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Controller port, refreshed every iteration
pub const CONTROLLER_PORT: u16 = 0x4016;

/// Cycles charged for the NMI entry sequence
pub const NMI_CYCLES: u8 = 7;

/// Bus trait for memory and I/O access
pub trait Bus: Send + Sync {
    /// Read a byte from the given address
    fn read(&self, address: u16) -> u8;
    /// Write a byte to the given address; returns stall cycles charged
    fn write(&self, address: u16, value: u8) -> u32;
    /// Store into a memory-mapped register without routing side effects
    fn publish(&self, address: u16, value: u8);
}

/// Outcome of one handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionResult {
    /// Bytes to advance PC by; 0 when the handler set PC itself
    pub length: u8,
    /// Cycle cost; 0 means the opcode is invalid
    pub cycles: u8,
}

impl InstructionResult {
    const INVALID: Self = Self {
        length: 0,
        cycles: 0,
    };
}

/// Interrupt recognition state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmiState {
    Idle,
    Pending,
    Servicing,
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Instruction retired; `cycles` includes NMI entry and DMA stalls
    Executed { opcode: u8, cycles: u64 },
    /// Invalid opcode; the engine suspended with PC on it
    Halted { opcode: u8, address: u16 },
}

/// State shared between the engine and its handles
#[derive(Debug)]
struct Shared {
    power: Arc<PowerHandler>,
    gate: RunGate,
    interrupt: Arc<InterruptLine>,
    /// Packed register file, see [`Registers::pack`]
    mirror: AtomicU64,
    total_cycles: AtomicU64,
    break_on_return: AtomicBool,
}

/// Thread-safe control and inspection handle
#[derive(Debug, Clone)]
pub struct CpuHandle {
    shared: Arc<Shared>,
}

impl CpuHandle {
    /// Terminate the run loop
    pub fn stop(&self) {
        self.shared.gate.stop();
    }

    /// Wake the run loop after a power state change
    pub fn notify(&self) {
        self.shared.gate.notify();
    }

    pub fn is_running(&self) -> bool {
        self.shared.gate.is_running()
    }

    /// Grant the run loop exactly one iteration while suspended
    pub fn single_step(&self) {
        self.shared.gate.grant_step();
    }

    /// A granted single step has not run yet
    pub fn step_pending(&self) -> bool {
        self.shared.gate.step_pending()
    }

    pub fn request_interrupt(&self) {
        self.shared.interrupt.request();
    }

    /// Request-only handle for the picture unit
    pub fn requester(&self) -> InterruptRequester {
        InterruptRequester::new(Arc::clone(&self.shared.interrupt))
    }

    /// Register file as of the last retired instruction
    pub fn registers(&self) -> Registers {
        Registers::unpack(self.shared.mirror.load(Ordering::Acquire)).0
    }

    pub fn flags(&self) -> StatusFlags {
        Registers::unpack(self.shared.mirror.load(Ordering::Acquire)).1
    }

    pub fn total_cycles(&self) -> u64 {
        self.shared.total_cycles.load(Ordering::Acquire)
    }

    /// Suspend after the next RTS retires
    pub fn step_to_return(&self) {
        self.shared.break_on_return.store(true, Ordering::SeqCst);
    }
}

/// 2A03 CPU
pub struct Cpu {
    registers: Registers,
    flags: StatusFlags,
    nmi: NmiState,
    table: [Instruction; 256],
    bus: Arc<dyn Bus>,
    controller: Arc<Controller>,
    pacer: Pacer,
    total_cycles: u64,
    /// Stall cycles charged by writes in the current iteration
    stall: u64,
    shared: Arc<Shared>,
}

impl Cpu {
    /// Create a new CPU instance
    pub fn new(
        bus: Arc<dyn Bus>,
        power: Arc<PowerHandler>,
        controller: Arc<Controller>,
        pacer: Pacer,
    ) -> Self {
        let registers = Registers::new();
        let flags = StatusFlags::power_on();
        let shared = Arc::new(Shared {
            power,
            gate: RunGate::new(),
            interrupt: Arc::new(InterruptLine::new()),
            mirror: AtomicU64::new(registers.pack(flags)),
            total_cycles: AtomicU64::new(0),
            break_on_return: AtomicBool::new(false),
        });

        Self {
            registers,
            flags,
            nmi: NmiState::Idle,
            table: dispatch::build_table(),
            bus,
            controller,
            pacer,
            total_cycles: 0,
            stall: 0,
            shared,
        }
    }

    /// Reset registers and load PC from `start_vector` or the reset vector
    pub fn reset(&mut self, start_vector: Option<u16>) {
        self.registers = Registers::new();
        self.flags = StatusFlags::power_on();
        self.nmi = NmiState::Idle;
        self.registers.pc = match start_vector {
            Some(address) => address,
            None => self.read_word(RESET_VECTOR),
        };
        self.publish_state();
    }

    pub fn registers(&self) -> Registers {
        self.registers
    }

    pub fn flags(&self) -> StatusFlags {
        self.flags
    }

    pub fn nmi_state(&self) -> NmiState {
        self.nmi
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn handle(&self) -> CpuHandle {
        CpuHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Reset, then run until the handle is stopped
    pub fn execute(&mut self, start_vector: Option<u16>) {
        self.reset(start_vector);
        info!("CPU started at {:#06X}", self.registers.pc);

        while self.shared.gate.wait_for_permission(&self.shared.power) {
            self.step();
        }

        info!("CPU stopped after {} cycles", self.total_cycles);
    }

    /// Run one loop iteration
    pub fn step(&mut self) -> Step {
        let start = self.pacer.mark();
        self.bus.publish(CONTROLLER_PORT, self.controller.bits());
        self.stall = 0;

        let mut cycles = 0u64;
        if self.shared.interrupt.take() {
            if self.nmi == NmiState::Servicing {
                debug!("NMI dropped while servicing");
            } else {
                self.nmi = NmiState::Pending;
            }
        }
        if self.nmi == NmiState::Pending {
            cycles += self.service_nmi() as u64;
        }

        let address = self.registers.pc;
        let opcode = self.bus.read(address);
        let instruction = self.table[opcode as usize];
        trace!(
            "{:04X}  {:02X}  {:<3} {:?}  {} P:{}",
            address,
            opcode,
            instruction.mnemonic,
            instruction.mode,
            self.registers,
            self.flags
        );

        let result = self.dispatch(&instruction);
        if result.cycles == 0 {
            error!("Invalid opcode {:#04X} at {:#06X}", opcode, address);
            self.shared.power.set_state(PowerState::Suspended);
            self.total_cycles += cycles + self.stall;
            self.publish_state();
            return Step::Halted { opcode, address };
        }

        self.registers.pc = self.registers.pc.wrapping_add(result.length as u16);
        cycles += result.cycles as u64 + self.stall;
        self.total_cycles += cycles;

        if instruction.operation == Operation::Rts
            && self.shared.break_on_return.swap(false, Ordering::SeqCst)
        {
            debug!("Returned to {:#06X}, suspending", self.registers.pc);
            self.shared.power.set_state(PowerState::Suspended);
        }

        self.publish_state();
        let gate = &self.shared.gate;
        self.pacer.spin_until(start, cycles, || gate.is_running());
        Step::Executed { opcode, cycles }
    }

    fn publish_state(&self) {
        self.shared
            .mirror
            .store(self.registers.pack(self.flags), Ordering::Release);
        self.shared
            .total_cycles
            .store(self.total_cycles, Ordering::Release);
    }

    /// Push PC and flags, then jump through the NMI vector
    fn service_nmi(&mut self) -> u8 {
        debug!("NMI at {:#06X}", self.registers.pc);
        self.push_word(self.registers.pc);
        let pushed = (self.flags | StatusFlags::UNUSED) - StatusFlags::BREAK;
        self.push(pushed.bits());
        self.flags.insert(StatusFlags::INTERRUPT_DISABLE);
        self.registers.pc = self.read_word(NMI_VECTOR);
        self.nmi = NmiState::Servicing;
        NMI_CYCLES
    }

    fn dispatch(&mut self, instruction: &Instruction) -> InstructionResult {
        let length = instruction.mode.length();
        let base = InstructionResult {
            length,
            cycles: instruction.cycles,
        };

        match instruction.operation {
            Operation::Load(register) => {
                let (value, extra) = self.fetch_operand(instruction);
                self.registers.set(register, value);
                self.flags.update_nz(value);
                self.with_penalty(base, extra)
            }
            Operation::Store(register) => {
                let (address, _) = self.operand_address(instruction.mode);
                self.store(address, self.registers.get(register));
                base
            }
            Operation::Transfer { from, to } => {
                let value = self.registers.get(from);
                self.registers.set(to, value);
                self.flags.update_nz(value);
                base
            }
            Operation::StackToX => {
                self.registers.x = self.registers.sp;
                self.flags.update_nz(self.registers.x);
                base
            }
            Operation::XToStack => {
                self.registers.sp = self.registers.x;
                base
            }
            Operation::Compare(register) => {
                let (value, extra) = self.fetch_operand(instruction);
                let lhs = self.registers.get(register);
                self.flags.set(StatusFlags::CARRY, lhs >= value);
                self.flags.update_nz(lhs.wrapping_sub(value));
                self.with_penalty(base, extra)
            }
            Operation::Increment(register) => {
                let value = self.registers.get(register).wrapping_add(1);
                self.registers.set(register, value);
                self.flags.update_nz(value);
                base
            }
            Operation::Decrement(register) => {
                let value = self.registers.get(register).wrapping_sub(1);
                self.registers.set(register, value);
                self.flags.update_nz(value);
                base
            }
            Operation::IncrementMemory => {
                self.modify(instruction.mode, |_, value| (value.wrapping_add(1), None));
                base
            }
            Operation::DecrementMemory => {
                self.modify(instruction.mode, |_, value| (value.wrapping_sub(1), None));
                base
            }
            Operation::And => self.accumulate(instruction, base, |a, m| a & m),
            Operation::Or => self.accumulate(instruction, base, |a, m| a | m),
            Operation::Eor => self.accumulate(instruction, base, |a, m| a ^ m),
            Operation::Adc => {
                let (value, extra) = self.fetch_operand(instruction);
                self.add_with_carry(value);
                self.with_penalty(base, extra)
            }
            Operation::Sbc => {
                let (value, extra) = self.fetch_operand(instruction);
                self.add_with_carry(!value);
                self.with_penalty(base, extra)
            }
            Operation::Bit => {
                let (value, _) = self.fetch_operand(instruction);
                self.flags
                    .set(StatusFlags::ZERO, self.registers.a & value == 0);
                self.flags.set(StatusFlags::OVERFLOW, value & 0x40 != 0);
                self.flags.set(StatusFlags::NEGATIVE, value & 0x80 != 0);
                base
            }
            Operation::Asl => {
                self.modify(instruction.mode, |_, v| (v << 1, Some(v & 0x80 != 0)));
                base
            }
            Operation::Lsr => {
                self.modify(instruction.mode, |_, v| (v >> 1, Some(v & 0x01 != 0)));
                base
            }
            Operation::Rol => {
                self.modify(instruction.mode, |carry, v| {
                    ((v << 1) | carry as u8, Some(v & 0x80 != 0))
                });
                base
            }
            Operation::Ror => {
                self.modify(instruction.mode, |carry, v| {
                    ((v >> 1) | (carry as u8) << 7, Some(v & 0x01 != 0))
                });
                base
            }
            Operation::Branch { flag, set } => self.branch(instruction, flag, set),
            Operation::Jmp => {
                let (target, _) = self.operand_address(instruction.mode);
                self.registers.pc = target;
                InstructionResult { length: 0, ..base }
            }
            Operation::Jsr => {
                let (target, _) = self.operand_address(instruction.mode);
                self.push_word(self.registers.pc.wrapping_add(2));
                self.registers.pc = target;
                InstructionResult { length: 0, ..base }
            }
            Operation::Rts => {
                self.registers.pc = self.pop_word().wrapping_add(1);
                InstructionResult { length: 0, ..base }
            }
            Operation::Rti => {
                let flags = self.pop();
                self.flags = Self::restored_flags(flags);
                self.registers.pc = self.pop_word();
                self.nmi = NmiState::Idle;
                InstructionResult { length: 0, ..base }
            }
            Operation::Brk => {
                self.push_word(self.registers.pc.wrapping_add(2));
                let pushed = self.flags | StatusFlags::BREAK | StatusFlags::UNUSED;
                self.push(pushed.bits());
                self.flags.insert(StatusFlags::INTERRUPT_DISABLE);
                self.registers.pc = self.read_word(IRQ_VECTOR);
                InstructionResult { length: 0, ..base }
            }
            Operation::PushAccumulator => {
                self.push(self.registers.a);
                base
            }
            Operation::PullAccumulator => {
                self.registers.a = self.pop();
                self.flags.update_nz(self.registers.a);
                base
            }
            Operation::PushStatus => {
                let pushed = self.flags | StatusFlags::BREAK | StatusFlags::UNUSED;
                self.push(pushed.bits());
                base
            }
            Operation::PullStatus => {
                let flags = self.pop();
                self.flags = Self::restored_flags(flags);
                base
            }
            Operation::SetFlag(flag) => {
                self.flags.insert(flag);
                base
            }
            Operation::ClearFlag(flag) => {
                self.flags.remove(flag);
                base
            }
            Operation::Nop => base,
            Operation::Invalid => InstructionResult::INVALID,
        }
    }

    /// Flags popped by PLP/RTI: BREAK dropped, UNUSED forced
    fn restored_flags(bits: u8) -> StatusFlags {
        (StatusFlags::from_bits_retain(bits) - StatusFlags::BREAK) | StatusFlags::UNUSED
    }

    fn with_penalty(&self, result: InstructionResult, page_crossed: bool) -> InstructionResult {
        InstructionResult {
            cycles: result.cycles + page_crossed as u8,
            ..result
        }
    }

    fn accumulate(
        &mut self,
        instruction: &Instruction,
        base: InstructionResult,
        op: impl Fn(u8, u8) -> u8,
    ) -> InstructionResult {
        let (value, extra) = self.fetch_operand(instruction);
        self.registers.a = op(self.registers.a, value);
        self.flags.update_nz(self.registers.a);
        self.with_penalty(base, extra)
    }

    fn add_with_carry(&mut self, operand: u8) {
        let a = self.registers.a;
        let sum = a as u16 + operand as u16 + self.flags.contains(StatusFlags::CARRY) as u16;
        let result = sum as u8;
        self.flags.set(StatusFlags::CARRY, sum > 0xFF);
        self.flags.set(
            StatusFlags::OVERFLOW,
            (a ^ result) & (operand ^ result) & 0x80 != 0,
        );
        self.registers.a = result;
        self.flags.update_nz(result);
    }

    /// Read-modify-write on the accumulator or memory.
    ///
    /// `op` receives the current carry and the value and returns the new
    /// value plus the new carry, if the operation affects it.
    fn modify(&mut self, mode: AddressingMode, op: impl Fn(bool, u8) -> (u8, Option<bool>)) {
        let carry = self.flags.contains(StatusFlags::CARRY);
        let result = if mode == AddressingMode::Accumulator {
            let (result, carry_out) = op(carry, self.registers.a);
            self.registers.a = result;
            self.apply_carry(carry_out);
            result
        } else {
            let (address, _) = self.operand_address(mode);
            let (result, carry_out) = op(carry, self.bus.read(address));
            self.store(address, result);
            self.apply_carry(carry_out);
            result
        };
        self.flags.update_nz(result);
    }

    fn apply_carry(&mut self, carry: Option<bool>) {
        if let Some(carry) = carry {
            self.flags.set(StatusFlags::CARRY, carry);
        }
    }

    fn branch(&mut self, instruction: &Instruction, flag: StatusFlags, set: bool) -> InstructionResult {
        let offset = self.bus.read(self.registers.pc.wrapping_add(1)) as i8;
        let next = self.registers.pc.wrapping_add(2);
        let mut cycles = instruction.cycles;

        self.registers.pc = if self.flags.contains(flag) == set {
            let target = next.wrapping_add(offset as u16);
            cycles += 1;
            if target & 0xFF00 != next & 0xFF00 {
                cycles += 1;
            }
            target
        } else {
            next
        };

        InstructionResult { length: 0, cycles }
    }

    /// Operand value and whether indexing crossed a page
    fn fetch_operand(&mut self, instruction: &Instruction) -> (u8, bool) {
        let (address, crossed) = self.operand_address(instruction.mode);
        (self.bus.read(address), crossed && instruction.page_penalty)
    }

    /// Effective operand address for the instruction at PC
    fn operand_address(&self, mode: AddressingMode) -> (u16, bool) {
        let operand = self.registers.pc.wrapping_add(1);
        match mode {
            AddressingMode::Immediate | AddressingMode::Relative => (operand, false),
            AddressingMode::ZeroPage => (self.bus.read(operand) as u16, false),
            AddressingMode::ZeroPageX => (
                self.bus.read(operand).wrapping_add(self.registers.x) as u16,
                false,
            ),
            AddressingMode::ZeroPageY => (
                self.bus.read(operand).wrapping_add(self.registers.y) as u16,
                false,
            ),
            AddressingMode::Absolute => (self.read_word(operand), false),
            AddressingMode::AbsoluteX => self.indexed(self.read_word(operand), self.registers.x),
            AddressingMode::AbsoluteY => self.indexed(self.read_word(operand), self.registers.y),
            AddressingMode::Indirect => {
                // The high byte never carries into the next page
                let pointer = self.read_word(operand);
                let high_address = (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF);
                let low = self.bus.read(pointer) as u16;
                let high = self.bus.read(high_address) as u16;
                ((high << 8) | low, false)
            }
            AddressingMode::IndexedIndirect => {
                let pointer = self.bus.read(operand).wrapping_add(self.registers.x);
                (self.read_zero_page_word(pointer), false)
            }
            AddressingMode::IndirectIndexed => {
                let pointer = self.bus.read(operand);
                self.indexed(self.read_zero_page_word(pointer), self.registers.y)
            }
            AddressingMode::Implied | AddressingMode::Accumulator => (0, false),
        }
    }

    fn indexed(&self, base: u16, index: u8) -> (u16, bool) {
        let address = base.wrapping_add(index as u16);
        (address, base & 0xFF00 != address & 0xFF00)
    }

    fn read_word(&self, address: u16) -> u16 {
        let low = self.bus.read(address) as u16;
        let high = self.bus.read(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    /// Little-endian pointer that wraps inside page zero
    fn read_zero_page_word(&self, pointer: u8) -> u16 {
        let low = self.bus.read(pointer as u16) as u16;
        let high = self.bus.read(pointer.wrapping_add(1) as u16) as u16;
        (high << 8) | low
    }

    fn store(&mut self, address: u16, value: u8) {
        self.stall += self.bus.write(address, value) as u64;
    }

    fn push(&mut self, value: u8) {
        self.store(self.registers.stack_address(), value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    fn pop(&mut self) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        self.bus.read(self.registers.stack_address())
    }

    /// Push high byte first
    fn push_word(&mut self, value: u16) {
        self.push((value >> 8) as u8);
        self.push(value as u8);
    }

    fn pop_word(&mut self) -> u16 {
        let low = self.pop() as u16;
        let high = self.pop() as u16;
        (high << 8) | low
    }
}
