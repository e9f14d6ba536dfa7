//! CPU tests for the NES emulator

use nes_core::bus::{MemoryChunk, MemoryManager, MemoryOwner, MemoryType};
use nes_core::cartridge::Cartridge;
use nes_core::clock::{Pacer, SteppingClock};
use nes_core::controller::Controller;
use nes_core::cpu::{Cpu, NmiState, Step, NMI_VECTOR};
use nes_core::power::{PowerHandler, PowerState};
use nes_core::registers::StatusFlags;
use std::sync::Arc;
use std::time::Duration;

const ORIGIN: u16 = 0x1000;

/// CPU over a flat 64 KiB processor RAM, IO window at $4000 and OAM
fn machine_at(origin: u16, program: &[u8]) -> (Cpu, Arc<MemoryManager>, Arc<PowerHandler>) {
    let mut memory = MemoryManager::new(Cartridge::default());
    memory.add_chunk(MemoryChunk::new(
        0x4000,
        0x18,
        MemoryType::Io,
        MemoryOwner::Processor,
        "CPU registers",
    ));
    memory.add_chunk(MemoryChunk::new(
        0x0000,
        0x10000,
        MemoryType::Ram,
        MemoryOwner::Processor,
        "RAM",
    ));
    memory.add_chunk(MemoryChunk::new(
        0x0000,
        0x100,
        MemoryType::Ram,
        MemoryOwner::PictureUnit,
        "OAM",
    ));
    for (i, byte) in program.iter().enumerate() {
        memory.write_memory(MemoryOwner::Processor, origin + i as u16, *byte);
    }

    let memory = Arc::new(memory);
    let power = Arc::new(PowerHandler::new(PowerState::Run));
    let mut cpu = Cpu::new(
        Arc::clone(&memory) as Arc<dyn nes_core::cpu::Bus>,
        Arc::clone(&power),
        Arc::new(Controller::new()),
        Pacer::unthrottled(SteppingClock::new(Duration::from_nanos(1))),
    );
    cpu.reset(Some(origin));
    (cpu, memory, power)
}

fn machine(program: &[u8]) -> (Cpu, Arc<MemoryManager>, Arc<PowerHandler>) {
    machine_at(ORIGIN, program)
}

fn run(cpu: &mut Cpu, steps: usize) {
    for _ in 0..steps {
        assert!(matches!(cpu.step(), Step::Executed { .. }));
    }
}

#[test]
fn test_lda_immediate() {
    let (mut cpu, _, _) = machine(&[0xA9, 0xCD]);
    run(&mut cpu, 1);
    assert_eq!(cpu.registers().a, 0xCD);
    assert_eq!(cpu.registers().pc, ORIGIN + 2);
    assert!(cpu.flags().contains(StatusFlags::NEGATIVE));
    assert!(!cpu.flags().contains(StatusFlags::ZERO));
}

#[test]
fn test_immediate_loads_set_nz() {
    // LDA/LDX/LDY with each operand class
    for (opcode, value) in [
        (0xA9u8, 0x00u8),
        (0xA9, 0x80),
        (0xA2, 0x7F),
        (0xA2, 0x00),
        (0xA0, 0xFF),
        (0xA0, 0x01),
    ] {
        let (mut cpu, _, _) = machine(&[opcode, value]);
        run(&mut cpu, 1);

        let registers = cpu.registers();
        let loaded = match opcode {
            0xA9 => registers.a,
            0xA2 => registers.x,
            _ => registers.y,
        };
        assert_eq!(loaded, value);
        assert_eq!(cpu.flags().contains(StatusFlags::NEGATIVE), value & 0x80 != 0);
        assert_eq!(cpu.flags().contains(StatusFlags::ZERO), value == 0);
    }
}

#[test]
fn test_absolute_x_load() {
    let (mut cpu, _, _) = machine(&[0xA2, 0x01, 0xBD, 0x05, 0x10, 0x35, 0x17]);
    run(&mut cpu, 2);
    assert_eq!(cpu.registers().a, 0x17);
}

#[test]
fn test_compare_sets_unsigned_carry() {
    let (mut cpu, _, _) = machine(&[0xA9, 0x45, 0xC9, 0x85]);
    run(&mut cpu, 2);
    let flags = cpu.flags();
    assert!(flags.contains(StatusFlags::NEGATIVE));
    assert!(!flags.contains(StatusFlags::ZERO));
    // 0x45 < 0x85
    assert!(!flags.contains(StatusFlags::CARRY));
}

#[test]
fn test_compare_property() {
    // (load opcode, compare opcode)
    let pairs = [(0xA9u8, 0xC9u8), (0xA2, 0xE0), (0xA0, 0xC0)];
    let values = [0x00u8, 0x01, 0x7F, 0x80, 0xFF];

    for (load, compare) in pairs {
        for r in values {
            for m in values {
                let (mut cpu, _, _) = machine(&[load, r, compare, m]);
                run(&mut cpu, 2);
                let flags = cpu.flags();
                assert_eq!(flags.contains(StatusFlags::CARRY), r >= m, "{:02X} vs {:02X}", r, m);
                assert_eq!(flags.contains(StatusFlags::ZERO), r == m);
                assert_eq!(
                    flags.contains(StatusFlags::NEGATIVE),
                    r.wrapping_sub(m) & 0x80 != 0
                );
            }
        }
    }
}

#[test]
fn test_sta_zero_page() {
    let (mut cpu, memory, _) = machine(&[0xA9, 0x25, 0x85, 0x02]);
    run(&mut cpu, 2);
    assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x0002), 0x25);
}

#[test]
fn test_zero_page_x_wraps() {
    // LDX #$10; LDA #$99; STA $F8,X -> $0008
    let (mut cpu, memory, _) = machine(&[0xA2, 0x10, 0xA9, 0x99, 0x95, 0xF8]);
    run(&mut cpu, 3);
    assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x0008), 0x99);
    assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x0108), 0x00);
}

#[test]
fn test_branch_not_taken() {
    // LDA #$00; BNE +$10
    let (mut cpu, _, _) = machine(&[0xA9, 0x00, 0xD0, 0x10]);
    run(&mut cpu, 1);
    assert_eq!(cpu.step(), Step::Executed { opcode: 0xD0, cycles: 2 });
    assert_eq!(cpu.registers().pc, ORIGIN + 4);
}

#[test]
fn test_branch_taken_same_page() {
    // LDA #$01; BNE +$10
    let (mut cpu, _, _) = machine(&[0xA9, 0x01, 0xD0, 0x10]);
    run(&mut cpu, 1);
    assert_eq!(cpu.step(), Step::Executed { opcode: 0xD0, cycles: 3 });
    assert_eq!(cpu.registers().pc, ORIGIN + 4 + 0x10);
}

#[test]
fn test_branch_taken_backward() {
    // SEC; BCS -2
    let (mut cpu, _, _) = machine(&[0x38, 0xB0, 0xFE]);
    run(&mut cpu, 1);
    assert_eq!(cpu.step(), Step::Executed { opcode: 0xB0, cycles: 3 });
    assert_eq!(cpu.registers().pc, ORIGIN + 1);
}

#[test]
fn test_every_branch_follows_its_flag() {
    // (opcode, flag, taken when set)
    let branches = [
        (0x10u8, StatusFlags::NEGATIVE, false),
        (0x30, StatusFlags::NEGATIVE, true),
        (0x50, StatusFlags::OVERFLOW, false),
        (0x70, StatusFlags::OVERFLOW, true),
        (0x90, StatusFlags::CARRY, false),
        (0xB0, StatusFlags::CARRY, true),
        (0xD0, StatusFlags::ZERO, false),
        (0xF0, StatusFlags::ZERO, true),
    ];

    for (opcode, flag, set) in branches {
        for flag_on in [false, true] {
            let status = if flag_on { flag.bits() } else { 0 };
            // LDA #status; PHA; PLP; branch +$10
            let (mut cpu, _, _) = machine(&[0xA9, status, 0x48, 0x28, opcode, 0x10]);
            run(&mut cpu, 3);
            assert_eq!(cpu.flags().contains(flag), flag_on);

            let taken = flag_on == set;
            let expected = if taken {
                Step::Executed { opcode, cycles: 3 }
            } else {
                Step::Executed { opcode, cycles: 2 }
            };
            assert_eq!(cpu.step(), expected, "{:02X} with flag {}", opcode, flag_on);
            let target = if taken { ORIGIN + 6 + 0x10 } else { ORIGIN + 6 };
            assert_eq!(cpu.registers().pc, target, "{:02X} with flag {}", opcode, flag_on);
        }
    }
}

#[test]
fn test_branch_page_cross_costs_extra() {
    // At $10F0: LDA #$01; BNE +$20 -> $1114 from fall-through $10F4
    let (mut cpu, _, _) = machine_at(0x10F0, &[0xA9, 0x01, 0xD0, 0x20]);
    run(&mut cpu, 1);
    assert_eq!(cpu.step(), Step::Executed { opcode: 0xD0, cycles: 4 });
    assert_eq!(cpu.registers().pc, 0x1114);
}

#[test]
fn test_absolute_x_page_penalty() {
    // LDX #$FF; LDA $10F0,X crosses into $11EF
    let (mut cpu, _, _) = machine(&[0xA2, 0xFF, 0xBD, 0xF0, 0x10]);
    run(&mut cpu, 1);
    assert_eq!(cpu.step(), Step::Executed { opcode: 0xBD, cycles: 5 });
}

#[test]
fn test_jsr_rts_round_trip() {
    // JSR $1100; NOP ... $1100: RTS
    let (mut cpu, memory, _) = machine(&[0x20, 0x00, 0x11, 0xEA]);
    memory.write_memory(MemoryOwner::Processor, 0x1100, 0x60);
    let sp = cpu.registers().sp;

    run(&mut cpu, 1);
    assert_eq!(cpu.registers().pc, 0x1100);
    assert_eq!(cpu.registers().sp, sp.wrapping_sub(2));
    // Return address minus one, high byte first
    assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x01FD), 0x10);
    assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x01FC), 0x02);

    run(&mut cpu, 1);
    assert_eq!(cpu.registers().pc, ORIGIN + 3);
    assert_eq!(cpu.registers().sp, sp);
}

#[test]
fn test_stack_push_pull() {
    // LDA #$77; PHA; LDA #$00; PLA
    let (mut cpu, memory, _) = machine(&[0xA9, 0x77, 0x48, 0xA9, 0x00, 0x68]);
    run(&mut cpu, 2);
    assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x01FD), 0x77);
    assert_eq!(cpu.registers().sp, 0xFC);
    run(&mut cpu, 2);
    assert_eq!(cpu.registers().a, 0x77);
    assert_eq!(cpu.registers().sp, 0xFD);
}

#[test]
fn test_nmi_round_trip_and_rearm() {
    // CLI; SEC; NOP; NOP; NOP ... handler at $2000: NOP; RTI
    let (mut cpu, memory, _) = machine(&[0x58, 0x38, 0xEA, 0xEA, 0xEA]);
    memory.write_memory(MemoryOwner::Processor, NMI_VECTOR, 0x00);
    memory.write_memory(MemoryOwner::Processor, NMI_VECTOR + 1, 0x20);
    memory.write_memory(MemoryOwner::Processor, 0x2000, 0xEA);
    memory.write_memory(MemoryOwner::Processor, 0x2001, 0x40);
    let handle = cpu.handle();

    run(&mut cpu, 2);
    let before_pc = cpu.registers().pc;
    let before_flags = cpu.flags();
    let before_sp = cpu.registers().sp;
    assert!(!before_flags.contains(StatusFlags::INTERRUPT_DISABLE));

    // Entry sequence plus the handler's NOP
    handle.request_interrupt();
    assert_eq!(cpu.step(), Step::Executed { opcode: 0xEA, cycles: 7 + 2 });
    assert_eq!(cpu.nmi_state(), NmiState::Servicing);
    assert_eq!(cpu.registers().pc, 0x2001);
    assert!(cpu.flags().contains(StatusFlags::INTERRUPT_DISABLE));
    let pushed = StatusFlags::from_bits_retain(
        memory.read_memory(MemoryOwner::Processor, 0x0100 + before_sp as u16 - 2),
    );
    assert!(pushed.contains(StatusFlags::UNUSED));
    assert!(!pushed.contains(StatusFlags::BREAK));

    // A request during service is dropped
    handle.request_interrupt();
    run(&mut cpu, 1);
    assert_eq!(cpu.nmi_state(), NmiState::Idle);
    assert_eq!(cpu.registers().pc, before_pc);
    assert_eq!(cpu.registers().sp, before_sp);
    assert_eq!(cpu.flags(), before_flags);

    run(&mut cpu, 1);
    assert_eq!(cpu.registers().pc, before_pc + 1);

    // After RTI a new request is honoured
    handle.request_interrupt();
    run(&mut cpu, 1);
    assert_eq!(cpu.registers().pc, 0x2001);
    assert_eq!(cpu.nmi_state(), NmiState::Servicing);
}

#[test]
fn test_oam_dma_copies_and_stalls() {
    // LDA #$02; STA $4014
    let (mut cpu, memory, _) = machine(&[0xA9, 0x02, 0x8D, 0x14, 0x40]);
    for i in 0..256u16 {
        memory.write_memory(MemoryOwner::Processor, 0x0200 + i, (i as u8) ^ 0x5A);
    }

    run(&mut cpu, 1);
    let before = cpu.total_cycles();
    assert_eq!(cpu.step(), Step::Executed { opcode: 0x8D, cycles: 4 + 514 });
    assert_eq!(cpu.total_cycles() - before, 4 + 514);

    for i in 0..256u16 {
        assert_eq!(
            memory.read_memory(MemoryOwner::PictureUnit, i),
            (i as u8) ^ 0x5A
        );
    }
    // The trigger register keeps the written page
    assert_eq!(memory.read_memory(MemoryOwner::Processor, 0x4014), 0x02);
}

#[test]
fn test_unmapped_read_keeps_running() {
    // LDA #$33; LDA $5000; NOP over a layout with nothing at $5000
    let program = [0xA9, 0x33, 0xAD, 0x00, 0x50, 0xEA];
    let mut image = vec![0u8; 0x4000];
    image[..program.len()].copy_from_slice(&program);
    let cartridge = Cartridge::from_parts(image, Vec::new(), Default::default());
    let memory = Arc::new(nes_core::system::build_memory(cartridge));
    let power = Arc::new(PowerHandler::new(PowerState::Run));

    let mut cpu = Cpu::new(
        Arc::clone(&memory) as Arc<dyn nes_core::cpu::Bus>,
        Arc::clone(&power),
        Arc::new(Controller::new()),
        Pacer::unthrottled(SteppingClock::new(Duration::from_nanos(1))),
    );
    cpu.reset(Some(0x8000));

    run(&mut cpu, 2);
    assert_eq!(cpu.registers().a, 0x00);
    run(&mut cpu, 1);
    assert_eq!(power.state(), PowerState::Run);
    assert_eq!(cpu.registers().pc, 0x8006);
}

#[test]
fn test_invalid_opcode_suspends() {
    let (mut cpu, _, power) = machine(&[0xEA, 0xFF]);
    run(&mut cpu, 1);
    assert_eq!(
        cpu.step(),
        Step::Halted {
            opcode: 0xFF,
            address: ORIGIN + 1
        }
    );
    assert_eq!(power.state(), PowerState::Suspended);
    assert_eq!(cpu.registers().pc, ORIGIN + 1);
}

#[test]
fn test_paced_step_waits_on_clock() {
    let clock = SteppingClock::new(Duration::from_nanos(50));
    let observer = clock.clone();
    let mut memory = MemoryManager::new(Cartridge::default());
    memory.add_chunk(MemoryChunk::new(
        0x0000,
        0x10000,
        MemoryType::Ram,
        MemoryOwner::Processor,
        "RAM",
    ));
    memory.write_memory(MemoryOwner::Processor, ORIGIN, 0xEA);

    let mut cpu = Cpu::new(
        Arc::new(memory),
        Arc::new(PowerHandler::new(PowerState::Run)),
        Arc::new(Controller::new()),
        Pacer::new(clock, 1_000_000),
    );
    cpu.reset(Some(ORIGIN));
    run(&mut cpu, 1);

    // NOP is 2 cycles, 2000ns at 1 MHz
    assert!(observer.peek() >= Duration::from_nanos(2000));
}
