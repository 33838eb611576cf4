//! The six concrete end-to-end scenarios from the emulation core's governing
//! specification, driven through the public `Cpu`/`MemoryMap`/`Asic` API the
//! way a real guest program would exercise them.

use dreamon_core::asic::{Asic, BASE as ASIC_BASE};
use dreamon_core::cpu::Cpu;
use dreamon_core::memmap::{Bus, MemoryMap};

fn load(bus: &mut MemoryMap, pc: u32, words: &[u16]) {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for w in words {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bus.load_image(pc, &bytes);
}

#[test]
fn scenario_add_then_tst() {
    let mut cpu = Cpu::new(0x8C00_0000, 0x8C00_0000);
    let mut bus = MemoryMap::new(4096);
    cpu.regs.r[1] = 0x7FFF_FFFE;
    cpu.regs.r[2] = 3;
    // ADD r2,r1 ; TST r1,r1
    load(&mut bus, 0x8C00_0000, &[0x312C, 0x2118]);

    cpu.step(&mut bus);
    assert_eq!(cpu.regs.r[1], 0x8000_0001);

    cpu.step(&mut bus);
    assert!(!cpu.regs.flags.t, "TST of a nonzero value against itself clears T");
}

#[test]
fn scenario_div0s_div1_yields_expected_quotient() {
    let mut cpu = Cpu::new(0x8C00_0000, 0x8C00_0000);
    let mut bus = MemoryMap::new(4096);
    cpu.regs.r[0] = 0x0000_1234;
    cpu.regs.r[1] = 0x0000_0017;

    let mut words = vec![0x2017u16]; // DIV0S r1,r0
    words.extend(std::iter::repeat(0x3014u16).take(32)); // DIV1 r1,r0 x32
    words.push(0x4024); // ROTCL r0
    load(&mut bus, 0x8C00_0000, &words);

    for _ in 0..words.len() {
        cpu.step(&mut bus);
    }

    assert_eq!(cpu.regs.r[0] & 0xFFFF, 0x0CB);
}

#[test]
fn scenario_bsrf_delay_slot_call() {
    let mut cpu = Cpu::new(0x8C00_1000, 0x8C00_0000);
    let mut bus = MemoryMap::new(0x4000);
    cpu.regs.r[3] = 0x20;
    // BSRF R3 ; (delay slot) MOV #1,R4
    load(&mut bus, 0x8C00_1000, &[0x0303, 0xE401]);

    cpu.step(&mut bus); // BSRF: arms the branch, falls into the delay slot
    cpu.step(&mut bus); // delay slot retires, branch commits

    assert_eq!(cpu.regs.r[4], 1, "the delay-slot instruction must have executed");
    assert_eq!(cpu.regs.pr, 0x8C00_1004);
    assert_eq!(cpu.regs.pc, 0x8C00_1024, "pc + 4 + r3");
}

#[test]
fn scenario_exception_cycle_on_privileged_ldc() {
    let mut cpu = Cpu::new(0x8C00_2000, 0x8C00_0000);
    let mut bus = MemoryMap::new(0x4000);
    cpu.regs.sr_ctrl.md = false; // user mode: LDC Rm,SR is privileged
    // LDC R0,SR : 0100 0000 0000 1110
    load(&mut bus, 0x8C00_2000, &[0x400E]);

    let sr_before = cpu.regs.read_sr();
    cpu.step(&mut bus);

    assert_eq!(cpu.regs.spc, 0x8C00_2000);
    assert_eq!(cpu.regs.ssr, sr_before);
    assert_eq!(cpu.regs.pc, cpu.regs.vbr.wrapping_add(0x100));
    assert_eq!(cpu.expevt, 0x180);
}

#[test]
fn scenario_asic_event_raises_and_lowers_irq13() {
    let asic = Asic::new(false);
    let mut bus = MemoryMap::new(4096);
    asic.register_mmio(&mut bus);

    bus.write_long(ASIC_BASE + 0x910, 0x4).unwrap(); // IRQA0 = 0x4
    asic.raise_event(2); // sets PIRQ0 bit 2 (0x4)

    assert_eq!(bus.read_long(ASIC_BASE + 0x900).unwrap(), 0x4);
    let [irq13, irq11, irq9] = asic.active_irq_lines();
    assert!(irq13 && !irq11 && !irq9);

    bus.write_long(ASIC_BASE + 0x900, 0x4).unwrap(); // write-1-to-clear PIRQ0
    let [irq13, _, _] = asic.active_irq_lines();
    assert!(!irq13);
}

#[test]
fn scenario_store_queue_flush_lands_at_qacr_destination() {
    let mut bus = MemoryMap::new(0x0200_0000);
    for i in 0..8u32 {
        bus.write_long(0xE000_0000 + i * 4, i + 1).unwrap();
    }
    // QACR area 0x0C selects main RAM; the flush destination is RAM_BASE here
    // since the store-queue address contributes no low bits.
    bus.store_queues.set_qacr(0, 0x0C);

    let (dest, bytes) = bus.store_queues.flush(0, 0xE000_0000);
    assert_eq!(dest, 0x0C00_0000);
    bus.load_image(dest, &bytes);

    for i in 0..8u32 {
        assert_eq!(bus.read_long(dest + i * 4).unwrap(), i + 1);
    }
}
