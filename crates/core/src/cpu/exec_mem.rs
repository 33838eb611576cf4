//! Load/store instructions: `MOV.B/W/L` in every addressing mode, `MOVA`, and the
//! `@(R0,GBR)`-indexed logical/arithmetic memory forms.

use super::decode::{d4, d8, m, n};
use super::regs::Registers;
use crate::common::error::Trap;
use crate::memmap::Bus;

/// Attempts to execute `op` as a memory-referencing instruction.
pub fn try_exec(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Option<Result<(), Trap>> {
    let hi = (op >> 12) & 0xF;
    match hi {
        0x0 => exec_0x0(regs, bus, op),
        0x1 => Some(mov_l_store_disp(regs, bus, op)), // MOV.L Rm,@(disp,Rn)
        0x2 => exec_0x2(regs, bus, op),
        0x5 => Some(mov_l_load_disp(regs, bus, op)), // MOV.L @(disp,Rm),Rn
        0x6 => exec_0x6(regs, bus, op),
        0x8 => exec_0x8(regs, bus, op),
        0x9 => Some(mov_w_pc_rel(regs, bus, op)),
        0xD => Some(mov_l_pc_rel(regs, bus, op)),
        0xC => exec_0xc(regs, bus, op),
        _ => None,
    }
}

fn exec_0x0(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Option<Result<(), Trap>> {
    let lo4 = op & 0xF;
    let (rn, rm) = (n(op), m(op));
    match lo4 {
        0x4 => Some(store(bus, regs.r[rn].wrapping_add(regs.r[0]), regs.r[rm], 1)), // MOV.B Rm,@(R0,Rn)
        0x5 => Some(store(bus, regs.r[rn].wrapping_add(regs.r[0]), regs.r[rm], 2)),
        0x6 => Some(store(bus, regs.r[rn].wrapping_add(regs.r[0]), regs.r[rm], 4)),
        0xC => Some(load_sext(regs, bus, rn, regs.r[rm].wrapping_add(regs.r[0]), 1)),
        0xD => Some(load_sext(regs, bus, rn, regs.r[rm].wrapping_add(regs.r[0]), 2)),
        0xE => Some(load_sext(regs, bus, rn, regs.r[rm].wrapping_add(regs.r[0]), 4)),
        _ => None,
    }
}

fn exec_0x2(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Option<Result<(), Trap>> {
    let lo4 = op & 0xF;
    let (rn, rm) = (n(op), m(op));
    match lo4 {
        0x0 => Some(store(bus, regs.r[rn], regs.r[rm], 1)), // MOV.B Rm,@Rn
        0x1 => Some(store(bus, regs.r[rn], regs.r[rm], 2)),
        0x2 => Some(store(bus, regs.r[rn], regs.r[rm], 4)),
        0x4 => {
            // MOV.B Rm,@-Rn
            let addr = regs.r[rn].wrapping_sub(1);
            let r = store(bus, addr, regs.r[rm], 1);
            regs.r[rn] = addr;
            Some(r)
        }
        0x5 => {
            let addr = regs.r[rn].wrapping_sub(2);
            let r = store(bus, addr, regs.r[rm], 2);
            regs.r[rn] = addr;
            Some(r)
        }
        0x6 => {
            let addr = regs.r[rn].wrapping_sub(4);
            let r = store(bus, addr, regs.r[rm], 4);
            regs.r[rn] = addr;
            Some(r)
        }
        0x7 => {
            // DIV0S is handled by exec_alu via top-nibble 0x2 lo4=0x7? No: DIV0S is
            // 0010nnnnmmmm0111.
            super::exec_alu::div0s(regs, op);
            Some(Ok(()))
        }
        _ => None,
    }
}

fn exec_0x6(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Option<Result<(), Trap>> {
    let lo4 = op & 0xF;
    let (rn, rm) = (n(op), m(op));
    match lo4 {
        0x0 => Some(load_sext(regs, bus, rn, regs.r[rm], 1)), // MOV.B @Rm,Rn
        0x1 => Some(load_sext(regs, bus, rn, regs.r[rm], 2)),
        0x2 => Some(load_sext(regs, bus, rn, regs.r[rm], 4)),
        0x3 => {
            // MOV Rm,Rn
            regs.r[rn] = regs.r[rm];
            Some(Ok(()))
        }
        0x4 => {
            // MOV.B @Rm+,Rn
            let addr = regs.r[rm];
            let r = load_sext(regs, bus, rn, addr, 1);
            if rn != rm {
                regs.r[rm] = addr.wrapping_add(1);
            }
            Some(r)
        }
        0x5 => {
            let addr = regs.r[rm];
            let r = load_sext(regs, bus, rn, addr, 2);
            if rn != rm {
                regs.r[rm] = addr.wrapping_add(2);
            }
            Some(r)
        }
        0x6 => {
            let addr = regs.r[rm];
            let r = load_sext(regs, bus, rn, addr, 4);
            if rn != rm {
                regs.r[rm] = addr.wrapping_add(4);
            }
            Some(r)
        }
        _ => None,
    }
}

fn exec_0x8(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Option<Result<(), Trap>> {
    let sel = (op >> 8) & 0xF;
    match sel {
        0x0 => {
            // MOV.B R0,@(disp,Rn) -- disp4, rn is actually field m in this encoding
            let rn = m(op);
            let addr = regs.r[rn].wrapping_add(d4(op));
            Some(store(bus, addr, regs.r[0], 1))
        }
        0x1 => {
            let rn = m(op);
            let addr = regs.r[rn].wrapping_add(d4(op) * 2);
            Some(store(bus, addr, regs.r[0], 2))
        }
        0x4 => {
            // MOV.B @(disp,Rm),R0
            let rm = m(op);
            let addr = regs.r[rm].wrapping_add(d4(op));
            Some(load_sext(regs, bus, 0, addr, 1))
        }
        0x5 => {
            let rm = m(op);
            let addr = regs.r[rm].wrapping_add(d4(op) * 2);
            Some(load_sext(regs, bus, 0, addr, 2))
        }
        _ => None,
    }
}

fn exec_0xc(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Option<Result<(), Trap>> {
    let sel = (op >> 8) & 0xF;
    match sel {
        0x0 => {
            // MOV.B R0,@(disp,GBR)
            let addr = regs.gbr.wrapping_add(d8(op));
            Some(store(bus, addr, regs.r[0], 1))
        }
        0x1 => {
            let addr = regs.gbr.wrapping_add(d8(op) * 2);
            Some(store(bus, addr, regs.r[0], 2))
        }
        0x2 => {
            let addr = regs.gbr.wrapping_add(d8(op) * 4);
            Some(store(bus, addr, regs.r[0], 4))
        }
        0x4 => {
            let addr = regs.gbr.wrapping_add(d8(op));
            Some(load_sext(regs, bus, 0, addr, 1))
        }
        0x5 => {
            let addr = regs.gbr.wrapping_add(d8(op) * 2);
            Some(load_sext(regs, bus, 0, addr, 2))
        }
        0x6 => {
            let addr = regs.gbr.wrapping_add(d8(op) * 4);
            Some(load_sext(regs, bus, 0, addr, 4))
        }
        0x7 => {
            // MOVA @(disp,PC),R0
            regs.r[0] = (regs.pc & !3).wrapping_add(d8(op) * 4).wrapping_add(4);
            Some(Ok(()))
        }
        0x8 => {
            // TST #imm,R0
            super::exec_alu::tst_imm(regs, op);
            Some(Ok(()))
        }
        0x9 => {
            // AND #imm,R0
            super::exec_alu::and_imm(regs, op);
            Some(Ok(()))
        }
        0xA => {
            // XOR #imm,R0
            super::exec_alu::xor_imm(regs, op);
            Some(Ok(()))
        }
        0xB => {
            // OR #imm,R0
            super::exec_alu::or_imm(regs, op);
            Some(Ok(()))
        }
        0xC => {
            // TST.B #imm,@(R0,GBR)
            let addr = regs.gbr.wrapping_add(regs.r[0]);
            Some((|| {
                let v = bus.read_byte(addr)?;
                regs.flags.t = (u32::from(v) & d8(op)) == 0;
                Ok(())
            })())
        }
        0xD => {
            // AND.B #imm,@(R0,GBR)
            let addr = regs.gbr.wrapping_add(regs.r[0]);
            Some(rmw_byte(bus, addr, |v| v & d8(op) as u8))
        }
        0xE => {
            // XOR.B #imm,@(R0,GBR)
            let addr = regs.gbr.wrapping_add(regs.r[0]);
            Some(rmw_byte(bus, addr, |v| v ^ d8(op) as u8))
        }
        0xF => {
            // OR.B #imm,@(R0,GBR)
            let addr = regs.gbr.wrapping_add(regs.r[0]);
            Some(rmw_byte(bus, addr, |v| v | d8(op) as u8))
        }
        _ => None,
    }
}

fn mov_w_pc_rel(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    // MOV.W @(disp,PC),Rn : addr = pc + disp*2 + 4
    let addr = regs.pc.wrapping_add(d8(op) * 2).wrapping_add(4);
    load_sext(regs, bus, n(op), addr, 2)
}

fn mov_l_pc_rel(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    // MOV.L @(disp,PC),Rn : addr = (pc & ~3) + disp*4 + 4
    let addr = (regs.pc & !3).wrapping_add(d8(op) * 4).wrapping_add(4);
    load_sext(regs, bus, n(op), addr, 4)
}

fn mov_l_store_disp(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    let (rn, rm) = (n(op), m(op));
    let addr = regs.r[rn].wrapping_add(d4(op) * 4);
    store(bus, addr, regs.r[rm], 4)
}

fn mov_l_load_disp(regs: &mut Registers, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    let (rn, rm) = (n(op), m(op));
    let addr = regs.r[rm].wrapping_add(d4(op) * 4);
    load_sext(regs, bus, rn, addr, 4)
}

fn store(bus: &mut dyn Bus, addr: u32, value: u32, width: u32) -> Result<(), Trap> {
    match width {
        1 => bus.write_byte(addr, value as u8),
        2 => bus.write_word(addr, value as u16),
        4 => bus.write_long(addr, value),
        _ => unreachable!("width is always 1/2/4"),
    }
}

fn load_sext(
    regs: &mut Registers,
    bus: &mut dyn Bus,
    rn: usize,
    addr: u32,
    width: u32,
) -> Result<(), Trap> {
    regs.r[rn] = match width {
        1 => bus.read_byte(addr)? as i8 as i32 as u32,
        2 => bus.read_word(addr)? as i16 as i32 as u32,
        4 => bus.read_long(addr)?,
        _ => unreachable!("width is always 1/2/4"),
    };
    Ok(())
}

fn rmw_byte(bus: &mut dyn Bus, addr: u32, f: impl FnOnce(u8) -> u8) -> Result<(), Trap> {
    let v = bus.read_byte(addr)?;
    bus.write_byte(addr, f(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memmap::MemoryMap;

    #[test]
    fn mov_l_store_then_load_round_trips() {
        let mut regs = Registers::reset_at(0x8C00_0000, 0x8C00_0000);
        let mut bus = MemoryMap::new(4096);
        regs.r[1] = 0x0C00_0100;
        regs.r[2] = 0x1234_5678;
        // MOV.L R2,@R1 : 0010 0001 0010 0010 (n=1,m=2,lo4=2)
        let op = 0x2122;
        try_exec(&mut regs, &mut bus, op).unwrap().unwrap();
        assert_eq!(bus.read_long(0x0C00_0100).unwrap(), 0x1234_5678);
    }

    #[test]
    fn mov_b_load_sign_extends() {
        let mut regs = Registers::reset_at(0x8C00_0000, 0x8C00_0000);
        let mut bus = MemoryMap::new(4096);
        bus.write_byte(0x0C00_0010, 0xFF).unwrap();
        regs.r[3] = 0x0C00_0010;
        // MOV.B @R3,R2 : 0110 0010 0011 0000 (n=2,m=3,lo4=0)
        let op = 0x6230;
        try_exec(&mut regs, &mut bus, op).unwrap().unwrap();
        assert_eq!(regs.r[2], 0xFFFF_FFFF);
    }
}
