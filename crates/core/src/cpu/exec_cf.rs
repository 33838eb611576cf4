//! Control-flow and system instructions: conditional/unconditional branches, delay
//! slots, `LDC`/`STC`/`LDS`/`STS`, `TRAPA`, `SLEEP`, and the cache-hint no-ops.
//!
//! Top nibble `0x0` and `0x4` are shared with other exec modules: the R0-indexed
//! `MOV` forms at `0x0`'s `lo4` 4/5/6/C/D/E live in `exec_mem`, and the shift/rotate
//! family at `0x4`'s low byte lives in `exec_alu`. This module picks up what's left:
//! `STC`/`STS`/`LDC`/`LDS`, the branch-ish `lo4=0x3`/`0xB` group, `MUL.L`/`MAC.L`,
//! and `JSR`/`JMP`/`TAS.B` under `0x4`.

use super::decode::{d8, imm8s, m, n, top};
use super::regs::{fpscr_bits, RunState};
use super::Cpu;
use crate::common::error::Trap;
use crate::memmap::Bus;

/// Outcome of executing a control-flow/system instruction.
pub enum CfEffect {
    /// Not a control-flow/system instruction; try another exec module.
    NotHandled,
    /// Handled; no branch was taken.
    Plain,
    /// Handled; sets `delayed_branch_target` to the given absolute address.
    Branch(u32),
}

/// Returns `true` if `op` is a control-transfer-class instruction — used by the
/// step loop to detect an illegal control transfer placed in a delay slot.
#[must_use]
pub fn is_control_transfer(op: u16) -> bool {
    let lo4 = op & 0xF;
    let sel4 = (op >> 4) & 0xF;
    match top(op) {
        0x8 => matches!((op >> 8) & 0xF, 0x9 | 0xB | 0xD | 0xF), // BT/BF/BT.S/BF.S
        0xA | 0xB => true,                                      // BRA/BSR
        0x0 => {
            (lo4 == 0x3 && matches!(sel4, 0x0 | 0x2)) // BSRF/BRAF
                || (lo4 == 0xB && matches!(sel4, 0x0 | 0x2)) // RTS/RTE
        }
        0x4 => lo4 == 0xB && matches!(sel4, 0x0 | 0x2), // JSR/JMP
        _ => false,
    }
}

fn check_not_in_delay_slot(cpu: &Cpu, op: u16) -> Result<(), Trap> {
    if cpu.regs.in_delay_slot {
        Err(Trap::SlotIllegal(op))
    } else {
        Ok(())
    }
}

fn check_priv(cpu: &Cpu, op: u16) -> Result<(), Trap> {
    if cpu.regs.sr_ctrl.md {
        Ok(())
    } else {
        Err(Trap::IllegalInstruction(op))
    }
}

/// Attempts to execute `op` as a control-flow or system instruction.
pub fn try_exec(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Option<Result<CfEffect, Trap>> {
    match top(op) {
        0x8 => exec_cond_branch(cpu, op),
        0xA => {
            let target = branch_target(cpu.regs.pc, d12(op));
            Some(check_not_in_delay_slot(cpu, op).map(|()| CfEffect::Branch(target)))
        }
        0xB => {
            let target = branch_target(cpu.regs.pc, d12(op));
            Some(check_not_in_delay_slot(cpu, op).map(|()| {
                cpu.regs.pr = cpu.regs.pc.wrapping_add(4);
                CfEffect::Branch(target)
            }))
        }
        0x0 => exec_0x0(cpu, bus, op),
        0x4 => exec_0x4(cpu, bus, op),
        _ => None,
    }
}

fn d12(op: u16) -> i32 {
    super::decode::d12s(op)
}

fn branch_target(pc: u32, disp: i32) -> u32 {
    (pc.wrapping_add(4) as i32).wrapping_add(disp * 2) as u32
}

fn exec_cond_branch(cpu: &mut Cpu, op: u16) -> Option<Result<CfEffect, Trap>> {
    let sel = (op >> 8) & 0xF;
    let taken = match sel {
        0x9 | 0xD => cpu.regs.flags.t,
        0xB | 0xF => !cpu.regs.flags.t,
        _ => return None,
    };
    let delay_slot_form = matches!(sel, 0xD | 0xF);
    if delay_slot_form {
        if let Err(e) = check_not_in_delay_slot(cpu, op) {
            return Some(Err(e));
        }
    }
    if !taken {
        return Some(Ok(CfEffect::Plain));
    }
    let target = (cpu.regs.pc.wrapping_add(4) as i32).wrapping_add(imm8s(op) * 2) as u32;
    if delay_slot_form {
        // BT.S/BF.S: branch takes effect after the following delay-slot instruction.
        Some(Ok(CfEffect::Branch(target)))
    } else {
        // BT/BF: no delay slot, takes effect immediately.
        cpu.regs.new_pc = target;
        Some(Ok(CfEffect::Plain))
    }
}

/// Top nibble `0x0`: `STC` (lo4=0x2), `BSRF`/`BRAF`/`PREF`/`OCBx`/`MOVCA.L` (lo4=0x3),
/// `MUL.L` (lo4=0x7), `CLRT`-family (lo4=0x8), `NOP`/`DIV0U`/`MOVT` (lo4=0x9),
/// `STS`/`STC` register forms (lo4=0xA), `RTS`/`SLEEP`/`RTE` (lo4=0xB), `MAC.L`
/// (lo4=0xF). The R0-indexed `MOV` forms (lo4=4/5/6/C/D/E) belong to `exec_mem`.
fn exec_0x0(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Option<Result<CfEffect, Trap>> {
    match op & 0xF {
        0x2 => Some(stc_reg(cpu, op).map(|()| CfEffect::Plain)),
        0x3 => exec_0x0_lo3(cpu, bus, op),
        0x7 => {
            // MUL.L Rm,Rn
            super::exec_alu::mul_l(&mut cpu.regs, op);
            Some(Ok(CfEffect::Plain))
        }
        0x8 => exec_0x0_lo8(cpu, op),
        0x9 => exec_0x0_lo9(cpu, op),
        0xA => Some(sts_stc_reg(cpu, op).map(|()| CfEffect::Plain)),
        0xB => exec_0x0_lob(cpu, op),
        0xF => Some(mac_l(cpu, bus, op).map(|()| CfEffect::Plain)),
        _ => None,
    }
}

fn stc_reg(cpu: &mut Cpu, op: u16) -> Result<(), Trap> {
    check_priv(cpu, op)?;
    let rn = n(op);
    if op & 0x80 != 0 {
        // STC Rm_BANK, Rn
        let bank = usize::from((op >> 4) & 0x7);
        cpu.regs.r[rn] = cpu.regs.r_bank[bank];
        return Ok(());
    }
    cpu.regs.r[rn] = match (op >> 4) & 0x7 {
        0x0 => cpu.regs.read_sr(),
        0x1 => cpu.regs.gbr,
        0x2 => cpu.regs.vbr,
        0x3 => cpu.regs.ssr,
        0x4 => cpu.regs.spc,
        _ => return Err(Trap::IllegalInstruction(op)),
    };
    Ok(())
}

fn exec_0x0_lo3(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Option<Result<CfEffect, Trap>> {
    let rn = n(op);
    match (op >> 4) & 0xF {
        0x0 => {
            // BSRF Rn
            if let Err(e) = check_not_in_delay_slot(cpu, op) {
                return Some(Err(e));
            }
            let target = cpu.regs.pc.wrapping_add(4).wrapping_add(cpu.regs.r[rn]);
            cpu.regs.pr = cpu.regs.pc.wrapping_add(4);
            Some(Ok(CfEffect::Branch(target)))
        }
        0x2 => {
            // BRAF Rn
            if let Err(e) = check_not_in_delay_slot(cpu, op) {
                return Some(Err(e));
            }
            let target = cpu.regs.pc.wrapping_add(4).wrapping_add(cpu.regs.r[rn]);
            Some(Ok(CfEffect::Branch(target)))
        }
        0x8 => {
            // PREF @Rn
            Some(prefetch(cpu, bus, rn).map(|()| CfEffect::Plain))
        }
        0x9 | 0xA | 0xB => Some(Ok(CfEffect::Plain)), // OCBI/OCBP/OCBWB: no cache modeled
        0xC => {
            // MOVCA.L R0,@Rn
            let addr = cpu.regs.r[rn];
            let r0 = cpu.regs.r[0];
            Some(bus.write_long(addr, r0).map(|()| CfEffect::Plain))
        }
        _ => None,
    }
}

fn prefetch(cpu: &mut Cpu, bus: &mut dyn Bus, rn: usize) -> Result<(), Trap> {
    let addr = cpu.regs.r[rn];
    if addr & 0xFC00_0000 == 0xE000_0000 {
        let which = usize::from((addr >> 5) & 1);
        bus.flush_store_queue(which, addr)?;
    }
    Ok(())
}

fn exec_0x0_lo8(cpu: &mut Cpu, op: u16) -> Option<Result<CfEffect, Trap>> {
    match (op >> 4) & 0xF {
        0x0 => {
            cpu.regs.flags.t = false;
            Some(Ok(CfEffect::Plain)) // CLRT
        }
        0x1 => {
            cpu.regs.flags.t = true;
            Some(Ok(CfEffect::Plain)) // SETT
        }
        0x2 => {
            cpu.regs.mach = 0;
            cpu.regs.macl = 0;
            Some(Ok(CfEffect::Plain)) // CLRMAC
        }
        0x3 => Some(Ok(CfEffect::Plain)), // LDTLB: TLB reload not modeled here
        0x4 => {
            cpu.regs.flags.s = false;
            Some(Ok(CfEffect::Plain)) // CLRS
        }
        0x5 => {
            cpu.regs.flags.s = true;
            Some(Ok(CfEffect::Plain)) // SETS
        }
        _ => None,
    }
}

fn exec_0x0_lo9(cpu: &mut Cpu, op: u16) -> Option<Result<CfEffect, Trap>> {
    match (op >> 4) & 0xF {
        0x0 => Some(Ok(CfEffect::Plain)), // NOP
        0x1 => {
            super::exec_alu::div0u(&mut cpu.regs);
            Some(Ok(CfEffect::Plain))
        }
        0x2 => {
            cpu.regs.r[n(op)] = u32::from(cpu.regs.flags.t);
            Some(Ok(CfEffect::Plain)) // MOVT Rn
        }
        _ => None,
    }
}

fn sts_stc_reg(cpu: &mut Cpu, op: u16) -> Result<(), Trap> {
    let rn = n(op);
    match (op >> 4) & 0xF {
        0x0 => cpu.regs.r[rn] = cpu.regs.mach,
        0x1 => cpu.regs.r[rn] = cpu.regs.macl,
        0x2 => cpu.regs.r[rn] = cpu.regs.pr,
        0x3 => {
            check_priv(cpu, op)?;
            cpu.regs.r[rn] = cpu.regs.sgr;
        }
        0x5 => cpu.regs.r[rn] = cpu.regs.fpul,
        0x6 => cpu.regs.r[rn] = cpu.regs.fpscr,
        0xF => {
            check_priv(cpu, op)?;
            cpu.regs.r[rn] = cpu.regs.dbr;
        }
        _ => return Err(Trap::IllegalInstruction(op)),
    }
    Ok(())
}

fn exec_0x0_lob(cpu: &mut Cpu, op: u16) -> Option<Result<CfEffect, Trap>> {
    match (op >> 4) & 0xF {
        0x0 => {
            // RTS
            if let Err(e) = check_not_in_delay_slot(cpu, op) {
                return Some(Err(e));
            }
            Some(Ok(CfEffect::Branch(cpu.regs.pr)))
        }
        0x1 => {
            // SLEEP
            cpu.regs.state = if cpu.deep_sleep {
                RunState::Standby
            } else {
                RunState::Sleep
            };
            Some(Ok(CfEffect::Plain))
        }
        0x2 => {
            // RTE
            if let Err(e) = check_priv(cpu, op) {
                return Some(Err(e));
            }
            if let Err(e) = check_not_in_delay_slot(cpu, op) {
                return Some(Err(e));
            }
            let target = cpu.regs.spc;
            cpu.regs.write_sr(cpu.regs.ssr);
            Some(Ok(CfEffect::Branch(target)))
        }
        _ => None,
    }
}

fn mac_l(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    let (rn, rm) = (n(op), m(op));
    // Matches `sh4core.c`'s read-then-increment order: Rn first, then Rm.
    let a = bus.read_long(cpu.regs.r[rn])? as i32;
    cpu.regs.r[rn] = cpu.regs.r[rn].wrapping_add(4);
    let b = bus.read_long(cpu.regs.r[rm])? as i32;
    cpu.regs.r[rm] = cpu.regs.r[rm].wrapping_add(4);
    super::exec_alu::mac_l_accumulate(&mut cpu.regs, a, b);
    Ok(())
}

/// Top nibble `0x4`: `STC.L`/`STS.L` push (lo4=2/3), `LDS.L`/`LDC.L` pop (lo4=6/7),
/// `LDS`/`LDC` register forms (lo4=A/E), `JSR`/`TAS.B`/`JMP` (lo4=B). The shift/
/// rotate family sharing this top nibble's low byte lives in `exec_alu`.
fn exec_0x4(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Option<Result<CfEffect, Trap>> {
    match op & 0xF {
        0x2 => Some(stsl_stcl_push(cpu, bus, op).map(|()| CfEffect::Plain)),
        0x3 => Some(stcl_push_ext(cpu, bus, op).map(|()| CfEffect::Plain)),
        0x6 => Some(ldsl_ldcl_pop(cpu, bus, op).map(|()| CfEffect::Plain)),
        0x7 => Some(ldcl_pop_ext(cpu, bus, op).map(|()| CfEffect::Plain)),
        0xA => Some(lds_ldc_reg(cpu, op).map(|()| CfEffect::Plain)),
        0xB => exec_0x4_lob(cpu, bus, op),
        0xE => Some(lds_ldc_reg_ext(cpu, op).map(|()| CfEffect::Plain)),
        _ => None,
    }
}

fn stsl_stcl_push(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    let rn = n(op);
    let value = match (op >> 4) & 0xF {
        0x0 => cpu.regs.mach,
        0x1 => cpu.regs.macl,
        0x2 => cpu.regs.pr,
        0x3 => {
            check_priv(cpu, op)?;
            cpu.regs.sgr
        }
        0x5 => cpu.regs.fpul,
        0x6 => cpu.regs.fpscr,
        0xF => {
            check_priv(cpu, op)?;
            cpu.regs.dbr
        }
        _ => return Err(Trap::IllegalInstruction(op)),
    };
    let addr = cpu.regs.r[rn].wrapping_sub(4);
    bus.write_long(addr, value)?;
    cpu.regs.r[rn] = addr;
    Ok(())
}

fn stcl_push_ext(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    let rn = n(op);
    let value = if op & 0x80 != 0 {
        check_priv(cpu, op)?;
        let bank = usize::from((op >> 4) & 0x7);
        cpu.regs.r_bank[bank]
    } else {
        match (op >> 4) & 0x7 {
            0x0 => {
                check_priv(cpu, op)?;
                cpu.regs.read_sr()
            }
            0x1 => cpu.regs.gbr,
            0x2 => {
                check_priv(cpu, op)?;
                cpu.regs.vbr
            }
            0x3 => {
                check_priv(cpu, op)?;
                cpu.regs.ssr
            }
            0x4 => {
                check_priv(cpu, op)?;
                cpu.regs.spc
            }
            _ => return Err(Trap::IllegalInstruction(op)),
        }
    };
    let addr = cpu.regs.r[rn].wrapping_sub(4);
    bus.write_long(addr, value)?;
    cpu.regs.r[rn] = addr;
    Ok(())
}

fn ldsl_ldcl_pop(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    let rm = n(op);
    let addr = cpu.regs.r[rm];
    let value = bus.read_long(addr)?;
    match (op >> 4) & 0xF {
        0x0 => cpu.regs.mach = value,
        0x1 => cpu.regs.macl = value,
        0x2 => cpu.regs.pr = value,
        0x3 => {
            check_priv(cpu, op)?;
            cpu.regs.sgr = value;
        }
        0x5 => cpu.regs.fpul = value,
        0x6 => cpu.regs.fpscr = value,
        0xF => {
            check_priv(cpu, op)?;
            cpu.regs.dbr = value;
        }
        _ => return Err(Trap::IllegalInstruction(op)),
    }
    cpu.regs.r[rm] = addr.wrapping_add(4);
    Ok(())
}

fn ldcl_pop_ext(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Result<(), Trap> {
    let rm = n(op);
    let addr = cpu.regs.r[rm];
    if op & 0x80 != 0 {
        check_priv(cpu, op)?;
        let bank = usize::from((op >> 4) & 0x7);
        let value = bus.read_long(addr)?;
        cpu.regs.r_bank[bank] = value;
        cpu.regs.r[rm] = addr.wrapping_add(4);
        return Ok(());
    }
    match (op >> 4) & 0x7 {
        0x0 => {
            check_not_in_delay_slot(cpu, op)?;
            check_priv(cpu, op)?;
            let value = bus.read_long(addr)?;
            cpu.regs.write_sr(value);
        }
        0x1 => {
            let value = bus.read_long(addr)?;
            cpu.regs.gbr = value;
        }
        0x2 => {
            check_priv(cpu, op)?;
            let value = bus.read_long(addr)?;
            cpu.regs.vbr = value;
        }
        0x3 => {
            check_priv(cpu, op)?;
            let value = bus.read_long(addr)?;
            cpu.regs.ssr = value;
        }
        0x4 => {
            check_priv(cpu, op)?;
            let value = bus.read_long(addr)?;
            cpu.regs.spc = value;
        }
        _ => return Err(Trap::IllegalInstruction(op)),
    }
    cpu.regs.r[rm] = addr.wrapping_add(4);
    Ok(())
}

fn lds_ldc_reg(cpu: &mut Cpu, op: u16) -> Result<(), Trap> {
    let rm = n(op);
    let value = cpu.regs.r[rm];
    match (op >> 4) & 0xF {
        0x0 => cpu.regs.mach = value,
        0x1 => cpu.regs.macl = value,
        0x2 => cpu.regs.pr = value,
        0x3 => {
            check_priv(cpu, op)?;
            cpu.regs.sgr = value;
        }
        0x5 => cpu.regs.fpul = value,
        0x6 => cpu.regs.fpscr = value,
        0xF => {
            check_priv(cpu, op)?;
            cpu.regs.dbr = value;
        }
        _ => return Err(Trap::IllegalInstruction(op)),
    }
    Ok(())
}

fn lds_ldc_reg_ext(cpu: &mut Cpu, op: u16) -> Result<(), Trap> {
    let rm = n(op);
    let value = cpu.regs.r[rm];
    if op & 0x80 != 0 {
        check_priv(cpu, op)?;
        let bank = usize::from((op >> 4) & 0x7);
        cpu.regs.r_bank[bank] = value;
        return Ok(());
    }
    match (op >> 4) & 0x7 {
        0x0 => {
            check_not_in_delay_slot(cpu, op)?;
            check_priv(cpu, op)?;
            cpu.regs.write_sr(value);
        }
        0x1 => cpu.regs.gbr = value,
        0x2 => {
            check_priv(cpu, op)?;
            cpu.regs.vbr = value;
        }
        0x3 => {
            check_priv(cpu, op)?;
            cpu.regs.ssr = value;
        }
        0x4 => {
            check_priv(cpu, op)?;
            cpu.regs.spc = value;
        }
        _ => return Err(Trap::IllegalInstruction(op)),
    }
    Ok(())
}

fn exec_0x4_lob(cpu: &mut Cpu, bus: &mut dyn Bus, op: u16) -> Option<Result<CfEffect, Trap>> {
    let rn = n(op);
    match (op >> 4) & 0xF {
        0x0 => {
            // JSR @Rn
            if let Err(e) = check_not_in_delay_slot(cpu, op) {
                return Some(Err(e));
            }
            cpu.regs.pr = cpu.regs.pc.wrapping_add(4);
            Some(Ok(CfEffect::Branch(cpu.regs.r[rn])))
        }
        0x1 => {
            // TAS.B @Rn
            Some(tas_b(cpu, bus, rn).map(|()| CfEffect::Plain))
        }
        0x2 => {
            // JMP @Rn
            if let Err(e) = check_not_in_delay_slot(cpu, op) {
                return Some(Err(e));
            }
            Some(Ok(CfEffect::Branch(cpu.regs.r[rn])))
        }
        _ => None,
    }
}

fn tas_b(cpu: &mut Cpu, bus: &mut dyn Bus, rn: usize) -> Result<(), Trap> {
    let addr = cpu.regs.r[rn];
    let v = bus.read_byte(addr)?;
    cpu.regs.flags.t = v == 0;
    bus.write_byte(addr, v | 0x80)
}

/// `TRAPA #imm`: raises `Trap::Trap` with `TRA = imm << 2` recorded by the caller.
#[must_use]
pub fn trapa_imm(op: u16) -> u8 {
    d8(op) as u8
}

/// `FSCHG`/`FRCHG`: toggle FPSCR's SZ/FR bits (handled here since they're encoded in
/// the `0xF` top-nibble system-instruction space alongside other FPU control ops,
/// but don't themselves touch the float banks).
pub fn toggle_fpscr_bit(cpu: &mut Cpu, bit: u32) {
    cpu.regs.fpscr ^= bit;
}

/// Mask for `FSCHG` (toggles SZ).
pub const FSCHG_BIT: u32 = fpscr_bits::SZ;
/// Mask for `FRCHG` (toggles FR).
pub const FRCHG_BIT: u32 = fpscr_bits::FR;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Cpu;
    use crate::memmap::MemoryMap;

    #[test]
    fn bsrf_sets_pr_and_targets_pc_plus_4_plus_rn() {
        let mut cpu = Cpu::new(0x8C00_1000, 0x8C00_0000);
        cpu.regs.r[3] = 0x20;
        let mut bus = MemoryMap::new(4096);
        // BSRF R3 : 0000 0011 0000 0011 (n=3, lo4=0x3, sel=0x0)
        let effect = exec_0x0_lo3(&mut cpu, &mut bus, 0x0303).unwrap().unwrap();
        assert!(matches!(effect, CfEffect::Branch(t) if t == 0x8C00_1024));
        assert_eq!(cpu.regs.pr, 0x8C00_1004);
    }

    #[test]
    fn jsr_targets_rn_and_sets_pr() {
        let mut cpu = Cpu::new(0x8C00_2000, 0x8C00_0000);
        cpu.regs.r[4] = 0x8C01_0000;
        let mut bus = MemoryMap::new(4096);
        // JSR @R4 : 0100 0100 0000 1011 (n=4, lo4=0xB, sel=0x0)
        let effect = exec_0x4_lob(&mut cpu, &mut bus, 0x440B).unwrap().unwrap();
        assert!(matches!(effect, CfEffect::Branch(t) if t == 0x8C01_0000));
        assert_eq!(cpu.regs.pr, 0x8C00_2004);
    }

    #[test]
    fn rts_branches_to_pr() {
        let mut cpu = Cpu::new(0x8C00_0000, 0x8C00_0000);
        cpu.regs.pr = 0x8C00_9000;
        // RTS : 0000 0000 0000 1011
        let effect = exec_0x0_lob(&mut cpu, 0x000B).unwrap().unwrap();
        assert!(matches!(effect, CfEffect::Branch(t) if t == 0x8C00_9000));
    }

    #[test]
    fn stc_sr_requires_privilege() {
        let mut cpu = Cpu::new(0x8C00_0000, 0x8C00_0000);
        cpu.regs.sr_ctrl.md = false;
        // STC SR,R0 : 0000 0000 0000 0010 (n=0, lo4=0x2, sel=0x0)
        let err = stc_reg(&mut cpu, 0x0002).unwrap_err();
        assert!(matches!(err, Trap::IllegalInstruction(_)));
    }
}
