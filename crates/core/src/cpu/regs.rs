//! The SH4 register file: general registers with the bank-swap pair, control
//! registers, the FPU's two float banks, and the flag cache that mirrors SR's
//! condition bits.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// SR status bits, as flat booleans kept in sync with the packed `sr` word on every
/// read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    /// The T (test/carry) bit, result of compare/test/shift/rotate instructions.
    pub t: bool,
    /// The S (saturation) bit, selects saturating vs. wrapping MAC accumulation.
    pub s: bool,
    /// The M bit, dividend sign scratch for DIV0S/DIV1.
    pub m: bool,
    /// The Q bit, divisor-vs-quotient sign scratch for DIV0S/DIV1.
    pub q: bool,
}

/// CPU run state, set by `SLEEP` and cleared by an unmasked interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Normal instruction execution.
    Running,
    /// Parked by `SLEEP` with `CPG.STBCR.SLEEP` clear; resumes on any unmasked
    /// interrupt.
    Sleep,
    /// Parked by `SLEEP` with `CPG.STBCR.SLEEP` set; a deeper low-power state that
    /// also resumes on an unmasked interrupt but clears more peripheral state on
    /// wake. Distinguished from `Sleep` only by which wake path the scheduler takes.
    Standby,
    /// Fatally halted on an integrity fault (VBR unset, instruction fetch from
    /// MMIO). Unlike `Sleep`/`Standby`, no event resumes this state.
    Halted,
}

/// SR's other privileged/control bits, packed separately from the flag cache so
/// `write_sr` can reconstruct a bit-identical `sr` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SrControlBits {
    /// Register bank select; toggling exchanges r0..r7 with r_bank0..r_bank7.
    pub rb: bool,
    /// Block bit; set on exception entry, blocks further exceptions until cleared.
    pub bl: bool,
    /// Processor mode; `true` = privileged.
    pub md: bool,
    /// FPU disable.
    pub fd: bool,
    /// Interrupt mask level, 0..15.
    pub imask: u8,
}

/// The full SH4 register file. A single process-wide instance, reset on
/// [`Registers::reset`], bit-identically round-tripped through save-state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registers {
    /// General registers r0..r15 (the active bank for r0..r7 per SR.RB).
    pub r: [u32; 16],
    /// The alternate bank for r0..r7, swapped in whenever SR.RB toggles.
    pub r_bank: [u32; 8],
    /// Condition/scratch flag cache, authoritative over the bits packed in `sr`.
    pub flags: Flags,
    /// SR's remaining control bits.
    pub sr_ctrl: SrControlBits,
    pub gbr: u32,
    pub vbr: u32,
    pub ssr: u32,
    pub spc: u32,
    pub sgr: u32,
    pub dbr: u32,
    pub pr: u32,
    /// High and low halves of the 64-bit (48-bit-saturating) MAC accumulator.
    pub mach: u32,
    pub macl: u32,
    pub fpscr: u32,
    pub fpul: u32,
    /// One of the two float banks; which one is `FR` vs `XF` is selected by
    /// `fpscr`'s FR bit (bank 0 active when FR=0).
    pub fr_bank0: [u32; 16],
    /// The other float bank.
    pub fr_bank1: [u32; 16],
    /// Current program counter.
    pub pc: u32,
    /// Next program counter; `pc <- new_pc` happens at instruction retire, so
    /// `new_pc` is what a branch mutates to implement its delay slot.
    pub new_pc: u32,
    /// Whether the instruction about to execute is in a delay slot.
    pub in_delay_slot: bool,
    /// The PC a just-retired branch wants to take effect once its delay-slot
    /// instruction finishes, per `spec.md`'s `new_pc`-driven delay-slot model.
    pub delayed_branch_target: Option<u32>,
    /// Cumulative simulated time consumed in the current `run_slice` call, in
    /// instruction-period units (this crate's name for the SH4 instruction
    /// counter referenced throughout the ASIC and translator designs).
    pub slice_cycle: u64,
    /// CPU run state (Running/Sleep/Standby).
    pub state: RunState,
    /// Bitmask of pending asynchronous events (timer expiry, interrupt request)
    /// not yet delivered.
    pub event_pending: u32,
}

/// FPSCR bit positions.
pub mod fpscr_bits {
    /// Rounding/bank select: floating registers bank (FR/XF swap).
    pub const FR: u32 = 1 << 21;
    /// Transfer size for `FMOV`/`FLDI`-family pair operations (0=single, 1=double).
    pub const SZ: u32 = 1 << 20;
    /// Precision: 0 = single, 1 = double for arithmetic ops.
    pub const PR: u32 = 1 << 19;
}

impl Registers {
    /// Builds a fresh register file at the given boot PC/VBR, all other state zeroed
    /// per SH4 reset semantics (MD=1, BL=1, RB=1, FPSCR=0x0004_0001 per the SH4
    /// hardware manual's reset value, IMASK=0xF).
    #[must_use]
    pub fn reset_at(pc: u32, vbr: u32) -> Self {
        Self {
            r: [0; 16],
            r_bank: [0; 8],
            flags: Flags {
                t: false,
                s: false,
                m: false,
                q: false,
            },
            sr_ctrl: SrControlBits {
                rb: true,
                bl: true,
                md: true,
                fd: false,
                imask: 0xF,
            },
            gbr: 0,
            vbr,
            ssr: 0,
            spc: 0,
            sgr: 0,
            dbr: 0,
            pr: 0,
            mach: 0,
            macl: 0,
            fpscr: 0x0004_0001,
            fpul: 0,
            fr_bank0: [0; 16],
            fr_bank1: [0; 16],
            pc,
            new_pc: pc.wrapping_add(2),
            in_delay_slot: false,
            delayed_branch_target: None,
            slice_cycle: 0,
            state: RunState::Running,
            event_pending: 0,
        }
    }

    /// Resets this register file in place to the state [`Registers::reset_at`]
    /// would build, without reallocating.
    pub fn reset(&mut self, pc: u32, vbr: u32) {
        *self = Self::reset_at(pc, vbr);
    }

    /// Packs the flag cache and control bits into a full 32-bit SR value.
    #[must_use]
    pub fn read_sr(&self) -> u32 {
        let mut sr: u32 = 0;
        sr |= u32::from(self.flags.t);
        sr |= u32::from(self.flags.s) << 1;
        sr |= u32::from(self.flags.m) << 9;
        sr |= u32::from(self.flags.q) << 8;
        sr |= u32::from(self.sr_ctrl.rb) << 29;
        sr |= u32::from(self.sr_ctrl.bl) << 28;
        sr |= u32::from(self.sr_ctrl.md) << 30;
        sr |= u32::from(self.sr_ctrl.fd) << 15;
        sr |= u32::from(self.sr_ctrl.imask) << 4;
        sr
    }

    /// Unpacks `value` into the flag cache and control bits, exchanging the
    /// r0..r7/r_bank0..r_bank7 banks if RB changed as a result.
    pub fn write_sr(&mut self, value: u32) {
        let new_rb = (value >> 29) & 1 != 0;
        if new_rb != self.sr_ctrl.rb {
            for i in 0..8 {
                std::mem::swap(&mut self.r[i], &mut self.r_bank[i]);
            }
        }
        self.flags.t = value & 1 != 0;
        self.flags.s = (value >> 1) & 1 != 0;
        self.flags.q = (value >> 8) & 1 != 0;
        self.flags.m = (value >> 9) & 1 != 0;
        self.sr_ctrl.imask = ((value >> 4) & 0xF) as u8;
        self.sr_ctrl.fd = (value >> 15) & 1 != 0;
        self.sr_ctrl.bl = (value >> 28) & 1 != 0;
        self.sr_ctrl.md = (value >> 30) & 1 != 0;
        self.sr_ctrl.rb = new_rb;
    }

    /// Reads FR(i): bank0 when FPSCR.FR is clear, bank1 otherwise.
    #[must_use]
    pub fn fr(&self, i: usize) -> u32 {
        if self.fpscr & fpscr_bits::FR == 0 {
            self.fr_bank0[i]
        } else {
            self.fr_bank1[i]
        }
    }

    /// Writes FR(i).
    pub fn set_fr(&mut self, i: usize, v: u32) {
        if self.fpscr & fpscr_bits::FR == 0 {
            self.fr_bank0[i] = v;
        } else {
            self.fr_bank1[i] = v;
        }
    }

    /// Reads XF(i): the bank FR(i) is *not* currently reading from.
    #[must_use]
    pub fn xf(&self, i: usize) -> u32 {
        if self.fpscr & fpscr_bits::FR == 0 {
            self.fr_bank1[i]
        } else {
            self.fr_bank0[i]
        }
    }

    /// Writes XF(i).
    pub fn set_xf(&mut self, i: usize, v: u32) {
        if self.fpscr & fpscr_bits::FR == 0 {
            self.fr_bank1[i] = v;
        } else {
            self.fr_bank0[i] = v;
        }
    }

    /// Reads DR(i): the 64-bit double formed from the pair `(FR(i), FR(i|1))`, most
    /// significant word first.
    #[must_use]
    pub fn dr(&self, i: usize) -> f64 {
        let hi = self.fr(i & !1);
        let lo = self.fr((i & !1) | 1);
        f64::from_bits((u64::from(hi) << 32) | u64::from(lo))
    }

    /// Writes DR(i).
    pub fn set_dr(&mut self, i: usize, v: f64) {
        let bits = v.to_bits();
        self.set_fr(i & !1, (bits >> 32) as u32);
        self.set_fr((i & !1) | 1, bits as u32);
    }

    /// The 48-bit-sign-extended MAC accumulator as a 64-bit value (MACH:MACL).
    #[must_use]
    pub fn mac(&self) -> i64 {
        ((u64::from(self.mach) << 32) | u64::from(self.macl)) as i64
    }

    /// Overwrites the MAC accumulator from a 64-bit value.
    pub fn set_mac(&mut self, v: i64) {
        let bits = v as u64;
        self.mach = (bits >> 32) as u32;
        self.macl = bits as u32;
    }

    /// Dumps every field as a fixed-layout little-endian byte stream, the
    /// "SH4 core" module's contribution to the save-state format.
    pub fn write_raw(&self, out: &mut dyn Write) -> io::Result<()> {
        for v in self.r {
            out.write_all(&v.to_le_bytes())?;
        }
        for v in self.r_bank {
            out.write_all(&v.to_le_bytes())?;
        }
        out.write_all(&[
            u8::from(self.flags.t),
            u8::from(self.flags.s),
            u8::from(self.flags.m),
            u8::from(self.flags.q),
            u8::from(self.sr_ctrl.rb),
            u8::from(self.sr_ctrl.bl),
            u8::from(self.sr_ctrl.md),
            u8::from(self.sr_ctrl.fd),
            self.sr_ctrl.imask,
        ])?;
        for v in [
            self.gbr, self.vbr, self.ssr, self.spc, self.sgr, self.dbr, self.pr, self.mach,
            self.macl, self.fpscr, self.fpul,
        ] {
            out.write_all(&v.to_le_bytes())?;
        }
        for v in self.fr_bank0 {
            out.write_all(&v.to_le_bytes())?;
        }
        for v in self.fr_bank1 {
            out.write_all(&v.to_le_bytes())?;
        }
        out.write_all(&self.pc.to_le_bytes())?;
        out.write_all(&self.new_pc.to_le_bytes())?;
        out.write_all(&[u8::from(self.in_delay_slot)])?;
        match self.delayed_branch_target {
            Some(target) => {
                out.write_all(&[1])?;
                out.write_all(&target.to_le_bytes())?;
            }
            None => {
                out.write_all(&[0])?;
                out.write_all(&0u32.to_le_bytes())?;
            }
        }
        out.write_all(&self.slice_cycle.to_le_bytes())?;
        let state = match self.state {
            RunState::Running => 0u8,
            RunState::Sleep => 1,
            RunState::Standby => 2,
            RunState::Halted => 3,
        };
        out.write_all(&[state])?;
        out.write_all(&self.event_pending.to_le_bytes())
    }

    /// Restores a register file previously serialized by [`Registers::write_raw`].
    pub fn read_raw(input: &mut dyn Read) -> io::Result<Self> {
        let mut regs = Self::reset_at(0, 0);
        for slot in &mut regs.r {
            *slot = read_u32(input)?;
        }
        for slot in &mut regs.r_bank {
            *slot = read_u32(input)?;
        }
        let mut flag_bytes = [0u8; 9];
        input.read_exact(&mut flag_bytes)?;
        regs.flags = Flags {
            t: flag_bytes[0] != 0,
            s: flag_bytes[1] != 0,
            m: flag_bytes[2] != 0,
            q: flag_bytes[3] != 0,
        };
        regs.sr_ctrl = SrControlBits {
            rb: flag_bytes[4] != 0,
            bl: flag_bytes[5] != 0,
            md: flag_bytes[6] != 0,
            fd: flag_bytes[7] != 0,
            imask: flag_bytes[8],
        };
        regs.gbr = read_u32(input)?;
        regs.vbr = read_u32(input)?;
        regs.ssr = read_u32(input)?;
        regs.spc = read_u32(input)?;
        regs.sgr = read_u32(input)?;
        regs.dbr = read_u32(input)?;
        regs.pr = read_u32(input)?;
        regs.mach = read_u32(input)?;
        regs.macl = read_u32(input)?;
        regs.fpscr = read_u32(input)?;
        regs.fpul = read_u32(input)?;
        for slot in &mut regs.fr_bank0 {
            *slot = read_u32(input)?;
        }
        for slot in &mut regs.fr_bank1 {
            *slot = read_u32(input)?;
        }
        regs.pc = read_u32(input)?;
        regs.new_pc = read_u32(input)?;
        let mut one = [0u8; 1];
        input.read_exact(&mut one)?;
        regs.in_delay_slot = one[0] != 0;
        input.read_exact(&mut one)?;
        let has_target = one[0] != 0;
        let target = read_u32(input)?;
        regs.delayed_branch_target = has_target.then_some(target);
        regs.slice_cycle = read_u64(input)?;
        input.read_exact(&mut one)?;
        regs.state = match one[0] {
            1 => RunState::Sleep,
            2 => RunState::Standby,
            3 => RunState::Halted,
            _ => RunState::Running,
        };
        regs.event_pending = read_u32(input)?;
        Ok(regs)
    }
}

fn read_u32(input: &mut dyn Read) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(input: &mut dyn Read) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_sr_then_read_sr_round_trips() {
        let mut regs = Registers::reset_at(0x8C00_0000, 0x8C00_0000);
        let value = 0x6000_03F1;
        regs.write_sr(value);
        assert_eq!(regs.read_sr(), value);
    }

    #[test]
    fn toggling_rb_swaps_r0_7_with_bank_leaving_r8_15_untouched() {
        let mut regs = Registers::reset_at(0, 0);
        for i in 0..16 {
            regs.r[i] = i as u32 + 1;
        }
        regs.r_bank = [100, 101, 102, 103, 104, 105, 106, 107];
        let r8_15_before = regs.r[8..16].to_vec();

        let sr = regs.read_sr();
        assert!(regs.sr_ctrl.rb); // reset state has RB=1
        regs.write_sr(sr & !(1 << 29)); // clear RB -> swap

        assert_eq!(regs.r[0..8], [100, 101, 102, 103, 104, 105, 106, 107]);
        assert_eq!(regs.r_bank, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&regs.r[8..16], r8_15_before.as_slice());
    }

    #[test]
    fn write_raw_then_read_raw_round_trips() {
        let mut regs = Registers::reset_at(0x8C00_0000, 0x8C00_0000);
        regs.r[3] = 0x1234_5678;
        regs.set_mac(-42);
        regs.delayed_branch_target = Some(0x8C00_1000);
        let mut buf = Vec::new();
        regs.write_raw(&mut buf).unwrap();
        let restored = Registers::read_raw(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.r[3], 0x1234_5678);
        assert_eq!(restored.mac(), -42);
        assert_eq!(restored.delayed_branch_target, Some(0x8C00_1000));
    }

    #[test]
    fn mac_round_trips_through_mach_macl() {
        let mut regs = Registers::reset_at(0, 0);
        regs.set_mac(-1);
        assert_eq!(regs.mach, 0xFFFF_FFFF);
        assert_eq!(regs.macl, 0xFFFF_FFFF);
        assert_eq!(regs.mac(), -1);
    }
}
