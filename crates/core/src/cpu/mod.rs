//! The SH4 interpreter core: register file, per-opcode-class execution modules,
//! and the `step`/`run_slice` loop that ties decode, dispatch, delay slots, and
//! exception entry together.
//!
//! Decoding is split by top nibble across `exec_alu` (arithmetic/logic/shift),
//! `exec_mem` (load/store addressing modes), `exec_cf` (branches, delay slots,
//! `LDC`/`STC`/`LDS`/`STS`, system instructions), and `exec_fpu` (the `0xF`
//! top-nibble float unit). `try_exec` in each returns `None` when `op` isn't in
//! its class, so `step` just tries each in turn.

mod decode;
mod exec_alu;
mod exec_cf;
mod exec_fpu;
mod exec_mem;
pub mod regs;

pub use exec_cf::{is_control_transfer, CfEffect};
pub use regs::{Flags, Registers, RunState, SrControlBits};

use crate::common::error::{CoreError, FetchFault, Trap};
use crate::memmap::Bus;

/// One SH4 CPU core. ARM7DI-side emulation (the AICA sound CPU) is a separate,
/// simpler interpreter in `arm7`; this type is SH4-specific.
#[derive(Debug, Clone)]
pub struct Cpu {
    pub regs: Registers,
    /// Whether `SLEEP` parks the core in `Standby` (deep, `CPG.STBCR.STBY` set)
    /// rather than plain `Sleep`. Set by the SoC's power-control register write,
    /// not by the CPU itself.
    pub deep_sleep: bool,
    /// Last exception code latched into `EXPEVT`/`INTEVT`.
    pub expevt: u32,
    /// Set when `regs.state` becomes `RunState::Halted`; the integrity fault
    /// message that caused it, kept for the caller to report. Never serialized:
    /// a restored save-state is never already halted.
    pub fault: Option<String>,
}

impl Cpu {
    /// Builds a core reset to `pc` with `VBR` preloaded (the boot ROM sets `VBR`
    /// before jumping; save-state restore does the same via [`Cpu::reset`]).
    #[must_use]
    pub fn new(pc: u32, vbr: u32) -> Self {
        Self {
            regs: Registers::reset_at(pc, vbr),
            deep_sleep: false,
            expevt: 0,
            fault: None,
        }
    }

    /// Resets this core in place, as `Cpu::new` would build it.
    pub fn reset(&mut self, pc: u32, vbr: u32) {
        self.regs.reset(pc, vbr);
        self.deep_sleep = false;
        self.expevt = 0;
        self.fault = None;
    }

    /// Fatally halts the core: `regs.state` becomes `RunState::Halted` (no event
    /// resumes it) and `err` is latched for the caller to surface.
    fn halt(&mut self, err: CoreError) {
        tracing::error!(error = %err, "cpu: integrity fault, halting");
        self.fault = Some(err.to_string());
        self.regs.state = RunState::Halted;
    }

    /// Raises `event` (an ASIC/timer interrupt request, already priority-checked
    /// against `SR.IMASK` by the caller) so the next `step` wakes a parked core
    /// and, at the next instruction boundary, enters the exception sequence.
    pub fn raise_interrupt(&mut self, bus: &mut dyn Bus, intevt: u32) {
        if matches!(self.regs.state, RunState::Halted) {
            return;
        }
        self.regs.event_pending |= 1;
        if !matches!(self.regs.state, RunState::Running) {
            self.regs.state = RunState::Running;
        }
        self.enter_exception(bus, Trap::Trap(0), Some(intevt));
    }

    /// Executes one instruction, or does nothing if parked in `Sleep`/`Standby`
    /// with no pending event, or `Halted` (which no event resumes). Traps are
    /// fully handled here: `step` never propagates a `Trap` to the caller, it
    /// reifies as an exception sequence; a fatal integrity fault halts instead.
    pub fn step(&mut self, bus: &mut dyn Bus) {
        if matches!(self.regs.state, RunState::Halted) {
            return;
        }
        if !matches!(self.regs.state, RunState::Running) {
            if self.regs.event_pending == 0 {
                return;
            }
            self.regs.state = RunState::Running;
        }

        self.regs.in_delay_slot = self.regs.delayed_branch_target.is_some();
        let pc = self.regs.pc;
        let op = match bus.fetch(pc) {
            Ok(op) => op,
            Err(FetchFault::Trap(trap)) => {
                self.enter_exception(bus, trap, None);
                return;
            }
            Err(FetchFault::Fatal(err)) => {
                self.halt(err);
                return;
            }
        };
        self.execute_cached(bus, op);
    }

    /// Executes one already-decoded opcode exactly as `step` would after its own
    /// `bus.fetch`: dispatch, PC/delay-slot commit, and exception entry on trap.
    /// Used directly by the translator so cached blocks replay without refetching
    /// or redecoding. Returns `false` if the opcode trapped or halted the core —
    /// the translator must stop replaying the rest of its cached block, since
    /// control has already transferred to the exception vector (or nowhere).
    pub(crate) fn execute_cached(&mut self, bus: &mut dyn Bus, op: u16) -> bool {
        self.regs.in_delay_slot = self.regs.delayed_branch_target.is_some();
        match self.execute_one(bus, op) {
            Ok(delayed) => {
                self.regs.slice_cycle += 1;
                if let Some(commit_target) = self.regs.delayed_branch_target.take() {
                    self.regs.pc = commit_target;
                    self.regs.new_pc = commit_target.wrapping_add(2);
                } else {
                    self.regs.pc = self.regs.new_pc;
                    self.regs.new_pc = self.regs.pc.wrapping_add(2);
                }
                if let Some(target) = delayed {
                    self.regs.delayed_branch_target = Some(target);
                }
                self.regs.in_delay_slot = false;
                true
            }
            Err(trap) => {
                self.enter_exception(bus, trap, None);
                false
            }
        }
    }

    /// Runs until `self.regs.slice_cycle` has advanced by `instructions`, the
    /// unit a caller (the SoC's scheduler, driving ASIC/AICA timers off the same
    /// clock) uses to interleave CPU execution with peripheral ticks.
    pub fn run_slice(&mut self, bus: &mut dyn Bus, instructions: u64) {
        let target = self.regs.slice_cycle.wrapping_add(instructions);
        while self.regs.slice_cycle < target {
            if matches!(self.regs.state, RunState::Halted) {
                break;
            }
            if !matches!(self.regs.state, RunState::Running) && self.regs.event_pending == 0 {
                // Parked with nothing to wake it: stop early rather than spin.
                // `slice_cycle` doesn't advance, matching real hardware's clock
                // gating while asleep; the scheduler still ticks peripherals.
                break;
            }
            self.step(bus);
        }
    }

    /// Dispatches `op` to the exec module that claims it. `Ok(Some(target))`
    /// means a delay-slotted branch was just decoded and `target` should be
    /// armed as `delayed_branch_target` once this step retires; `Ok(None)`
    /// means plain retirement (possibly to a `new_pc` an immediate branch, i.e.
    /// `BT`/`BF`, already overwrote).
    fn execute_one(&mut self, bus: &mut dyn Bus, op: u16) -> Result<Option<u32>, Trap> {
        self.regs.new_pc = self.regs.pc.wrapping_add(2);
        if self.regs.in_delay_slot && exec_cf::is_control_transfer(op) {
            return Err(Trap::SlotIllegal(op));
        }
        if let Some(result) = exec_cf::try_exec(self, bus, op) {
            return match result? {
                CfEffect::NotHandled => Ok(None),
                CfEffect::Plain => Ok(None),
                CfEffect::Branch(target) => Ok(Some(target)),
            };
        }
        if let Some(result) = exec_fpu::try_exec(self, bus, op) {
            result?;
            return Ok(None);
        }
        if let Some(result) = exec_mem::try_exec(&mut self.regs, bus, op) {
            result?;
            return Ok(None);
        }
        if let Some(result) = exec_alu::try_exec(&mut self.regs, op) {
            result?;
            return Ok(None);
        }
        Err(Trap::IllegalInstruction(op))
    }

    /// Runs the SH4 exception sequence: save `PC`/`SR`/`R15` to `SPC`/`SSR`/`SGR`,
    /// latch `EXPEVT` (or `INTEVT` when `intevt` is given), force `MD`/`BL` set and
    /// the bank-0 register file active, and jump to `VBR + vector_offset`. A zero
    /// `VBR` at this point means the boot sequence never initialized it — jumping
    /// there would run whatever happens to be at physical address 0, so this
    /// halts the core instead per `spec.md` §4.3/§7.
    fn enter_exception(&mut self, _bus: &mut dyn Bus, trap: Trap, intevt: Option<u32>) {
        if self.regs.vbr == 0 {
            self.halt(CoreError::IntegrityFault(
                "exception raised with VBR unset".to_string(),
            ));
            return;
        }
        self.regs.spc = self.regs.pc;
        self.regs.ssr = self.regs.read_sr();
        self.regs.sgr = self.regs.r[15];
        self.expevt = intevt.unwrap_or_else(|| trap.expevt());
        if !self.regs.sr_ctrl.rb {
            for i in 0..8 {
                std::mem::swap(&mut self.regs.r[i], &mut self.regs.r_bank[i]);
            }
        }
        self.regs.sr_ctrl.rb = true;
        self.regs.sr_ctrl.bl = true;
        self.regs.sr_ctrl.md = true;
        // Interrupts (INTEVT given) take the dedicated 0x600 vector; synchronous
        // exceptions use `trap`'s own general (0x100) or TLB-miss (0x400) vector.
        let vector_offset = if intevt.is_some() {
            0x600
        } else {
            trap.vector_offset()
        };
        self.regs.pc = self.regs.vbr.wrapping_add(vector_offset);
        self.regs.new_pc = self.regs.pc.wrapping_add(2);
        self.regs.delayed_branch_target = None;
        self.regs.in_delay_slot = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memmap::MemoryMap;

    fn load(bus: &mut MemoryMap, pc: u32, words: &[u16]) {
        let mut bytes = Vec::with_capacity(words.len() * 2);
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        bus.load_image(pc, &bytes);
    }

    #[test]
    fn add_immediate_retires_and_advances_pc() {
        let mut cpu = Cpu::new(0x0C00_0000, 0x8C00_0000);
        let mut bus = MemoryMap::new(4096);
        // ADD #5,R0 : 0111 0000 0000 0101
        load(&mut bus, 0x0C00_0000, &[0x7005]);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.r[0], 5);
        assert_eq!(cpu.regs.pc, 0x0C00_0002);
    }

    #[test]
    fn bra_delay_slot_executes_before_branch_commits() {
        let mut cpu = Cpu::new(0x0C00_0000, 0x8C00_0000);
        let mut bus = MemoryMap::new(4096);
        // BRA +4 (target = pc+4+4*2=0x0C00_000C), delay slot ADD #1,R0
        load(&mut bus, 0x0C00_0000, &[0xA004, 0x7001]);
        cpu.step(&mut bus); // BRA: arms delayed_branch_target, pc -> delay slot
        assert_eq!(cpu.regs.pc, 0x0C00_0002);
        assert!(cpu.regs.in_delay_slot || cpu.regs.delayed_branch_target.is_some());
        cpu.step(&mut bus); // delay slot ADD executes, branch commits
        assert_eq!(cpu.regs.r[0], 1);
        assert_eq!(cpu.regs.pc, 0x0C00_000C);
    }

    #[test]
    fn illegal_instruction_enters_exception_sequence() {
        let mut cpu = Cpu::new(0x0C00_0000, 0x8C00_0000);
        let mut bus = MemoryMap::new(4096);
        // 0xFFFD is not a valid FPU encoding (sel=0xD group, unmapped), traps.
        load(&mut bus, 0x0C00_0000, &[0xFFFD]);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.spc, 0x0C00_0000);
        assert!(cpu.regs.sr_ctrl.md);
        assert!(cpu.regs.sr_ctrl.bl);
        assert_eq!(cpu.regs.pc, cpu.regs.vbr.wrapping_add(0x100));
        assert_eq!(cpu.expevt, Trap::IllegalInstruction(0).expevt());
    }

    #[test]
    fn raise_interrupt_uses_the_dedicated_0x600_vector() {
        let mut cpu = Cpu::new(0x0C00_0000, 0x8C00_0000);
        let mut bus = MemoryMap::new(4096);
        cpu.raise_interrupt(&mut bus, 0x320);
        assert_eq!(cpu.regs.pc, cpu.regs.vbr.wrapping_add(0x600));
        assert_eq!(cpu.expevt, 0x320);
    }

    #[test]
    fn sleep_parks_the_core_until_an_event_is_pending() {
        let mut cpu = Cpu::new(0x0C00_0000, 0x8C00_0000);
        let mut bus = MemoryMap::new(4096);
        // SLEEP : 0000 0000 0001 1011
        load(&mut bus, 0x0C00_0000, &[0x001B]);
        cpu.step(&mut bus);
        assert!(matches!(cpu.regs.state, RunState::Sleep));
        let pc_before = cpu.regs.pc;
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.pc, pc_before, "parked core shouldn't advance");
        cpu.regs.event_pending = 1;
        cpu.step(&mut bus);
        assert!(matches!(cpu.regs.state, RunState::Running));
    }

    #[test]
    fn exception_with_unset_vbr_halts_instead_of_vectoring() {
        let mut cpu = Cpu::new(0x0C00_0000, 0);
        let mut bus = MemoryMap::new(4096);
        // 0xFFFD traps as an illegal instruction.
        load(&mut bus, 0x0C00_0000, &[0xFFFD]);
        cpu.step(&mut bus);
        assert!(matches!(cpu.regs.state, RunState::Halted));
        assert!(cpu.fault.is_some());
        assert_eq!(cpu.regs.pc, 0x0C00_0000, "pc must not jump to a zero vector base");
    }

    #[test]
    fn halted_core_never_resumes_even_with_a_pending_event() {
        let mut cpu = Cpu::new(0x0C00_0000, 0);
        let mut bus = MemoryMap::new(4096);
        load(&mut bus, 0x0C00_0000, &[0xFFFD]);
        cpu.step(&mut bus);
        assert!(matches!(cpu.regs.state, RunState::Halted));
        cpu.regs.event_pending = 1;
        cpu.step(&mut bus);
        assert!(matches!(cpu.regs.state, RunState::Halted));
    }
}
