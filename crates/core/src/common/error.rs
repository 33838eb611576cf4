//! Error taxonomy. `Trap` is the guest-visible SH4 exception vocabulary — it never
//! escapes `run_slice`, only ever reifying as an SR/PC/SPC state transition.
//! `CoreError` is everything else: translator resource limits, integrity failures
//! (a fatal halt with no recovery), and external device errors, per `spec.md` §7.

use std::fmt;
use thiserror::Error;

/// A guest-visible SH4 CPU exception.
///
/// Each variant carries the information needed to run the SH4 exception sequence:
/// save PC to SPC, SR to SSR, force MD/BL/RB, and jump to `VBR + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Trap {
    /// Misaligned or out-of-range read.
    #[error("address error (read) at {0:#010x}")]
    AddressErrorRead(u32),
    /// Misaligned or out-of-range write.
    #[error("address error (write) at {0:#010x}")]
    AddressErrorWrite(u32),
    /// Opcode did not decode to any known instruction.
    #[error("illegal instruction {0:#06x}")]
    IllegalInstruction(u16),
    /// A control-transfer instruction occupied a delay slot.
    #[error("illegal instruction in delay slot ({0:#06x})")]
    SlotIllegal(u16),
    /// An FPU instruction executed with SR.FD set.
    #[error("FPU disabled")]
    FpuDisabled,
    /// An FPU instruction occupied a delay slot with SR.FD set.
    #[error("FPU disabled in delay slot")]
    SlotFpuDisabled,
    /// MMU enabled and no UTLB/ITLB entry matched.
    #[error("TLB miss at {0:#010x}")]
    TlbMiss(u32),
    /// MMU protection violation (privilege or read/write bit mismatch).
    #[error("TLB protection violation at {0:#010x}")]
    TlbProtection(u32),
    /// Write matched a UTLB entry with the dirty bit clear.
    #[error("TLB initial page write at {0:#010x}")]
    TlbModification(u32),
    /// `TRAPA` was executed.
    #[error("trap (TRA={0:#04x})")]
    Trap(u8),
}

impl Trap {
    /// The exception-code value written to `EXPEVT`/`INTEVT`.
    #[must_use]
    pub const fn expevt(self) -> u32 {
        match self {
            Self::AddressErrorRead(_) => 0x0E0,
            Self::AddressErrorWrite(_) => 0x100,
            Self::IllegalInstruction(_) => 0x180,
            Self::SlotIllegal(_) => 0x1A0,
            Self::FpuDisabled => 0x800,
            Self::SlotFpuDisabled => 0x820,
            Self::TlbMiss(_) => 0x040,
            Self::TlbProtection(_) => 0x0A0,
            Self::TlbModification(_) => 0x060,
            Self::Trap(_) => 0x160,
        }
    }

    /// The offset from VBR the PC jumps to for this exception.
    #[must_use]
    pub const fn vector_offset(self) -> u32 {
        match self {
            Self::TlbMiss(_) | Self::TlbProtection(_) | Self::TlbModification(_) => 0x400,
            _ => 0x100,
        }
    }

    /// `true` if this trap originates from the TLB-miss vector rather than the
    /// general exception vector.
    #[must_use]
    pub const fn is_tlb_miss_class(self) -> bool {
        matches!(
            self,
            Self::TlbMiss(_) | Self::TlbProtection(_) | Self::TlbModification(_)
        )
    }
}

/// A translator resource or host-integration failure, plus higher-level integrity
/// and device errors. Returned via `Result` from the crate's public API; never
/// thrown across the translator/interpreter boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The translation cache or a block's backpatch/recovery table is full; callers
    /// should retry after the cache flush this error reports has already occurred.
    #[error("translator limit reached: {0}")]
    TranslatorLimit(TranslatorLimitKind),
    /// Unrecoverable state: VBR not initialized, corrupt save-state, or instruction
    /// fetch from an MMIO/unmapped region. The machine halts; no retry.
    #[error("integrity fault: {0}")]
    IntegrityFault(String),
    /// An external device (disc image, controller) failed; execution continues but
    /// the condition is surfaced to the caller for logging/UI purposes.
    #[error("external device error: {0}")]
    DeviceError(String),
    /// Save-state I/O failure.
    #[error("save-state I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The outcome of an instruction fetch: either a guest-recoverable `Trap` (the
/// common case — misaligned PC, TLB miss) or a fatal integrity condition the
/// bus itself can recognize (an instruction fetch landing in an MMIO region),
/// which has no guest-visible exception and instead halts the machine.
#[derive(Debug)]
pub enum FetchFault {
    /// Reifies as the normal SH4 exception sequence.
    Trap(Trap),
    /// No recovery; the caller must halt.
    Fatal(CoreError),
}

impl From<Trap> for FetchFault {
    fn from(trap: Trap) -> Self {
        Self::Trap(trap)
    }
}

/// Which translator resource was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorLimitKind {
    /// The code-buffer arena had no room for a new block.
    CacheFull,
    /// A block accumulated more backpatch sites than the fixed-size table allows.
    BackpatchTableFull,
}

impl fmt::Display for TranslatorLimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheFull => write!(f, "translation cache full"),
            Self::BackpatchTableFull => write!(f, "backpatch table full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlb_traps_use_the_tlb_miss_vector() {
        assert_eq!(Trap::TlbMiss(0).vector_offset(), 0x400);
        assert_eq!(Trap::IllegalInstruction(0).vector_offset(), 0x100);
    }

    #[test]
    fn illegal_instruction_expevt_matches_sh4_manual() {
        assert_eq!(Trap::IllegalInstruction(0xFFFF).expevt(), 0x180);
        assert_eq!(Trap::SlotIllegal(0xFFFF).expevt(), 0x1A0);
    }
}
