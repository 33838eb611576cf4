//! The dynamic translator. Each basic block decodes once into a cached
//! `Vec<MicroOp>` — a classification of every opcode the block will retire,
//! not a raw opcode dump — plus a parallel recovery table recording how many
//! instructions had already retired before each micro-op. Replaying a block
//! dispatches straight through [`Cpu::execute_cached`] on the cached opcode,
//! skipping `Bus::fetch`/decode entirely; no codegen crate is grounded
//! anywhere in the retrieval pack (see `DESIGN.md`), so "running translated
//! code" means iterating the `Vec` instead of transferring control to machine
//! code, as the teacher's `ia32abi.h` backpatch trailer does for exceptions
//! rather than inlining full exception handling at every site.
//!
//! This keeps the contract `spec.md` §4.4/§4.5 describes: translation cache
//! keyed by virtual page, arena-fill eviction, page-write invalidation, and a
//! recovery table consumed in a deterministic post-pass when a cached block
//! traps partway through.

use std::collections::HashMap;

use crate::common::addr::VirtAddr;
use crate::common::error::{CoreError, Trap, TranslatorLimitKind};
use crate::cpu::{is_control_transfer, Cpu};
use crate::memmap::Bus;

/// The cap on a single block's micro-op count, mirroring the teacher's
/// fixed-size backpatch array (`ia32abi.h`'s `sh4_x86.backpatch_list`): a
/// block that never finds a control-transfer or page boundary within this
/// many instructions is a translator resource limit, not a bigger block.
const MAX_BLOCK_OPS: usize = 512;

/// One micro-op: an opcode classified by how it ends (or doesn't end) the
/// block it lives in. Classification happens once at compile time, mirroring
/// `Cpu::execute_one`'s real dispatch order, so block replay never has to
/// reclassify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicroOp {
    /// An instruction with no control-transfer effect on the block boundary:
    /// ALU, memory, or FPU class, or a non-branching control instruction
    /// (`LDC`/`STC`/`LDS`/`STS`).
    Plain(u16),
    /// The control-transfer instruction that ends this block.
    Branch(u16),
    /// The mandatory delay-slot instruction immediately following a `Branch`
    /// micro-op — always the block's last op.
    DelaySlot(u16),
}

impl MicroOp {
    #[must_use]
    pub const fn opcode(self) -> u16 {
        match self {
            Self::Plain(op) | Self::Branch(op) | Self::DelaySlot(op) => op,
        }
    }
}

/// One recovery-table entry: how many instructions this block had already
/// retired before the micro-op at the matching index. Consumed by
/// [`InterpretingExecutor::run_block`]'s post-pass when a micro-op traps, so
/// the caller can log how far into the block execution actually got without
/// re-deriving it from `slice_cycle` deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpatchEntry {
    pub retired_before: u32,
}

/// One compiled block: its micro-ops in order, a recovery entry per op, and
/// the physical pages its decode touched (for `invalidate_page`).
#[derive(Debug, Clone)]
pub struct Block {
    /// SH4 virtual address the block starts at.
    pub start_pc: u32,
    /// The block's classified instructions, ending at a branch/RTS/RTE/SLEEP/
    /// TRAPA's delay slot or a 4 KiB page boundary.
    pub ops: Vec<MicroOp>,
    /// `recovery[i]` is the retired-instruction count immediately before
    /// `ops[i]` executes.
    pub recovery: Vec<BackpatchEntry>,
    /// Physical pages this block's decode touched.
    pub pages: Vec<u32>,
}

/// A bounded-size cache of compiled blocks, keyed by virtual page. Mirrors
/// `spec.md` §4.5: arena-fill eviction is a full flush, not per-block LRU.
#[derive(Debug)]
pub struct TranslationCache {
    blocks: HashMap<u32, Block>,
    capacity: usize,
}

impl TranslationCache {
    /// Builds an empty cache holding up to `capacity` blocks before a flush.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: HashMap::new(),
            capacity,
        }
    }

    /// Looks up the block starting at `vma`, if one is cached.
    #[must_use]
    pub fn get_code(&self, vma: VirtAddr) -> Option<&Block> {
        self.blocks.get(&vma.val())
    }

    /// Installs `block`, flushing the whole cache first if it would overflow
    /// `capacity` — the arena-reclamation policy `spec.md` §4.5 calls out as
    /// sufficient for the baseline translator.
    pub fn set_code(&mut self, block: Block) {
        if self.blocks.len() >= self.capacity && !self.blocks.contains_key(&block.start_pc) {
            let err = CoreError::TranslatorLimit(TranslatorLimitKind::CacheFull);
            tracing::debug!(error = %err, capacity = self.capacity, "jit: flushing translation cache");
            self.flush();
        }
        self.blocks.insert(block.start_pc, block);
    }

    /// Discards every block overlapping physical page `phys_page`, called on a
    /// write to a code page or an MMU state transition.
    pub fn invalidate_page(&mut self, phys_page: u32) {
        self.blocks.retain(|_, b| !b.pages.contains(&phys_page));
    }

    /// Discards every cached block.
    pub fn flush(&mut self) {
        self.blocks.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Why `compile_block` couldn't produce a block.
#[derive(Debug)]
pub enum BlockCompileError {
    /// The instruction fetch needed to decode the block trapped; the caller
    /// should fall back to the interpreter, which will raise the same trap
    /// through the normal exception path.
    Trap(Trap),
    /// A translator resource limit was hit mid-decode.
    Limit(TranslatorLimitKind),
}

impl From<Trap> for BlockCompileError {
    fn from(trap: Trap) -> Self {
        Self::Trap(trap)
    }
}

/// Compiles the block starting at `pc`: decodes forward (without executing)
/// until a control-transfer instruction (inclusive of its delay slot) or a
/// page boundary ends it, classifying each opcode into a [`MicroOp`] as it
/// goes.
pub fn compile_block(bus: &mut dyn Bus, pc: u32) -> Result<Block, BlockCompileError> {
    let mut addr = pc;
    let mut ops = Vec::new();
    let mut pages = vec![(addr & 0x1FFF_FFFF) >> 12];
    loop {
        if ops.len() >= MAX_BLOCK_OPS {
            return Err(BlockCompileError::Limit(TranslatorLimitKind::BackpatchTableFull));
        }
        let op = bus.fetch(addr).map_err(fetch_trap)?;
        let page = (addr & 0x1FFF_FFFF) >> 12;
        if !pages.contains(&page) {
            pages.push(page);
        }
        if is_control_transfer(op) {
            ops.push(MicroOp::Branch(op));
            if ops.len() >= MAX_BLOCK_OPS {
                return Err(BlockCompileError::Limit(TranslatorLimitKind::BackpatchTableFull));
            }
            let slot_addr = addr.wrapping_add(2);
            let slot_op = bus.fetch(slot_addr).map_err(fetch_trap)?;
            let slot_page = (slot_addr & 0x1FFF_FFFF) >> 12;
            if !pages.contains(&slot_page) {
                pages.push(slot_page);
            }
            ops.push(MicroOp::DelaySlot(slot_op));
            break;
        }
        ops.push(MicroOp::Plain(op));
        addr = addr.wrapping_add(2);
        if addr & 0xFFF == 0 {
            // Page boundary: the next page may not be resident, refault through
            // the dispatcher rather than assuming contiguity.
            break;
        }
    }
    let recovery = (0..ops.len() as u32)
        .map(|retired_before| BackpatchEntry { retired_before })
        .collect();
    Ok(Block {
        start_pc: pc,
        ops,
        recovery,
        pages,
    })
}

/// `compile_block` only ever hits a `Trap`-typed fetch fault: a block is
/// compiled starting exactly at the PC about to execute, so a fatal (MMIO)
/// fetch fault here would also be fatal to the interpreter fallback — this
/// just lets that fallback be the one place that constructs the halt.
fn fetch_trap(fault: crate::common::error::FetchFault) -> Trap {
    match fault {
        crate::common::error::FetchFault::Trap(trap) => trap,
        crate::common::error::FetchFault::Fatal(_) => Trap::AddressErrorRead(0),
    }
}

/// Executes a compiled block's micro-ops by replaying them against `cpu`/
/// `bus`, skipping `Bus::fetch`/decode entirely. This is the translator's
/// concrete behavioral divergence from the plain interpreter: the interpreter
/// fetches and classifies every instruction fresh, while a cached block skips
/// straight to [`Cpu::execute_cached`] with the opcode already known.
pub trait MicroOpExecutor {
    /// Runs `block` to completion against `cpu`/`bus`, or until a micro-op
    /// traps/halts the core.
    fn run_block(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus, block: &Block);
}

/// The only executor backend this crate ships: one [`Cpu::execute_cached`] per
/// cached micro-op. A host-codegen backend implementing the same trait could
/// replace this without touching the cache or compiler above it — the
/// `HostBackend` strategy object `spec.md` §9 names.
#[derive(Debug, Default)]
pub struct InterpretingExecutor;

impl MicroOpExecutor for InterpretingExecutor {
    fn run_block(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus, block: &Block) {
        for (idx, op) in block.ops.iter().enumerate() {
            if !matches!(cpu.regs.state, crate::cpu::RunState::Running) {
                break;
            }
            if !cpu.execute_cached(bus, op.opcode()) {
                // Deterministic post-pass: the recovery entry tells us exactly
                // how many instructions in this block had already retired when
                // the trap/halt fired, for diagnostics — `enter_exception`
                // already reified the exception sequence (or halted the core).
                let entry = block.recovery[idx];
                tracing::trace!(
                    block_start = block.start_pc,
                    retired_before = entry.retired_before,
                    block_len = block.ops.len(),
                    "jit: block exited early on trap"
                );
                return;
            }
        }
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
    fn compile_block_stops_after_branch_delay_slot() {
        let mut bus = MemoryMap::new(4096);
        // NOP, BRA +0, NOP(delay slot), NOP (not part of this block)
        load(&mut bus, 0x0C00_0000, &[0x0009, 0xA000, 0x0009, 0x0009]);
        let block = compile_block(&mut bus, 0x0C00_0000).unwrap();
        assert_eq!(block.ops.len(), 3);
        assert!(matches!(block.ops[0], MicroOp::Plain(0x0009)));
        assert!(matches!(block.ops[1], MicroOp::Branch(0xA000)));
        assert!(matches!(block.ops[2], MicroOp::DelaySlot(0x0009)));
        assert_eq!(block.recovery.len(), 3);
        assert_eq!(block.recovery[2].retired_before, 2);
    }

    #[test]
    fn compile_block_enforces_the_micro_op_limit() {
        let mut bus = MemoryMap::new(0x4000);
        let words = vec![0x0009u16; MAX_BLOCK_OPS + 1]; // a run of NOPs, no branch
        load(&mut bus, 0x0C00_0000, &words);
        let err = compile_block(&mut bus, 0x0C00_0000).unwrap_err();
        assert!(matches!(
            err,
            BlockCompileError::Limit(TranslatorLimitKind::BackpatchTableFull)
        ));
    }

    #[test]
    fn cache_evicts_everything_on_overflow() {
        let mut cache = TranslationCache::new(1);
        cache.set_code(Block {
            start_pc: 0x0C00_0000,
            ops: vec![MicroOp::Plain(0x0009)],
            recovery: vec![BackpatchEntry { retired_before: 0 }],
            pages: vec![0xC00],
        });
        cache.set_code(Block {
            start_pc: 0x0C00_1000,
            ops: vec![MicroOp::Plain(0x0009)],
            recovery: vec![BackpatchEntry { retired_before: 0 }],
            pages: vec![0xC01],
        });
        assert_eq!(cache.len(), 1);
        assert!(cache.get_code(VirtAddr::new(0x0C00_0000)).is_none());
    }

    #[test]
    fn invalidate_page_drops_overlapping_blocks() {
        let mut cache = TranslationCache::new(8);
        cache.set_code(Block {
            start_pc: 0x0C00_0000,
            ops: vec![MicroOp::Plain(0x0009), MicroOp::Plain(0x0009)],
            recovery: vec![
                BackpatchEntry { retired_before: 0 },
                BackpatchEntry { retired_before: 1 },
            ],
            pages: vec![0xC00],
        });
        cache.invalidate_page(0xC00);
        assert!(cache.get_code(VirtAddr::new(0x0C00_0000)).is_none());
    }

    #[test]
    fn run_block_replays_every_cached_micro_op() {
        let mut bus = MemoryMap::new(4096);
        // ADD #5,R0 ; ADD #3,R0 ; BRA +0 ; delay slot ADD #1,R0
        load(&mut bus, 0x0C00_0000, &[0x7005, 0x7003, 0xA000, 0x7001]);
        let block = compile_block(&mut bus, 0x0C00_0000).unwrap();
        assert_eq!(block.ops.len(), 4);

        let mut cpu = Cpu::new(0x0C00_0000, 0x8C00_0000);
        let mut executor = InterpretingExecutor;
        executor.run_block(&mut cpu, &mut bus, &block);
        assert_eq!(cpu.regs.r[0], 9, "both ADDs and the delay-slot ADD all retired");
        assert_eq!(cpu.regs.pc, 0x0C00_0008, "branch target after the delay slot commits");
    }

    #[test]
    fn run_block_stops_at_the_first_trapping_micro_op() {
        let mut bus = MemoryMap::new(4096);
        // ADD #1,R0 ; illegal (traps on execution, not on decode) ; BRA +0 ; delay slot
        load(&mut bus, 0x0C00_0000, &[0x7001, 0xFFFD, 0xA000, 0x7002]);
        let block = compile_block(&mut bus, 0x0C00_0000).unwrap();
        assert_eq!(block.ops.len(), 4, "decode doesn't execute, scans past the illegal op");

        let mut cpu = Cpu::new(0x0C00_0000, 0x8C00_0000);
        let mut executor = InterpretingExecutor;
        executor.run_block(&mut cpu, &mut bus, &block);
        assert_eq!(cpu.regs.r[0], 1, "only the first op retired");
        assert_eq!(cpu.regs.pc, cpu.regs.vbr.wrapping_add(0x100));
    }
}
