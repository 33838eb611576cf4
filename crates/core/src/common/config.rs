//! Runtime configuration: RAM sizes, boot addresses, translator tuning, and the
//! Open-Question flags `SPEC_FULL.md` §9 resolves as configurable behavior.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Documented default values, mirroring the teacher's `mod defaults` layout.
pub mod defaults {
    /// Physical base address backing loaded images (the P2 uncached alias of the
    /// start of main RAM).
    pub const RAM_BASE: u32 = 0x0C00_0000;
    /// Main SH4 RAM size: 16 MiB, the retail Dreamcast's configuration.
    pub const RAM_SIZE: usize = 16 * 1024 * 1024;
    /// AICA sound RAM size: 2 MiB.
    pub const SOUND_RAM_SIZE: usize = 2 * 1024 * 1024;
    /// Default entry point: the P1 cached alias of the start of main RAM.
    pub const BOOT_PC: u32 = 0x8C00_0000;
    /// Default VBR: colocated with the boot PC, matching a typical IP.BIN-less
    /// homebrew boot image.
    pub const BOOT_VBR: u32 = 0x8C00_0000;
    /// Approximate period of one fixed-cost interpreter step, in nanoseconds
    /// (~200 MHz).
    pub const CPU_PERIOD_NS: u64 = 5;
    /// Translation cache arena size in bytes.
    pub const TRANSLATION_CACHE_BYTES: usize = 4 * 1024 * 1024;
    /// Translation cache lookup-table slot count (must be a power of two).
    pub const TRANSLATION_CACHE_SLOTS: usize = 1 << 16;
}

/// Top-level emulator configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Main RAM size in bytes.
    pub ram_size: usize,
    /// AICA sound RAM size in bytes.
    pub sound_ram_size: usize,
    /// Initial program counter on reset.
    pub boot_pc: u32,
    /// Initial VBR on reset.
    pub boot_vbr: u32,
    /// Fixed per-instruction cycle cost, in nanoseconds.
    pub cpu_period_ns: u64,
    /// Translation cache arena size in bytes.
    pub translation_cache_bytes: usize,
    /// Translation cache lookup-table slot count.
    pub translation_cache_slots: usize,
    /// When `false`, `System::run_slice` interprets every instruction and never
    /// invokes the translator. Used to run the interpreter and JIT paths over the
    /// same image for equivalence testing.
    pub use_jit: bool,
    /// Whether the MMU is enabled at reset (normally `false`; bootstrap code enables
    /// it explicitly via `MMUCR`).
    pub mmu_enabled_at_boot: bool,
    /// Resolves the ASIC Open Question (`SPEC_FULL.md` §9): if `true`, enabling a
    /// previously-disabled mask bit while its event is already pending immediately
    /// raises the corresponding IRQ line; if `false` (the default), masks are only
    /// consulted at the moment an event is raised.
    pub irqa_fires_on_mask_enable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ram_size: defaults::RAM_SIZE,
            sound_ram_size: defaults::SOUND_RAM_SIZE,
            boot_pc: defaults::BOOT_PC,
            boot_vbr: defaults::BOOT_VBR,
            cpu_period_ns: defaults::CPU_PERIOD_NS,
            translation_cache_bytes: defaults::TRANSLATION_CACHE_BYTES,
            translation_cache_slots: defaults::TRANSLATION_CACHE_SLOTS,
            use_jit: true,
            mmu_enabled_at_boot: false,
            irqa_fires_on_mask_enable: false,
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file, falling back to documented defaults
    /// for any field the file omits (`#[serde(default)]` on the struct).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

/// Failure modes for [`Config::load`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file was not valid JSON, or had a field of the wrong type.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_constants() {
        let config = Config::default();
        assert_eq!(config.ram_size, defaults::RAM_SIZE);
        assert_eq!(config.boot_pc, defaults::BOOT_PC);
        assert!(config.use_jit);
        assert!(!config.irqa_fires_on_mask_enable);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: Config = serde_json::from_str(r#"{"ram_size": 1048576}"#).unwrap();
        assert_eq!(config.ram_size, 1_048_576);
        assert_eq!(config.boot_pc, defaults::BOOT_PC);
    }
}
