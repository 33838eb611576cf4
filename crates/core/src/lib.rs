//! `dreamon-core`: a Sega Dreamcast SH4 CPU emulation core.
//!
//! This crate models five cooperating subsystems:
//!
//! - [`common`] — address newtypes, the error/trap taxonomy, and configuration.
//! - [`cpu`] — the SH4 register file and a cycle-stepping interpreter for the full
//!   instruction set (banked registers, delay slots, FPU, MAC saturation, division
//!   step, store queues).
//! - [`jit`] — a dynamic translator that compiles SH4 basic blocks into a cached,
//!   backpatch-aware intermediate representation and a dispatcher that runs it.
//! - [`asic`] — the event/interrupt/DMA multiplexer bridging the SH4 to the AICA
//!   audio subsystem.
//! - [`arm7`] — the secondary ARM7 audio CPU's memory window.
//!
//! [`soc`] ties a [`memmap::MemoryMap`] and the above into a [`soc::System`] that
//! implements the slice-scheduling model described in the crate's design notes;
//! [`sim`] provides the run-loop, binary/ELF loader, and save-state format.

pub mod arm7;
pub mod asic;
pub mod common;
pub mod cpu;
pub mod jit;
pub mod memmap;
pub mod sim;
pub mod soc;

pub use common::config::Config;
pub use common::error::{CoreError, Trap};
pub use cpu::Cpu;
pub use soc::system::System;
