//! The module-registration trait `spec.md` §6/§9 mandates as the re-architected
//! replacement for the source's function-pointer-struct registration pattern.

use std::io::{self, Read, Write};

/// A `dreamon-core` component — the SH4 core, the ASIC bus, the ARM7 window —
/// participating in reset, the slice scheduler, and save-state I/O.
///
/// Implementations are driven in the order they were registered with
/// [`System`](super::system::System); that same order is the save-state
/// format's authoritative module order, so it must never change once a save
/// format has shipped.
pub trait Module {
    /// A stable name used for ordering diagnostics and log lines. Not
    /// part of the save-state format (order, not name, disambiguates there).
    fn name(&self) -> &'static str;

    /// One-time setup after construction, before the first `reset`.
    fn init(&mut self) {}

    /// Restores this module to its power-on state.
    fn reset(&mut self);

    /// Runs this module for up to `ns` nanoseconds, returning the amount
    /// actually consumed (less than `ns` if the module stopped early, e.g. the
    /// SH4 core parking on `SLEEP`).
    fn run_slice(&mut self, ns: u64) -> u64;

    /// Dumps this module's state as a raw little-endian byte stream.
    fn save_state(&self, out: &mut dyn Write) -> io::Result<()>;

    /// Restores this module's state from a stream previously produced by
    /// `save_state`, called with modules visited in registration order.
    fn load_state(&mut self, input: &mut dyn Read) -> io::Result<()>;
}
