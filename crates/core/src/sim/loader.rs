//! Guest image loading: a raw binary dropped verbatim at `Config::boot_pc`, or
//! an ELF's program headers read with the `object` crate for an IP.BIN-less
//! homebrew `.elf`.
//!
//! Grounded on `willmccallion-rvsim`'s `sim/loader.rs` (`load_binary` plus a
//! fixed-address placement scheme), generalized to read ELF segments instead
//! of assuming a flat image, since the Dreamcast homebrew toolchain commonly
//! produces an ELF rather than a bare `.bin`.

use std::fs;
use std::io;
use std::path::Path;

use object::{Object, ObjectSegment};

use crate::common::error::CoreError;
use crate::memmap::Bus;
use crate::soc::system::System;

/// Reads `path` and writes it verbatim into the SH4 bus at `system`'s
/// configured boot PC (physical, region bits stripped).
pub fn load_raw_binary(system: &mut System, path: impl AsRef<Path>, boot_pc: u32) -> io::Result<()> {
    let data = fs::read(path)?;
    system.sh4_mut().bus.load_image(boot_pc & 0x1FFF_FFFF, &data);
    Ok(())
}

/// Reads `path` as a 32-bit ELF and loads each loadable segment at its
/// physical address (region bits stripped), returning the ELF entry point so
/// the caller can set `Cpu::regs.pc`/`new_pc` to it.
pub fn load_elf(system: &mut System, path: impl AsRef<Path>) -> Result<u32, CoreError> {
    let data = fs::read(path).map_err(CoreError::Io)?;
    let elf = object::File::parse(&*data)
        .map_err(|e| CoreError::IntegrityFault(format!("malformed ELF: {e}")))?;

    for segment in elf.segments() {
        let phys = (segment.address() as u32) & 0x1FFF_FFFF;
        let bytes = segment
            .data()
            .map_err(|e| CoreError::IntegrityFault(format!("unreadable ELF segment: {e}")))?;
        system.sh4_mut().bus.load_image(phys, bytes);
    }

    let entry = u32::try_from(elf.entry()).map_err(|_| {
        CoreError::IntegrityFault("ELF entry point does not fit in 32 bits".to_string())
    })?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use tempfile::NamedTempFile;
    use std::io::Write as _;

    #[test]
    fn raw_binary_lands_at_boot_pc() {
        let mut system = System::new(Config::default());
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        load_raw_binary(&mut system, file.path(), Config::default().boot_pc).unwrap();
        let phys = Config::default().boot_pc & 0x1FFF_FFFF;
        assert_eq!(
            system.sh4_mut().bus.read_long(phys).unwrap(),
            0xDDCC_BBAA
        );
    }
}
