//! Save-state header framing, per `spec.md` §6: a 16-byte magic, a 4-byte
//! little-endian version, then each registered module's raw dump back to
//! back with no further chunk framing. [`crate::soc::system::System`] writes
//! the module dumps themselves; this module owns only the header.

use std::io::{self, Read, Write};

/// The exact 16-byte magic every save-state file starts with.
pub const MAGIC: [u8; 16] = *b"%!-DreamOn!Save\0";

/// The only save-state format version this crate writes or accepts.
pub const VERSION: u32 = 0x0001_0000;

/// Writes the 20-byte header (magic + version) that precedes the module dumps.
pub fn write_header(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(&MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())
}

/// Reads and validates the header, failing with [`io::ErrorKind::InvalidData`]
/// if the magic doesn't match or the version isn't one this crate understands.
pub fn read_header(input: &mut dyn Read) -> io::Result<()> {
    let mut magic = [0u8; 16];
    input.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "save-state magic mismatch",
        ));
    }
    let mut version_bytes = [0u8; 4];
    input.read_exact(&mut version_bytes)?;
    let version = u32::from_le_bytes(version_bytes);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported save-state version {version:#010x}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len(), 20);
        read_header(&mut buf.as_slice()).unwrap();
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut buf = vec![0u8; 20];
        assert!(read_header(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        assert!(read_header(&mut buf.as_slice()).is_err());
    }
}
