//! MMU translation: a small TLB that maps virtual page numbers to physical pages.
//! Modeled as the `vma_to_phys_read`/`vma_to_phys_write` entry points `spec.md` §4.1
//! names, both returning the `MMU_VMA_ERROR` sentinel on a miss.

use std::io::{self, Read, Write};

use crate::common::addr::{PhysAddr, VirtAddr};

/// One UTLB/ITLB entry: a virtual page mapped to a physical page with access
/// permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// Virtual page number (address >> 12).
    pub vpn: u32,
    /// Physical page number (address >> 12).
    pub ppn: u32,
    /// 8-bit address-space identifier; entries only match a lookup sharing the same
    /// ASID unless `shared` is set.
    pub asid: u8,
    /// Shared-page bit: matches regardless of ASID.
    pub shared: bool,
    /// Allows writes when set.
    pub writable: bool,
    /// Dirty bit; a write to a non-dirty entry raises `TlbModification`.
    pub dirty: bool,
    /// Requires privileged mode when set.
    pub privileged: bool,
}

/// Why a TLB lookup failed, distinguishing the three MMU exception causes
/// `spec.md` requires the caller (`MemoryMap::translate`) route to their own
/// `Trap` variant and vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuFault {
    /// No UTLB/ITLB entry matched the virtual page.
    Miss,
    /// A write matched an entry with the writable bit clear.
    Protection,
    /// A write matched a writable entry with the dirty bit clear.
    Modification,
}

/// The MMU's TLB and enable toggle.
#[derive(Debug, Default)]
pub struct Mmu {
    /// Whether translation is active (`MMUCR.AT`).
    pub enabled: bool,
    /// Current address-space identifier (`MMUCR.ASID` / `PTEH.ASID`).
    pub asid: u8,
    entries: Vec<TlbEntry>,
}

impl Mmu {
    /// Installs or replaces the entry for `entry.vpn` (matching `LDTLB`).
    pub fn load_entry(&mut self, entry: TlbEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.vpn == entry.vpn) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Removes all entries (matching an ITLB/UTLB full invalidate).
    pub fn flush(&mut self) {
        self.entries.clear();
    }

    fn find(&self, vpn: u32) -> Option<&TlbEntry> {
        self.entries
            .iter()
            .find(|e| e.vpn == vpn && (e.shared || e.asid == self.asid))
    }

    /// Resolves `vaddr` to a physical address, honoring the write-permission and
    /// dirty-bit rules, reporting which of the three MMU fault causes applies on
    /// failure.
    pub fn translate(&mut self, vaddr: VirtAddr, write: bool) -> Result<PhysAddr, MmuFault> {
        let vpn = vaddr.val() >> 12;
        let entry = *self.find(vpn).ok_or(MmuFault::Miss)?;
        if write && !entry.writable {
            return Err(MmuFault::Protection);
        }
        if write && !entry.dirty {
            return Err(MmuFault::Modification);
        }
        let offset = vaddr.val() & 0xFFF;
        Ok(PhysAddr::new((entry.ppn << 12) | offset))
    }

    /// Dumps the enable toggle, ASID, and TLB entries as a raw byte stream.
    pub fn write_raw(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&[u8::from(self.enabled), self.asid])?;
        out.write_all(&(self.entries.len() as u32).to_le_bytes())?;
        for e in &self.entries {
            out.write_all(&e.vpn.to_le_bytes())?;
            out.write_all(&e.ppn.to_le_bytes())?;
            let mut flags = 0u8;
            if e.shared {
                flags |= 0x1;
            }
            if e.writable {
                flags |= 0x2;
            }
            if e.dirty {
                flags |= 0x4;
            }
            if e.privileged {
                flags |= 0x8;
            }
            out.write_all(&[e.asid, flags])?;
        }
        Ok(())
    }

    /// Restores MMU state previously serialized by `write_raw`.
    pub fn read_raw(&mut self, input: &mut dyn Read) -> io::Result<()> {
        let mut head = [0u8; 2];
        input.read_exact(&mut head)?;
        self.enabled = head[0] != 0;
        self.asid = head[1];

        let mut len_buf = [0u8; 4];
        input.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf);

        self.entries.clear();
        for _ in 0..len {
            let mut vpn_buf = [0u8; 4];
            input.read_exact(&mut vpn_buf)?;
            let mut ppn_buf = [0u8; 4];
            input.read_exact(&mut ppn_buf)?;
            let mut tail = [0u8; 2];
            input.read_exact(&mut tail)?;
            let flags = tail[1];
            self.entries.push(TlbEntry {
                vpn: u32::from_le_bytes(vpn_buf),
                ppn: u32::from_le_bytes(ppn_buf),
                asid: tail[0],
                shared: flags & 0x1 != 0,
                writable: flags & 0x2 != 0,
                dirty: flags & 0x4 != 0,
                privileged: flags & 0x8 != 0,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_empty_tlb() {
        let mut mmu = Mmu {
            enabled: true,
            ..Mmu::default()
        };
        assert!(mmu.translate(VirtAddr::new(0x1000), false).is_err());
    }

    #[test]
    fn hit_resolves_page_and_offset() {
        let mut mmu = Mmu {
            enabled: true,
            ..Mmu::default()
        };
        mmu.load_entry(TlbEntry {
            vpn: 0x1,
            ppn: 0x0C001,
            asid: 0,
            shared: true,
            writable: true,
            dirty: true,
            privileged: false,
        });
        let phys = mmu.translate(VirtAddr::new(0x1234), false).unwrap();
        assert_eq!(phys.val(), 0x0C00_1234);
    }

    #[test]
    fn write_to_non_dirty_entry_is_rejected() {
        let mut mmu = Mmu {
            enabled: true,
            ..Mmu::default()
        };
        mmu.load_entry(TlbEntry {
            vpn: 0x1,
            ppn: 0x0C001,
            asid: 0,
            shared: true,
            writable: true,
            dirty: false,
            privileged: false,
        });
        assert!(mmu.translate(VirtAddr::new(0x1000), true).is_err());
    }

    #[test]
    fn fault_kind_distinguishes_miss_protection_and_modification() {
        let mut mmu = Mmu {
            enabled: true,
            ..Mmu::default()
        };
        assert_eq!(
            mmu.translate(VirtAddr::new(0x1000), false),
            Err(MmuFault::Miss)
        );

        mmu.load_entry(TlbEntry {
            vpn: 0x1,
            ppn: 0x0C001,
            asid: 0,
            shared: true,
            writable: false,
            dirty: false,
            privileged: false,
        });
        assert_eq!(
            mmu.translate(VirtAddr::new(0x1000), true),
            Err(MmuFault::Protection)
        );

        mmu.load_entry(TlbEntry {
            vpn: 0x1,
            ppn: 0x0C001,
            asid: 0,
            shared: true,
            writable: true,
            dirty: false,
            privileged: false,
        });
        assert_eq!(
            mmu.translate(VirtAddr::new(0x1000), true),
            Err(MmuFault::Modification)
        );
    }

    #[test]
    fn raw_round_trip_restores_tlb_state() {
        let mut mmu = Mmu {
            enabled: true,
            asid: 7,
            ..Mmu::default()
        };
        mmu.load_entry(TlbEntry {
            vpn: 0x3,
            ppn: 0x0C003,
            asid: 7,
            shared: false,
            writable: true,
            dirty: true,
            privileged: true,
        });

        let mut buf = Vec::new();
        mmu.write_raw(&mut buf).unwrap();

        let mut restored = Mmu::default();
        restored.read_raw(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.enabled, true);
        assert_eq!(restored.asid, 7);
        let phys = restored.translate(VirtAddr::new(0x3100), false).unwrap();
        assert_eq!(phys.val(), 0x0C00_3100);
    }
}
