//! x86-64 paging structures and arithmetic
//!
//! Naming follows the NT memory manager:
//!
//! - PXE: PML4 entry
//! - PPE: page-directory-pointer entry
//! - PDE: page-directory entry
//! - PTE: page-table entry
//!
//! Each level is an array of 512 8-byte entries. Everything in this module
//! is pure arithmetic over the hardware layout; the live walker sits in
//! [`crate::km::pagetable`].

use core::ptr::NonNull;

use bitfield_struct::bitfield;

/// standard page size (4 KiB)
pub const PAGE_SIZE: usize = 0x1000;

/// page shift (log2 of [`PAGE_SIZE`])
pub const PAGE_SHIFT: u64 = 12;

/// large page size (2 MiB, one PDE leaf)
pub const LARGE_PAGE_SIZE: usize = 512 * PAGE_SIZE;

/// entries per page-table level
pub const ENTRIES_PER_TABLE: usize = 512;

/// size of one hardware entry in bytes
pub const ENTRY_SIZE: usize = core::mem::size_of::<PtEntry>();

/// round a byte count or address down to a page boundary
#[inline]
pub const fn page_round_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}

/// round a byte count or address up to a page boundary
#[inline]
pub const fn page_round_up(value: usize) -> usize {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// physical address of the page a frame number refers to
#[inline]
pub const fn pfn_to_page(pfn: u64) -> u64 {
    pfn << PAGE_SHIFT
}

/// frame number of the page containing a physical address
#[inline]
pub const fn page_to_pfn(page: u64) -> u64 {
    page >> PAGE_SHIFT
}

/// a canonical x86-64 virtual address split into its translation indexes
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct VirtualAddress {
    /// byte offset inside the final 4 KiB page (bits 0-11)
    #[bits(12)]
    pub offset: u16,
    /// PTE index (bits 12-20)
    #[bits(9)]
    pub pte_index: u16,
    /// PDE index (bits 21-29)
    #[bits(9)]
    pub pde_index: u16,
    /// PPE index (bits 30-38)
    #[bits(9)]
    pub ppe_index: u16,
    /// PXE index (bits 39-47)
    #[bits(9)]
    pub pxe_index: u16,
    /// sign extension of bit 47
    #[bits(16)]
    __: u16,
}

impl VirtualAddress {
    /// split a raw pointer into its translation indexes
    #[inline]
    pub fn from_ptr(ptr: *const core::ffi::c_void) -> Self {
        Self::from_bits(ptr as u64)
    }
}

/// one hardware page-table entry, identical at every level
///
/// Layout of the x64 valid-PTE format. Raw pointers to this type alias
/// live hardware entries inside mapped page frames; they are never owned.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PtEntry {
    /// hardware valid bit
    pub valid: bool,
    /// writable
    pub write: bool,
    /// user-mode accessible
    pub owner: bool,
    /// write-through caching
    pub write_through: bool,
    /// caching disabled
    pub cache_disable: bool,
    /// accessed
    pub accessed: bool,
    /// dirty
    pub dirty: bool,
    /// leaf entry covering a large page; terminates the walk early
    pub large_page: bool,
    /// global translation
    pub global: bool,
    /// copy-on-write (software)
    pub copy_on_write: bool,
    /// prototype PTE (software)
    pub prototype: bool,
    /// software write bit
    pub software_write: bool,
    /// physical frame number of the next level (or the mapped page)
    #[bits(40)]
    pub page_frame_number: u64,
    #[bits(11)]
    __: u16,
    /// no-execute
    pub no_execute: bool,
}

impl PtEntry {
    /// whether the walk may descend through this entry
    #[inline]
    pub const fn is_walkable(&self) -> bool {
        self.valid() && !self.large_page()
    }

    /// physical address of the page this entry points to
    #[inline]
    pub const fn page_physical_address(&self) -> u64 {
        pfn_to_page(self.page_frame_number())
    }
}

/// the CR3 register / `DirectoryTableBase` value of a process
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    #[bits(3)]
    __ignored_low: u8,
    /// write-through caching for the root table
    pub write_through: bool,
    /// caching disabled for the root table
    pub cache_disable: bool,
    #[bits(7)]
    __ignored_high: u8,
    /// frame number of the PML4 table
    #[bits(40)]
    pub pml4_pfn: u64,
    #[bits(12)]
    __reserved: u16,
}

/// pointers to the live hardware entries translating one virtual address
///
/// Each pointer may be `None` when the corresponding level is not present,
/// not accessible, or terminated early by a large page. The pointers alias
/// kernel-mapped physical memory and stay meaningful only while the
/// underlying page frames are not freed or reused.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressTranslation {
    pub pxe: Option<NonNull<PtEntry>>,
    pub ppe: Option<NonNull<PtEntry>>,
    pub pde: Option<NonNull<PtEntry>>,
    pub pte: Option<NonNull<PtEntry>>,
}

impl AddressTranslation {
    /// whether the address resolved down to a 4 KiB PTE
    #[inline]
    pub const fn is_fully_mapped(&self) -> bool {
        self.pte.is_some()
    }

    /// whether any level resolved at all
    #[inline]
    pub const fn is_unmapped(&self) -> bool {
        self.pxe.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(page_round_up(0), 0);
        assert_eq!(page_round_up(1), PAGE_SIZE);
        assert_eq!(page_round_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_round_up(PAGE_SIZE + 1), 2 * PAGE_SIZE);
        assert_eq!(page_round_down(PAGE_SIZE + 1), PAGE_SIZE);
        assert_eq!(page_round_down(PAGE_SIZE - 1), 0);
    }

    #[test]
    fn test_pfn_conversion() {
        assert_eq!(pfn_to_page(0x1ad), 0x1ad000);
        assert_eq!(page_to_pfn(0x1ad000), 0x1ad);
        assert_eq!(page_to_pfn(pfn_to_page(0xfffff)), 0xfffff);
    }

    #[test]
    fn test_virtual_address_split() {
        let va = VirtualAddress::new()
            .with_pxe_index(1)
            .with_ppe_index(2)
            .with_pde_index(3)
            .with_pte_index(4)
            .with_offset(5);

        let raw = (1u64 << 39) | (2 << 30) | (3 << 21) | (4 << 12) | 5;
        assert_eq!(va.into_bits(), raw);

        let split = VirtualAddress::from_bits(raw);
        assert_eq!(split.pxe_index(), 1);
        assert_eq!(split.ppe_index(), 2);
        assert_eq!(split.pde_index(), 3);
        assert_eq!(split.pte_index(), 4);
        assert_eq!(split.offset(), 5);
    }

    #[test]
    fn test_virtual_address_index_width() {
        // indexes saturate at 9 bits, offset at 12
        let split = VirtualAddress::from_bits(u64::MAX);
        assert_eq!(split.pxe_index(), 511);
        assert_eq!(split.ppe_index(), 511);
        assert_eq!(split.pde_index(), 511);
        assert_eq!(split.pte_index(), 511);
        assert_eq!(split.offset(), 0xfff);
    }

    #[test]
    fn test_pte_bits() {
        let pte = PtEntry::from_bits(0x8000_0000_1ad0_0867);
        assert!(pte.valid());
        assert!(pte.write());
        assert!(pte.dirty());
        assert!(pte.accessed());
        assert!(!pte.large_page());
        assert!(pte.no_execute());
        assert_eq!(pte.page_frame_number(), 0x1ad00);
        assert_eq!(pte.page_physical_address(), 0x1ad00000);
        assert!(pte.is_walkable());
    }

    #[test]
    fn test_large_page_terminates_walk() {
        let pde = PtEntry::new().with_valid(true).with_large_page(true);
        assert!(!pde.is_walkable());
        let invalid = PtEntry::new();
        assert!(!invalid.is_walkable());
    }

    #[test]
    fn test_cr3_pfn() {
        let cr3 = Cr3::from_bits(0x1ab000);
        assert_eq!(cr3.pml4_pfn(), 0x1ab);
        assert!(!cr3.write_through());
    }

    #[test]
    fn test_translation_default_unmapped() {
        let t = AddressTranslation::default();
        assert!(t.is_unmapped());
        assert!(!t.is_fully_mapped());
    }
}
