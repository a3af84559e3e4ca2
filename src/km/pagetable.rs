//! Manual x86-64 page-table walking over a live process
//!
//! The walker reads the target's `DirectoryTableBase` out of the raw
//! `EPROCESS` bytes and follows the 4-level hierarchy through the
//! kernel's physical-to-virtual mapping. It never mutates entries.
//!
//! "Not resolvable" is not an error: an invalid, inaccessible or
//! large-page entry stops the descent and leaves the finer levels `None`.

use core::ffi::c_void;
use core::ptr::NonNull;

use crate::error::{EasyNtError, Result};
use crate::paging::{
    pfn_to_page, AddressTranslation, Cr3, PtEntry, VirtualAddress, ENTRIES_PER_TABLE, ENTRY_SIZE,
};
use crate::km::process::{AttachGuard, Eprocess};
use crate::version::{self, WindowsVersion};

/// walks the live hardware page tables of a process
///
/// Carries the version-selected `DirectoryTableBase` offset so the one
/// fragile layout assumption sits behind a single seam.
#[derive(Debug, Clone, Copy)]
pub struct PageTableWalker {
    dirbase_offset: usize,
}

impl PageTableWalker {
    /// walker for the running kernel build
    pub fn new() -> Self {
        Self::for_version(WindowsVersion::current())
    }

    /// walker for an explicit version (useful under test)
    pub const fn for_version(version: WindowsVersion) -> Self {
        Self {
            dirbase_offset: version::directory_table_base_offset(version),
        }
    }

    /// retrieve the page-table entries translating `virtual_address` in
    /// `process`
    ///
    /// Attaches to the target for the duration of the walk; detach is
    /// guaranteed on every path. A fully or partially unmapped address is
    /// a successful translation with `None` levels.
    pub fn translate(
        &self,
        process: &Eprocess,
        virtual_address: *const c_void,
    ) -> Result<AddressTranslation> {
        if virtual_address.is_null() {
            return Err(EasyNtError::InvalidParameter { index: 2 });
        }

        let indexes = VirtualAddress::from_ptr(virtual_address);
        let mut translation = AddressTranslation::default();

        let _attach = AttachGuard::attach(process);

        let cr3 = Cr3::from_bits(process.directory_table_base(self.dirbase_offset));

        translation.pxe = entry_at(cr3.pml4_pfn(), indexes.pxe_index());
        let Some(pxe) = translation.pxe.map(read_entry) else {
            return Ok(translation);
        };
        if !pxe.is_walkable() {
            return Ok(translation);
        }

        translation.ppe = entry_at(pxe.page_frame_number(), indexes.ppe_index());
        let Some(ppe) = translation.ppe.map(read_entry) else {
            return Ok(translation);
        };
        if !ppe.is_walkable() {
            return Ok(translation);
        }

        translation.pde = entry_at(ppe.page_frame_number(), indexes.pde_index());
        let Some(pde) = translation.pde.map(read_entry) else {
            return Ok(translation);
        };
        if !pde.is_walkable() {
            return Ok(translation);
        }

        translation.pte = entry_at(pde.page_frame_number(), indexes.pte_index());
        Ok(translation)
    }

    /// enumerate every valid PXE in the process page tables
    ///
    /// Invalid or inaccessible entries are silently skipped; this is a
    /// best-effort scan of live, possibly inconsistent hardware state.
    pub fn enumerate_pxes(
        &self,
        process: &Eprocess,
        mut callback: impl FnMut(usize, NonNull<PtEntry>),
    ) -> Result<()> {
        let _attach = AttachGuard::attach(process);

        let cr3 = Cr3::from_bits(process.directory_table_base(self.dirbase_offset));
        log::trace!("enumerating pxes, pml4 pfn {:#x}", cr3.pml4_pfn());

        for index in 0..ENTRIES_PER_TABLE {
            if let Some(ptr) = entry_at(cr3.pml4_pfn(), index as u16) {
                if read_entry(ptr).valid() {
                    callback(index, ptr);
                }
            }
        }

        Ok(())
    }
}

impl Default for PageTableWalker {
    fn default() -> Self {
        Self::new()
    }
}

/// enumerate every valid PPE beneath a PXE
pub fn enumerate_ppes_of_pxe(
    pxe: NonNull<PtEntry>,
    callback: impl FnMut(usize, NonNull<PtEntry>),
) -> Result<()> {
    enumerate_children(pxe, callback)
}

/// enumerate every valid PDE beneath a PPE
pub fn enumerate_pdes_of_ppe(
    ppe: NonNull<PtEntry>,
    callback: impl FnMut(usize, NonNull<PtEntry>),
) -> Result<()> {
    enumerate_children(ppe, callback)
}

/// enumerate every valid PTE beneath a PDE
pub fn enumerate_ptes_of_pde(
    pde: NonNull<PtEntry>,
    callback: impl FnMut(usize, NonNull<PtEntry>),
) -> Result<()> {
    enumerate_children(pde, callback)
}

/// walk the 512 children of one parent entry, skipping invalid ones
fn enumerate_children(
    parent: NonNull<PtEntry>,
    mut callback: impl FnMut(usize, NonNull<PtEntry>),
) -> Result<()> {
    let parent_entry = read_entry(parent);

    if !parent_entry.valid() {
        return Err(EasyNtError::InvalidAddress {
            address: parent.as_ptr() as u64,
        });
    }

    if parent_entry.large_page() {
        return Err(EasyNtError::NotSupported {
            context: "large-page leaf has no child table",
        });
    }

    for index in 0..ENTRIES_PER_TABLE {
        if let Some(ptr) = entry_at(parent_entry.page_frame_number(), index as u16) {
            if read_entry(ptr).valid() {
                callback(index, ptr);
            }
        }
    }

    Ok(())
}

/// kernel-mapped pointer to the `index`-th entry of the table at
/// `parent_pfn`, or `None` when the mapping is not accessible
fn entry_at(parent_pfn: u64, index: u16) -> Option<NonNull<PtEntry>> {
    let physical = pfn_to_page(parent_pfn) + index as u64 * ENTRY_SIZE as u64;

    // SAFETY: MmGetVirtualForPhysical is total; the result is only used
    // after the validity probe
    let virtual_address = unsafe { MmGetVirtualForPhysical(physical) };
    let ptr = NonNull::new(virtual_address as *mut PtEntry)?;

    // SAFETY: probing accessibility of a kernel virtual address
    if unsafe { MmIsAddressValid(ptr.as_ptr() as *const c_void) } == 0 {
        return None;
    }

    Some(ptr)
}

/// volatile snapshot of a live hardware entry
fn read_entry(ptr: NonNull<PtEntry>) -> PtEntry {
    // SAFETY: ptr passed the accessibility probe in entry_at; volatile
    // because the hardware may update the entry concurrently
    unsafe { ptr.as_ptr().read_volatile() }
}

// memory manager functions
extern "system" {
    fn MmGetVirtualForPhysical(PhysicalAddress: u64) -> *mut c_void;
    fn MmIsAddressValid(VirtualAddress: *const c_void) -> u8;
}
