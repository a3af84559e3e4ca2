//! Physical memory access through scoped `MmMapIoSpace` mappings

use core::ffi::c_void;
use core::ptr::NonNull;

use crate::error::{EasyNtError, Result};
use crate::paging::page_round_up;

/// cache type for physical mappings
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    NonCached = 0,
    Cached = 1,
    WriteCombined = 2,
}

/// a temporary kernel virtual window over a physical range
///
/// Strictly scoped: created, used and torn down within one operation.
/// Maps the page-rounded range uncached and unmaps the identical rounded
/// size on drop, so map and unmap always balance.
pub struct PhysicalMapping {
    base: NonNull<c_void>,
    rounded_size: usize,
}

impl PhysicalMapping {
    /// map `size` bytes at `physical_address` into system space
    pub fn map(physical_address: u64, size: usize) -> Result<Self> {
        let rounded_size = page_round_up(size);

        // SAFETY: MmMapIoSpace accepts any physical range; null means the
        // memory manager refused the mapping
        let base = unsafe {
            MmMapIoSpace(physical_address, rounded_size, CacheType::NonCached as u32)
        };

        let base = NonNull::new(base).ok_or(EasyNtError::MappingFailed {
            address: physical_address,
            size,
        })?;

        Ok(Self { base, rounded_size })
    }

    /// kernel virtual address of the mapped window
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr() as *mut u8
    }

    /// page-rounded size of the window
    pub fn rounded_size(&self) -> usize {
        self.rounded_size
    }
}

impl Drop for PhysicalMapping {
    fn drop(&mut self) {
        // SAFETY: unmapping the exact window mapped in map()
        unsafe {
            MmUnmapIoSpace(self.base.as_ptr(), self.rounded_size);
        }
    }
}

/// map physical memory and run a callback inside the mapping's scope
///
/// The unmap happens on every path out of the callback, including panic
/// unwind where the driver build allows one.
pub fn with_physical_mapping<R>(
    physical_address: u64,
    size: usize,
    f: impl FnOnce(*mut u8, usize) -> R,
) -> Result<R> {
    if physical_address == 0 {
        return Err(EasyNtError::InvalidParameter { index: 1 });
    }

    if size == 0 {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    let mapping = PhysicalMapping::map(physical_address, size)?;
    Ok(f(mapping.as_ptr(), size))
}

/// read physical memory into a caller buffer
pub fn read_physical(physical_address: u64, buffer: &mut [u8]) -> Result<()> {
    if physical_address == 0 {
        return Err(EasyNtError::InvalidParameter { index: 1 });
    }

    if buffer.is_empty() {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    let mapping = PhysicalMapping::map(physical_address, buffer.len())?;

    // SAFETY: the window covers at least buffer.len() bytes
    unsafe {
        core::ptr::copy_nonoverlapping(mapping.as_ptr(), buffer.as_mut_ptr(), buffer.len());
    }

    Ok(())
}

/// write a caller buffer into physical memory
pub fn write_physical(physical_address: u64, buffer: &[u8]) -> Result<()> {
    if physical_address == 0 {
        return Err(EasyNtError::InvalidParameter { index: 1 });
    }

    if buffer.is_empty() {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    let mapping = PhysicalMapping::map(physical_address, buffer.len())?;

    // SAFETY: the window covers at least buffer.len() bytes
    unsafe {
        core::ptr::copy_nonoverlapping(buffer.as_ptr(), mapping.as_ptr(), buffer.len());
    }

    Ok(())
}

/// zero-fill physical memory
pub fn zero_physical(physical_address: u64, size: usize) -> Result<()> {
    if physical_address == 0 {
        return Err(EasyNtError::InvalidParameter { index: 1 });
    }

    if size == 0 {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    let mapping = PhysicalMapping::map(physical_address, size)?;

    // SAFETY: the window covers at least size bytes; volatile so the
    // zeroing is not elided
    unsafe {
        secure_zero(mapping.as_ptr(), size);
    }

    Ok(())
}

/// volatile zero that the optimizer cannot remove
///
/// # Safety
/// `ptr` must be valid for `size` writable bytes
pub(crate) unsafe fn secure_zero(ptr: *mut u8, size: usize) {
    let mut current = ptr;
    let end = unsafe { ptr.add(size) };
    while current < end {
        // SAFETY: current stays inside [ptr, ptr + size)
        unsafe {
            current.write_volatile(0);
            current = current.add(1);
        }
    }
}

// memory manager functions
extern "system" {
    fn MmMapIoSpace(PhysicalAddress: u64, NumberOfBytes: usize, CacheType: u32) -> *mut c_void;
    fn MmUnmapIoSpace(BaseAddress: *mut c_void, NumberOfBytes: usize);
}
