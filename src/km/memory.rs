//! Virtual memory allocation, query and region enumeration in arbitrary
//! processes
//!
//! Operations open a kernel handle only when the target is not the
//! calling thread's own process, and the handle is closed on every exit
//! path. Freshly allocated and about-to-be-freed pages are zero-filled so
//! stale physical contents never leak across owners.

use core::ffi::c_void;

use crate::error::{status, EasyNtError, NtStatus, Result};
use crate::km::physical::secure_zero;
use crate::km::process::{AttachGuard, Eprocess, ProcessHandle, GENERIC_ALL};
use crate::region::{
    advance_scan_cursor, MemoryBasicInformation, MEM_RELEASE, MM_HIGHEST_USER_ADDRESS,
    MM_LOWEST_USER_ADDRESS,
};

const MEMORY_BASIC_INFORMATION_CLASS: u32 = 0;

/// allocate virtual memory in the given process
///
/// `address_hint` requests a base address; `None` lets the native
/// allocator choose. Pages are zero-filled on success and the resulting
/// base address is returned.
pub fn allocate_virtual_memory(
    process: &Eprocess,
    address_hint: Option<*mut c_void>,
    size: usize,
    allocation_type: u32,
    protection: u32,
) -> Result<*mut c_void> {
    if size == 0 {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    if allocation_type == 0 {
        return Err(EasyNtError::InvalidParameter { index: 3 });
    }

    if protection == 0 {
        return Err(EasyNtError::InvalidParameter { index: 4 });
    }

    let handle = ProcessHandle::open(process, GENERIC_ALL)?;

    let mut base_address = address_hint.unwrap_or(core::ptr::null_mut());
    let mut region_size = size;

    // SAFETY: handle is valid for the scope of the guard
    let status = unsafe {
        ZwAllocateVirtualMemory(
            handle.as_raw(),
            &mut base_address,
            0,
            &mut region_size,
            allocation_type,
            protection,
        )
    };
    drop(handle);

    if !status::nt_success(status) {
        return Err(EasyNtError::NtStatus(status));
    }

    // stale physical contents must not leak into the new owner; the
    // native allocator only guarantees zeroed pages for fresh commits
    let _ = zero_virtual_memory(process, base_address, size);

    Ok(base_address)
}

/// release virtual memory previously allocated in the given process
///
/// The region is zero-filled before it goes back to the kernel. For
/// `MEM_RELEASE` the native call requires a zero region size.
pub fn free_virtual_memory(
    process: &Eprocess,
    base_address: *mut c_void,
    size: usize,
    free_type: u32,
) -> Result<()> {
    if base_address.is_null() {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    if size == 0 {
        return Err(EasyNtError::InvalidParameter { index: 3 });
    }

    if free_type == 0 {
        return Err(EasyNtError::InvalidParameter { index: 4 });
    }

    let handle = ProcessHandle::open(process, GENERIC_ALL)?;

    let _ = zero_virtual_memory(process, base_address, size);

    let mut address = base_address;
    let mut region_size = if free_type == MEM_RELEASE { 0 } else { size };

    // SAFETY: handle is valid for the scope of the guard
    let status =
        unsafe { ZwFreeVirtualMemory(handle.as_raw(), &mut address, &mut region_size, free_type) };
    drop(handle);

    if !status::nt_success(status) {
        return Err(EasyNtError::NtStatus(status));
    }

    Ok(())
}

/// zero virtual memory in the given process
///
/// Attaches to the target so the fill works for foreign processes; the
/// zeroing is volatile and cannot be elided.
pub fn zero_virtual_memory(
    process: &Eprocess,
    base_address: *mut c_void,
    size: usize,
) -> Result<()> {
    if base_address.is_null() {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    if size == 0 {
        return Err(EasyNtError::InvalidParameter { index: 3 });
    }

    let _attach = AttachGuard::attach(process);

    // SAFETY: we are attached to the owning process; the caller vouches
    // for the range the same way the original kernel API would
    unsafe {
        secure_zero(base_address as *mut u8, size);
    }

    Ok(())
}

/// query the memory region containing the given virtual address
pub fn query_virtual_memory(
    process: &Eprocess,
    virtual_address: *const c_void,
) -> Result<MemoryBasicInformation> {
    if virtual_address.is_null() {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    let handle = ProcessHandle::open(process, GENERIC_ALL)?;

    let mut info = MemoryBasicInformation::default();
    let mut returned = 0usize;

    // SAFETY: handle is valid; info is a correctly sized output buffer
    let status = unsafe {
        ZwQueryVirtualMemory(
            handle.as_raw(),
            virtual_address,
            MEMORY_BASIC_INFORMATION_CLASS,
            &mut info as *mut _ as *mut c_void,
            core::mem::size_of::<MemoryBasicInformation>(),
            &mut returned,
        )
    };

    if !status::nt_success(status) {
        return Err(EasyNtError::NtStatus(status));
    }

    Ok(info)
}

/// enumerate the memory regions of a process over the whole user address
/// space
///
/// The callback receives the running region index and the descriptor and
/// returns `true` to stop the scan. Visiting zero regions reports
/// [`EasyNtError::NoMoreEntries`].
pub fn enumerate_virtual_memory(
    process: &Eprocess,
    mut callback: impl FnMut(u32, &MemoryBasicInformation) -> bool,
) -> Result<()> {
    let mut index = 0u32;
    let mut cursor = MM_LOWEST_USER_ADDRESS;

    while cursor < MM_HIGHEST_USER_ADDRESS {
        let Ok(info) = query_virtual_memory(process, cursor as *const c_void) else {
            break;
        };

        let stop = callback(index, &info);
        index += 1;

        if stop {
            break;
        }

        cursor = advance_scan_cursor(cursor, &info);
    }

    if index == 0 {
        return Err(EasyNtError::NoMoreEntries);
    }

    Ok(())
}

/// enumerate the memory regions intersecting `[base_address, base_address
/// + size)`
///
/// The native query snaps to allocation boundaries, so a region may start
/// before the scan cursor; the cursor then advances by the region's
/// remaining bytes only.
pub fn enumerate_virtual_memory_in_range(
    process: &Eprocess,
    base_address: *const c_void,
    size: usize,
    mut callback: impl FnMut(u32, &MemoryBasicInformation) -> bool,
) -> Result<()> {
    if base_address.is_null() {
        return Err(EasyNtError::InvalidParameter { index: 2 });
    }

    if size == 0 {
        return Err(EasyNtError::InvalidParameter { index: 3 });
    }

    let mut index = 0u32;
    let mut cursor = base_address as usize;
    let upper_limit = cursor + size;

    while cursor < upper_limit {
        let Ok(info) = query_virtual_memory(process, cursor as *const c_void) else {
            break;
        };

        let stop = callback(index, &info);
        index += 1;

        if stop {
            break;
        }

        cursor = advance_scan_cursor(cursor, &info);
    }

    if index == 0 {
        return Err(EasyNtError::NoMoreEntries);
    }

    Ok(())
}

// virtual memory functions
extern "system" {
    fn ZwAllocateVirtualMemory(
        ProcessHandle: *mut c_void,
        BaseAddress: *mut *mut c_void,
        ZeroBits: usize,
        RegionSize: *mut usize,
        AllocationType: u32,
        Protect: u32,
    ) -> NtStatus;

    fn ZwFreeVirtualMemory(
        ProcessHandle: *mut c_void,
        BaseAddress: *mut *mut c_void,
        RegionSize: *mut usize,
        FreeType: u32,
    ) -> NtStatus;

    fn ZwQueryVirtualMemory(
        ProcessHandle: *mut c_void,
        BaseAddress: *const c_void,
        MemoryInformationClass: u32,
        MemoryInformation: *mut c_void,
        MemoryInformationLength: usize,
        ReturnLength: *mut usize,
    ) -> NtStatus;
}
