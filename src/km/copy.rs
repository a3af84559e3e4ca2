//! Safe cross-process virtual memory copy
//!
//! Two interchangeable strategies behind one contract: trust the native
//! `MmCopyVirtualMemory`, or stage the transfer manually through pool.
//! The staged path exists because the 19041 kernel line ships a broken
//! native primitive; the selection is runtime state so both paths are
//! compiled and testable in a single build.

use core::ffi::c_void;

use crate::error::{status, EasyNtError, NtStatus, Result};
use crate::km::pool::{PoolBuffer, PoolType};
use crate::km::process::{AttachGuard, Eprocess, ExitSyncGuard};
use crate::paging::PAGE_SIZE;
use crate::staging::{
    degraded_staging_len, fits_on_stack, preferred_staging_len, STACK_BUFFER_SIZE,
};
use crate::version::{copy_strategy_for, CopyStrategy, WindowsVersion};

const KERNEL_MODE: u8 = 0;

/// moves bytes between two process address spaces
#[derive(Debug, Clone, Copy)]
pub struct CopyEngine {
    strategy: CopyStrategy,
}

impl CopyEngine {
    /// engine with the strategy detected for the running kernel build
    pub fn new() -> Self {
        let strategy = copy_strategy_for(WindowsVersion::current());
        if strategy == CopyStrategy::Staged {
            log::warn!("native MmCopyVirtualMemory regressed on this build, staging copies through pool");
        }
        Self::with_strategy(strategy)
    }

    /// engine with an explicit strategy (useful under test)
    pub const fn with_strategy(strategy: CopyStrategy) -> Self {
        Self { strategy }
    }

    /// the selected strategy
    pub const fn strategy(&self) -> CopyStrategy {
        self.strategy
    }

    /// copy `size` bytes from `source_address` in `source` to
    /// `destination_address` in `destination`
    ///
    /// Returns the number of bytes copied. A failure after some bytes
    /// moved reports [`EasyNtError::PartialCopy`] with the exact count.
    ///
    /// Destination accessibility is checked page-by-page with
    /// `MmIsAddressValid` rather than a true write probe, so
    /// reserved-but-uncommitted destination pages are caught only when
    /// the copy reaches them.
    ///
    /// A zero `size` is a caller logic error and copies nothing.
    pub fn copy_virtual_memory(
        &self,
        source: &Eprocess,
        source_address: *const c_void,
        destination: &Eprocess,
        destination_address: *mut c_void,
        size: usize,
    ) -> Result<usize> {
        if source_address.is_null() {
            return Err(EasyNtError::InvalidParameter { index: 2 });
        }

        if destination_address.is_null() {
            return Err(EasyNtError::InvalidParameter { index: 4 });
        }

        debug_assert!(size != 0, "zero-length copy request");
        if size == 0 {
            return Ok(0);
        }

        // cheap local probe when we already are in either context
        if source.is_current() && !is_address_valid(source_address) {
            return Err(EasyNtError::InvalidAddress {
                address: source_address as u64,
            });
        }

        if destination.is_current() && !is_address_valid(destination_address) {
            return Err(EasyNtError::InvalidAddress {
                address: destination_address as u64,
            });
        }

        match self.strategy {
            CopyStrategy::Native => {
                native_copy(source, source_address, destination, destination_address, size)
            }
            CopyStrategy::Staged => {
                staged_copy(source, source_address, destination, destination_address, size)
            }
        }
    }
}

impl Default for CopyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// copy with the strategy detected for the running build
pub fn copy_virtual_memory(
    source: &Eprocess,
    source_address: *const c_void,
    destination: &Eprocess,
    destination_address: *mut c_void,
    size: usize,
) -> Result<usize> {
    CopyEngine::new().copy_virtual_memory(
        source,
        source_address,
        destination,
        destination_address,
        size,
    )
}

/// copy within the calling thread's own process
pub fn copy_virtual_memory_local(
    source_address: *const c_void,
    destination_address: *mut c_void,
    size: usize,
) -> Result<usize> {
    let current = Eprocess::current();
    CopyEngine::new().copy_virtual_memory(
        &current,
        source_address,
        &current,
        destination_address,
        size,
    )
}

/// delegate to the native primitive
fn native_copy(
    source: &Eprocess,
    source_address: *const c_void,
    destination: &Eprocess,
    destination_address: *mut c_void,
    size: usize,
) -> Result<usize> {
    let mut bytes_copied = 0usize;

    // SAFETY: both processes are valid referenced EPROCESS objects
    let status = unsafe {
        MmCopyVirtualMemory(
            source.as_raw(),
            source_address,
            destination.as_raw(),
            destination_address,
            size,
            KERNEL_MODE,
            &mut bytes_copied,
        )
    };

    if status::nt_success(status) {
        return Ok(bytes_copied);
    }

    if bytes_copied != 0 {
        log::warn!(
            "native copy stopped after {bytes_copied} of {size} bytes: {status:#x}"
        );
        return Err(EasyNtError::PartialCopy { bytes_copied });
    }

    Err(EasyNtError::NtStatus(status))
}

/// manual staged copy: attach to each address space in turn and move the
/// bytes through an intermediate buffer
fn staged_copy(
    source: &Eprocess,
    source_address: *const c_void,
    destination: &Eprocess,
    destination_address: *mut c_void,
    size: usize,
) -> Result<usize> {
    // hold the foreign process's lifetime; attaching to an exiting
    // process races with its address-space teardown
    let _exit_sync = if !source.is_current() {
        Some(ExitSyncGuard::acquire(source)?)
    } else if !destination.is_current() {
        Some(ExitSyncGuard::acquire(destination)?)
    } else {
        None
    };

    let mut stack_buffer = [0u8; STACK_BUFFER_SIZE];
    let mut pool_buffer: Option<PoolBuffer> = None;
    let mut staging_len = preferred_staging_len(size);

    if !fits_on_stack(staging_len) {
        loop {
            match PoolBuffer::new(staging_len, PoolType::NonPaged) {
                Ok(buffer) => {
                    pool_buffer = Some(buffer);
                    break;
                }
                Err(_) => match degraded_staging_len(staging_len) {
                    Some(smaller) => staging_len = smaller,
                    // pool exhausted all the way down; the stack buffer
                    // always works
                    None => {
                        staging_len = STACK_BUFFER_SIZE;
                        break;
                    }
                },
            }
        }
    }

    let staging_ptr = match pool_buffer.as_mut() {
        Some(buffer) => buffer.as_ptr(),
        None => {
            staging_len = staging_len.min(STACK_BUFFER_SIZE);
            stack_buffer.as_mut_ptr()
        }
    };

    let mut bytes_copied = 0usize;

    while bytes_copied < size {
        let chunk = (size - bytes_copied).min(staging_len);
        let source_cursor = (source_address as usize + bytes_copied) as *const u8;
        let destination_cursor = (destination_address as usize + bytes_copied) as *mut u8;

        // stage in from the source address space
        {
            let _attach = AttachGuard::attach(source);

            if !is_range_resident(source_cursor as *const c_void, chunk) {
                log::warn!("staged copy aborted at {bytes_copied} of {size} bytes (source)");
                return Err(EasyNtError::PartialCopy { bytes_copied });
            }

            // SAFETY: the range passed the residency scan while attached
            unsafe {
                core::ptr::copy_nonoverlapping(source_cursor, staging_ptr, chunk);
            }
        }

        // stage out into the destination address space
        {
            let _attach = AttachGuard::attach(destination);

            if !is_range_resident(destination_cursor as *const c_void, chunk) {
                log::warn!("staged copy aborted at {bytes_copied} of {size} bytes (destination)");
                return Err(EasyNtError::PartialCopy { bytes_copied });
            }

            // SAFETY: the range passed the residency scan while attached
            unsafe {
                core::ptr::copy_nonoverlapping(staging_ptr, destination_cursor, chunk);
            }
        }

        bytes_copied += chunk;
    }

    Ok(bytes_copied)
}

/// quick validity probe for one address
fn is_address_valid(address: *const c_void) -> bool {
    // SAFETY: probing accessibility only
    unsafe { MmIsAddressValid(address) != 0 }
}

/// page-by-page residency scan of `[address, address + size)`
fn is_range_resident(address: *const c_void, size: usize) -> bool {
    let start = address as usize;
    let end = start.saturating_add(size);

    let mut current = start;
    while current < end {
        if !is_address_valid(current as *const c_void) {
            return false;
        }
        current = current.saturating_add(PAGE_SIZE);
    }

    // the scan steps by page from the first byte; the final byte can sit
    // on a page the loop never reached
    is_address_valid((end - 1) as *const c_void)
}

// memory manager functions
extern "system" {
    fn MmCopyVirtualMemory(
        SourceProcess: *mut c_void,
        SourceAddress: *const c_void,
        TargetProcess: *mut c_void,
        TargetAddress: *mut c_void,
        BufferSize: usize,
        PreviousMode: u8,
        ReturnSize: *mut usize,
    ) -> NtStatus;

    fn MmIsAddressValid(VirtualAddress: *const c_void) -> u8;
}
