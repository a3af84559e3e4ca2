//! Process references, attach/detach scopes and exit synchronization

use core::ffi::c_void;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::error::{status, EasyNtError, NtStatus, Result};

pub const OBJ_KERNEL_HANDLE: u32 = 0x200;
pub const OBJ_CASE_INSENSITIVE: u32 = 0x40;
pub const GENERIC_ALL: u32 = 0x1000_0000;

const KERNEL_MODE: u8 = 0;

/// reference to an `EPROCESS` object
///
/// Owned references (from [`Eprocess::lookup`]) hold an object reference
/// that is dropped with the value; borrowed references (from
/// [`Eprocess::current`] or [`Eprocess::from_raw`]) are the caller's
/// responsibility and are never dereferenced on drop.
pub struct Eprocess {
    raw: NonNull<c_void>,
    owned: bool,
}

impl Eprocess {
    /// lookup a process by ID, taking an object reference
    pub fn lookup(process_id: u32) -> Result<Self> {
        let mut eprocess: *mut c_void = core::ptr::null_mut();

        // SAFETY: PsLookupProcessByProcessId writes a referenced EPROCESS on success
        let status =
            unsafe { PsLookupProcessByProcessId(process_id as *mut c_void, &mut eprocess) };

        if !status::nt_success(status) {
            return Err(EasyNtError::NtStatus(status));
        }

        NonNull::new(eprocess)
            .map(|raw| Self { raw, owned: true })
            .ok_or(EasyNtError::NtStatus(status::STATUS_UNSUCCESSFUL))
    }

    /// the calling thread's process, borrowed
    pub fn current() -> Self {
        // SAFETY: PsGetCurrentProcess never fails in a thread context
        let raw = unsafe { PsGetCurrentProcess() };
        Self {
            // SAFETY: the current process object is never null
            raw: unsafe { NonNull::new_unchecked(raw) },
            owned: false,
        }
    }

    /// wrap a caller-owned `EPROCESS` pointer without taking a reference
    ///
    /// # Safety
    /// `raw` must point to a referenced, not-yet-exited `EPROCESS` that
    /// stays valid for the lifetime of the returned value
    pub unsafe fn from_raw(raw: NonNull<c_void>) -> Self {
        Self { raw, owned: false }
    }

    /// get raw `EPROCESS` pointer
    pub fn as_raw(&self) -> *mut c_void {
        self.raw.as_ptr()
    }

    /// whether this is the calling thread's own process
    pub fn is_current(&self) -> bool {
        // SAFETY: comparing object identity only
        self.raw.as_ptr() == unsafe { PsGetCurrentProcess() }
    }

    /// read `DirectoryTableBase` from the raw object bytes
    ///
    /// `offset` comes from [`crate::version::directory_table_base_offset`];
    /// it is a kernel-internal layout detail, revalidated per OS build.
    pub(crate) fn directory_table_base(&self, offset: usize) -> u64 {
        // SAFETY: EPROCESS is nonpaged and valid while referenced; offset
        // is the version-validated DirectoryTableBase location
        unsafe { (self.raw.as_ptr().cast::<u8>().add(offset) as *const u64).read_volatile() }
    }
}

impl Drop for Eprocess {
    fn drop(&mut self) {
        if self.owned {
            // SAFETY: we hold the reference taken in lookup()
            unsafe {
                ObDereferenceObject(self.raw.as_ptr());
            }
        }
    }
}

/// `KAPC_STATE` backing store for a stack attach
#[repr(C)]
struct ApcState {
    apc_list_head: [[*mut c_void; 2]; 2],
    process: *mut c_void,
    kernel_apc_in_progress: u8,
    kernel_apc_pending: u8,
    user_apc_pending: u8,
}

impl Default for ApcState {
    fn default() -> Self {
        Self {
            apc_list_head: [[core::ptr::null_mut(); 2]; 2],
            process: core::ptr::null_mut(),
            kernel_apc_in_progress: 0,
            kernel_apc_pending: 0,
            user_apc_pending: 0,
        }
    }
}

/// scoped attach to another process's address space
///
/// Attaches on construction, detaches on drop; the calling thread can
/// hold at most one attach at a time, which the borrow on the process
/// reference does not enforce but the kernel does.
pub struct AttachGuard<'p> {
    apc_state: ApcState,
    _process: PhantomData<&'p Eprocess>,
}

impl<'p> AttachGuard<'p> {
    /// attach the calling thread to the process's address space
    pub fn attach(process: &'p Eprocess) -> Self {
        let mut apc_state = ApcState::default();

        // SAFETY: process is a valid referenced EPROCESS
        unsafe {
            KeStackAttachProcess(process.as_raw(), &mut apc_state as *mut _ as *mut c_void);
        }

        Self {
            apc_state,
            _process: PhantomData,
        }
    }
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: we attached with this APC state in attach()
        unsafe {
            KeUnstackDetachProcess(&mut self.apc_state as *mut _ as *mut c_void);
        }
    }
}

/// scoped exit synchronization on a process
///
/// While held, the process cannot complete termination and release its
/// address space. This is a lock on process lifetime, not on its memory
/// contents.
pub struct ExitSyncGuard<'p> {
    process: &'p Eprocess,
}

impl<'p> ExitSyncGuard<'p> {
    /// acquire exit synchronization; fails if the process is already
    /// terminating
    pub fn acquire(process: &'p Eprocess) -> Result<Self> {
        // SAFETY: process is a valid referenced EPROCESS
        let status = unsafe { PsAcquireProcessExitSynchronization(process.as_raw()) };

        if !status::nt_success(status) {
            return Err(EasyNtError::NtStatus(status));
        }

        Ok(Self { process })
    }
}

impl Drop for ExitSyncGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: acquired in acquire()
        unsafe {
            PsReleaseProcessExitSynchronization(self.process.as_raw());
        }
    }
}

/// kernel handle to a process, closed on drop
///
/// The calling thread's own process uses the `ZwCurrentProcess` pseudo
/// handle, which is never closed.
pub struct ProcessHandle {
    raw: *mut c_void,
    owned: bool,
}

impl ProcessHandle {
    /// open a kernel handle, or the pseudo handle for the current process
    pub fn open(process: &Eprocess, desired_access: u32) -> Result<Self> {
        if process.is_current() {
            return Ok(Self {
                raw: usize::MAX as *mut c_void, // ZwCurrentProcess()
                owned: false,
            });
        }

        let mut handle: *mut c_void = core::ptr::null_mut();

        // SAFETY: process is a valid referenced EPROCESS; PsProcessType is
        // the exported process object type
        let status = unsafe {
            ObOpenObjectByPointer(
                process.as_raw(),
                OBJ_KERNEL_HANDLE | OBJ_CASE_INSENSITIVE,
                core::ptr::null_mut(),
                desired_access,
                PsProcessType,
                KERNEL_MODE,
                &mut handle,
            )
        };

        if !status::nt_success(status) {
            return Err(EasyNtError::NtStatus(status));
        }

        Ok(Self {
            raw: handle,
            owned: true,
        })
    }

    /// get the raw handle value
    pub fn as_raw(&self) -> *mut c_void {
        self.raw
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.owned {
            // SAFETY: handle was opened in open()
            unsafe {
                ZwClose(self.raw);
            }
        }
    }
}

// process manager functions
extern "system" {
    static PsProcessType: *mut c_void;

    fn PsLookupProcessByProcessId(ProcessId: *mut c_void, Process: *mut *mut c_void) -> NtStatus;
    fn PsGetCurrentProcess() -> *mut c_void;
    fn PsAcquireProcessExitSynchronization(Process: *mut c_void) -> NtStatus;
    fn PsReleaseProcessExitSynchronization(Process: *mut c_void);

    fn ObDereferenceObject(Object: *mut c_void);
    fn ObOpenObjectByPointer(
        Object: *mut c_void,
        HandleAttributes: u32,
        PassedAccessState: *mut c_void,
        DesiredAccess: u32,
        ObjectType: *mut c_void,
        AccessMode: u8,
        Handle: *mut *mut c_void,
    ) -> NtStatus;

    fn KeStackAttachProcess(Process: *mut c_void, ApcState: *mut c_void);
    fn KeUnstackDetachProcess(ApcState: *mut c_void);

    fn ZwClose(Handle: *mut c_void) -> NtStatus;
}
