//! Kernel-mode surface of easynt
//!
//! Everything here runs synchronously on the calling driver thread and
//! links against ntoskrnl exports. The shared discipline across modules:
//! every acquired resource (pool, mapping, attach state, handle, exit
//! synchronization) is an RAII guard released on every exit path.
//!
//! # Safety
//!
//! Kernel-mode code runs at arbitrary privilege. Improper use can cause
//! system instability or bugchecks. All unsafe operations carry SAFETY
//! comments stating their preconditions.

pub mod copy;
pub mod memory;
pub mod pagetable;
pub mod physical;
pub mod pool;
pub mod process;

pub use copy::{copy_virtual_memory, copy_virtual_memory_local, CopyEngine};
pub use memory::{
    allocate_virtual_memory, enumerate_virtual_memory, enumerate_virtual_memory_in_range,
    free_virtual_memory, query_virtual_memory, zero_virtual_memory,
};
pub use pagetable::{
    enumerate_pdes_of_ppe, enumerate_ppes_of_pxe, enumerate_ptes_of_pde, PageTableWalker,
};
pub use physical::{
    read_physical, with_physical_mapping, write_physical, zero_physical, PhysicalMapping,
};
pub use pool::{PoolAllocator, PoolBuffer, PoolTag, PoolType};
pub use process::{AttachGuard, Eprocess, ExitSyncGuard, ProcessHandle};
