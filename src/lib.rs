#![cfg(windows)]
#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)] // we document safety in SAFETY comments

//! easynt: helper extensions over the Windows NT kernel API
//!
//! This library provides convenience routines for kernel-mode drivers:
//!
//! - Tagged pool allocation with RAII buffers
//! - Physical memory access through scoped `MmMapIoSpace` mappings
//! - Manual x86-64 page-table walking and per-level enumeration
//! - Virtual memory allocation, query and region enumeration in arbitrary
//!   processes
//! - Safe cross-process memory copy, including a staged fallback for
//!   builds where `MmCopyVirtualMemory` is broken
//!
//! Every routine is synchronous and stateless: the calling driver owns all
//! execution context, and each operation releases everything it acquired
//! (handles, mappings, attach state, pool) on every exit path.
//!
//! # Feature Flags
//!
//! - `std` (default): use the standard library. Disable for `no_std`.
//! - `kernel`: the kernel-mode surface in [`km`]. Requires linking against
//!   ntoskrnl exports and is intended for `no_std` driver builds.

#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod paging;
pub mod region;
pub mod staging;
pub mod version;

#[cfg(feature = "kernel")]
pub mod km;

// re-exports for convenience
pub use error::{EasyNtError, NtStatus, Result};
pub use paging::AddressTranslation;
pub use region::MemoryBasicInformation;
pub use version::{CopyStrategy, WindowsRelease, WindowsVersion};

/// library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
