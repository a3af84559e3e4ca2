//! Tagged kernel pool allocation

use core::ffi::c_void;
use core::ptr::NonNull;

use crate::error::{EasyNtError, Result};

/// pool allocation type
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolType {
    /// non-paged pool (always resident in physical memory)
    NonPaged = 0,
    /// paged pool (can be paged out)
    Paged = 1,
    /// non-paged pool, no execute
    NonPagedNx = 512,
}

impl Default for PoolType {
    fn default() -> Self {
        Self::NonPagedNx
    }
}

/// pool allocation tag (4-byte identifier for debugging)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTag(pub u32);

impl PoolTag {
    /// create from 4-character string
    pub const fn from_chars(chars: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(chars))
    }

    /// default tag for easynt allocations
    pub const EASYNT: Self = Self::from_chars(*b"EzNt");
}

impl Default for PoolTag {
    fn default() -> Self {
        Self::EASYNT
    }
}

/// kernel pool allocator
pub struct PoolAllocator {
    pool_type: PoolType,
    tag: PoolTag,
}

impl PoolAllocator {
    /// create new pool allocator with specified type and tag
    pub const fn new(pool_type: PoolType, tag: PoolTag) -> Self {
        Self { pool_type, tag }
    }

    /// create non-paged allocator with the default tag
    pub const fn non_paged() -> Self {
        Self::new(PoolType::NonPagedNx, PoolTag::EASYNT)
    }

    /// create paged allocator with the default tag
    pub const fn paged() -> Self {
        Self::new(PoolType::Paged, PoolTag::EASYNT)
    }

    /// allocate memory from pool, securely zeroed
    ///
    /// pool contents may carry bytes from a previous owner; zeroing on
    /// allocation keeps them from leaking into the new user
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Err(EasyNtError::InvalidParameter { index: 1 });
        }

        // SAFETY: ExAllocatePoolWithTag accepts any size and returns null on failure
        let ptr = unsafe { ExAllocatePoolWithTag(self.pool_type as u32, size, self.tag.0) };

        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or(EasyNtError::InsufficientResources { size })?;

        // SAFETY: ptr is a fresh allocation of `size` bytes
        unsafe {
            core::ptr::write_bytes(ptr.as_ptr(), 0, size);
        }

        Ok(ptr)
    }

    /// free previously allocated memory; a null pointer is ignored
    ///
    /// # Safety
    /// non-null `ptr` must have been allocated with this allocator's tag
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        // SAFETY: caller ensures ptr is a live allocation carrying our tag
        unsafe {
            ExFreePoolWithTag(ptr as *mut c_void, self.tag.0);
        }
    }
}

/// RAII wrapper for pool allocations
pub struct PoolBuffer {
    ptr: NonNull<u8>,
    size: usize,
    allocator: PoolAllocator,
}

impl PoolBuffer {
    /// allocate a new zeroed pool buffer
    pub fn new(size: usize, pool_type: PoolType) -> Result<Self> {
        let allocator = PoolAllocator::new(pool_type, PoolTag::EASYNT);
        let ptr = allocator.allocate(size)?;
        Ok(Self {
            ptr,
            size,
            allocator,
        })
    }

    /// get pointer to buffer
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// get buffer as slice
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: buffer is valid for size bytes
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// get buffer as mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: buffer is valid for size bytes and we have exclusive access
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// get buffer size
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated by our allocator
        unsafe { self.allocator.free(self.ptr.as_ptr()) };
    }
}

// kernel pool allocation functions
extern "system" {
    fn ExAllocatePoolWithTag(PoolType: u32, NumberOfBytes: usize, Tag: u32) -> *mut c_void;
    fn ExFreePoolWithTag(P: *mut c_void, Tag: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_tag_from_chars() {
        // tags read backwards in pool dumps, little-endian by convention
        assert_eq!(PoolTag::from_chars(*b"EzNt").0, u32::from_le_bytes(*b"EzNt"));
        assert_eq!(PoolTag::default(), PoolTag::EASYNT);
    }
}
