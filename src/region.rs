//! Memory region descriptors and address-space scan arithmetic

/// lowest user-mode address on x64 Windows
pub const MM_LOWEST_USER_ADDRESS: usize = 0x1_0000;

/// highest user-mode address on x64 Windows (exclusive scan bound)
pub const MM_HIGHEST_USER_ADDRESS: usize = 0x7FFF_FFFE_FFFF;

// allocation / free types
pub const MEM_COMMIT: u32 = 0x1000;
pub const MEM_RESERVE: u32 = 0x2000;
pub const MEM_DECOMMIT: u32 = 0x4000;
pub const MEM_RELEASE: u32 = 0x8000;
pub const MEM_FREE: u32 = 0x10000;

// region types
pub const MEM_PRIVATE: u32 = 0x20000;
pub const MEM_MAPPED: u32 = 0x40000;
pub const MEM_IMAGE: u32 = 0x1000000;

// page protections
pub const PAGE_NOACCESS: u32 = 0x01;
pub const PAGE_READONLY: u32 = 0x02;
pub const PAGE_READWRITE: u32 = 0x04;
pub const PAGE_WRITECOPY: u32 = 0x08;
pub const PAGE_EXECUTE: u32 = 0x10;
pub const PAGE_EXECUTE_READ: u32 = 0x20;
pub const PAGE_EXECUTE_READWRITE: u32 = 0x40;
pub const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;
pub const PAGE_GUARD: u32 = 0x100;
pub const PAGE_NOCACHE: u32 = 0x200;

/// `MEMORY_BASIC_INFORMATION`, the x64 layout returned by
/// `ZwQueryVirtualMemory(MemoryBasicInformation)`
///
/// Value type; one contiguous block of a process's address space. Copied
/// out of the query, no ownership semantics.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBasicInformation {
    pub base_address: usize,
    pub allocation_base: usize,
    pub allocation_protect: u32,
    pub partition_id: u16,
    pub region_size: usize,
    pub state: u32,
    pub protect: u32,
    pub memory_type: u32,
}

impl MemoryBasicInformation {
    /// end of the region (exclusive)
    #[inline]
    pub const fn end_address(&self) -> usize {
        self.base_address + self.region_size
    }

    /// whether the region contains the given address
    #[inline]
    pub const fn contains(&self, address: usize) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    /// check if region is committed
    pub const fn is_committed(&self) -> bool {
        self.state == MEM_COMMIT
    }

    /// check if region is reserved but not committed
    pub const fn is_reserved(&self) -> bool {
        self.state == MEM_RESERVE
    }

    /// check if region is free
    pub const fn is_free(&self) -> bool {
        self.state == MEM_FREE
    }

    /// check if region is readable
    pub const fn is_readable(&self) -> bool {
        (self.protect
            & (PAGE_READONLY
                | PAGE_READWRITE
                | PAGE_WRITECOPY
                | PAGE_EXECUTE_READ
                | PAGE_EXECUTE_READWRITE
                | PAGE_EXECUTE_WRITECOPY))
            != 0
    }

    /// check if region is writable
    pub const fn is_writable(&self) -> bool {
        (self.protect
            & (PAGE_READWRITE | PAGE_WRITECOPY | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_WRITECOPY))
            != 0
    }

    /// check if region is executable
    pub const fn is_executable(&self) -> bool {
        (self.protect
            & (PAGE_EXECUTE | PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_WRITECOPY))
            != 0
    }
}

/// next scan cursor after visiting a region
///
/// The native query snaps the reported base down to the allocation
/// boundary, so a ranged scan can receive a region starting before its
/// cursor. Advancing by the full reported size would skip bytes; advancing
/// by the region's remaining bytes keeps the scan exact and cannot loop.
#[inline]
pub const fn advance_scan_cursor(cursor: usize, region: &MemoryBasicInformation) -> usize {
    if cursor > region.base_address {
        cursor + (region.region_size - (cursor - region.base_address))
    } else {
        cursor + region.region_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::PAGE_SIZE;

    const fn region(base: usize, size: usize) -> MemoryBasicInformation {
        MemoryBasicInformation {
            base_address: base,
            allocation_base: base,
            allocation_protect: PAGE_READWRITE,
            partition_id: 0,
            region_size: size,
            state: MEM_COMMIT,
            protect: PAGE_READWRITE,
            memory_type: MEM_PRIVATE,
        }
    }

    #[test]
    fn test_cursor_advances_by_region_size() {
        let r = region(0x10000, 3 * PAGE_SIZE);
        assert_eq!(advance_scan_cursor(0x10000, &r), 0x10000 + 3 * PAGE_SIZE);
    }

    #[test]
    fn test_cursor_overlap_advances_by_remaining_bytes() {
        // query snapped the base one page below the cursor
        let r = region(0x10000, 3 * PAGE_SIZE);
        let cursor = 0x10000 + PAGE_SIZE;
        assert_eq!(advance_scan_cursor(cursor, &r), r.end_address());
    }

    #[test]
    fn test_scan_covers_contiguous_regions_without_gaps() {
        // three adjacent regions; every page must be visited exactly once
        let regions = [
            region(0x10000, 2 * PAGE_SIZE),
            region(0x12000, PAGE_SIZE),
            region(0x13000, 5 * PAGE_SIZE),
        ];

        let mut cursor = 0x10000;
        let mut last_base = 0;
        for r in &regions {
            assert!(r.contains(cursor));
            assert!(r.base_address > last_base || last_base == 0);
            last_base = r.base_address;
            cursor = advance_scan_cursor(cursor, r);
        }
        assert_eq!(cursor, 0x18000);
    }

    #[test]
    fn test_region_predicates() {
        let mut r = region(0x20000, PAGE_SIZE);
        assert!(r.is_committed());
        assert!(r.is_readable());
        assert!(r.is_writable());
        assert!(!r.is_executable());

        r.protect = PAGE_EXECUTE_READ;
        assert!(r.is_executable());
        assert!(r.is_readable());
        assert!(!r.is_writable());

        r.state = MEM_FREE;
        assert!(r.is_free());
        assert!(!r.is_committed());
    }

    #[test]
    fn test_contains_bounds() {
        let r = region(0x10000, PAGE_SIZE);
        assert!(r.contains(0x10000));
        assert!(r.contains(0x10fff));
        assert!(!r.contains(0x11000));
        assert!(!r.contains(0xffff));
    }
}
