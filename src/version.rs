//! Windows version detection, release mapping and version-dependent seams
//!
//! Two pieces of this library depend on the exact host build: the byte
//! offset of `DirectoryTableBase` inside the opaque `EPROCESS` object, and
//! whether `MmCopyVirtualMemory` is usable at all. Both are funnelled
//! through this module so a new build is a one-line change here, never a
//! change at a call site.

/// represents a specific Windows version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

/// named Windows releases with known build numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WindowsRelease {
    Windows10_1607, // 14393
    Windows10_1703, // 15063
    Windows10_1709, // 16299
    Windows10_1803, // 17134
    Windows10_1809, // 17763
    Windows10_1903, // 18362
    Windows10_1909, // 18363
    Windows10_2004, // 19041
    Windows10_20H2, // 19042
    Windows10_21H1, // 19043
    Windows10_21H2, // 19044
    Windows10_22H2, // 19045
    Windows11_21H2, // 22000
    Windows11_22H2, // 22621
    Windows11_23H2, // 22631
    Windows11_24H2, // 26100
    Unknown,
}

impl WindowsVersion {
    /// minimum supported version (Windows 10 1607)
    pub const MIN_SUPPORTED: Self = Self {
        major: 10,
        minor: 0,
        build: 14393,
    };

    /// query the running kernel via `RtlGetVersion`
    #[cfg(feature = "kernel")]
    pub fn current() -> Self {
        let mut info = OsVersionInfo {
            os_version_info_size: core::mem::size_of::<OsVersionInfo>() as u32,
            ..OsVersionInfo::default()
        };

        // SAFETY: RtlGetVersion only writes into the provided structure
        unsafe {
            RtlGetVersion(&mut info);
        }

        let version = Self {
            major: info.major_version,
            minor: info.minor_version,
            build: info.build_number,
        };

        log::trace!(
            "detected windows {}.{} build {}",
            version.major,
            version.minor,
            version.build
        );

        version
    }

    /// map the build number to a named release
    pub const fn release(&self) -> WindowsRelease {
        match self.build {
            14393 => WindowsRelease::Windows10_1607,
            15063 => WindowsRelease::Windows10_1703,
            16299 => WindowsRelease::Windows10_1709,
            17134 => WindowsRelease::Windows10_1803,
            17763 => WindowsRelease::Windows10_1809,
            18362 => WindowsRelease::Windows10_1903,
            18363 => WindowsRelease::Windows10_1909,
            19041 => WindowsRelease::Windows10_2004,
            19042 => WindowsRelease::Windows10_20H2,
            19043 => WindowsRelease::Windows10_21H1,
            19044 => WindowsRelease::Windows10_21H2,
            19045 => WindowsRelease::Windows10_22H2,
            22000 => WindowsRelease::Windows11_21H2,
            22621 => WindowsRelease::Windows11_22H2,
            22631 => WindowsRelease::Windows11_23H2,
            26100 => WindowsRelease::Windows11_24H2,
            _ => WindowsRelease::Unknown,
        }
    }

    /// whether this library supports the running build
    pub const fn is_supported(&self) -> bool {
        self.major >= 10 && self.build >= Self::MIN_SUPPORTED.build
    }
}

/// byte offset of `DirectoryTableBase` inside the `EPROCESS` object
///
/// Reading the page-table root out of an opaque kernel structure is the
/// single most fragile operation in this library; every supported x64
/// build keeps it at 0x28, but the seam exists so a diverging build is
/// handled here and nowhere else. Revalidate per target OS build.
pub const fn directory_table_base_offset(version: WindowsVersion) -> usize {
    // stable since the Windows 10 1607 EPROCESS layout
    let _ = version;
    0x28
}

/// how the cross-process copy engine moves bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// trust `MmCopyVirtualMemory`
    Native,
    /// stage through non-paged pool with manual attach/detach
    Staged,
}

/// select the copy strategy for a build
///
/// `MmCopyVirtualMemory` is broken on the 19041 kernel line (Windows 10
/// 2004 through 22H2 share it); those builds always get the staged path.
pub const fn copy_strategy_for(version: WindowsVersion) -> CopyStrategy {
    match version.build {
        19041..=19045 => CopyStrategy::Staged,
        _ => CopyStrategy::Native,
    }
}

/// `RTL_OSVERSIONINFOW` layout consumed by `RtlGetVersion`
#[cfg(feature = "kernel")]
#[repr(C)]
struct OsVersionInfo {
    os_version_info_size: u32,
    major_version: u32,
    minor_version: u32,
    build_number: u32,
    platform_id: u32,
    csd_version: [u16; 128],
}

#[cfg(feature = "kernel")]
impl Default for OsVersionInfo {
    fn default() -> Self {
        Self {
            os_version_info_size: 0,
            major_version: 0,
            minor_version: 0,
            build_number: 0,
            platform_id: 0,
            csd_version: [0; 128],
        }
    }
}

#[cfg(feature = "kernel")]
extern "system" {
    fn RtlGetVersion(VersionInformation: *mut OsVersionInfo) -> crate::error::NtStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn build(n: u32) -> WindowsVersion {
        WindowsVersion {
            major: 10,
            minor: 0,
            build: n,
        }
    }

    #[test]
    fn test_release_mapping() {
        assert_eq!(build(14393).release(), WindowsRelease::Windows10_1607);
        assert_eq!(build(19041).release(), WindowsRelease::Windows10_2004);
        assert_eq!(build(26100).release(), WindowsRelease::Windows11_24H2);
        assert_eq!(build(12345).release(), WindowsRelease::Unknown);
    }

    #[test]
    fn test_release_ordering() {
        assert!(WindowsRelease::Windows10_1607 < WindowsRelease::Windows10_2004);
        assert!(WindowsRelease::Windows11_21H2 > WindowsRelease::Windows10_22H2);
    }

    #[test]
    fn test_copy_strategy_selection() {
        // the regressed 19041 kernel line gets the staged path
        assert_eq!(copy_strategy_for(build(19041)), CopyStrategy::Staged);
        assert_eq!(copy_strategy_for(build(19045)), CopyStrategy::Staged);
        // older and newer builds trust the native primitive
        assert_eq!(copy_strategy_for(build(17763)), CopyStrategy::Native);
        assert_eq!(copy_strategy_for(build(22000)), CopyStrategy::Native);
    }

    #[test]
    fn test_dirbase_offset_stable() {
        assert_eq!(directory_table_base_offset(build(14393)), 0x28);
        assert_eq!(directory_table_base_offset(build(26100)), 0x28);
    }

    #[test]
    fn test_support_floor() {
        assert!(build(14393).is_supported());
        assert!(!build(10240).is_supported());
        assert!(!WindowsVersion {
            major: 6,
            minor: 3,
            build: 9600
        }
        .is_supported());
    }
}
