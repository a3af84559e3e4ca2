//! Error types and NTSTATUS codes

use thiserror::Error;

/// NTSTATUS type alias
pub type NtStatus = i32;

/// all errors that can occur in easynt
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EasyNtError {
    /// raw NT status code from a kernel primitive
    #[error("NTSTATUS error: {0:#x}")]
    NtStatus(NtStatus),

    /// a specific positional parameter was null/zero/malformed
    ///
    /// `index` is 1-based, matching `STATUS_INVALID_PARAMETER_n`
    #[error("invalid parameter {index}")]
    InvalidParameter { index: u8 },

    /// a virtual address failed the validity probe
    #[error("invalid address: {address:#x}")]
    InvalidAddress { address: u64 },

    /// an enumeration or query visited nothing
    #[error("no more entries")]
    NoMoreEntries,

    /// pool or virtual memory allocation failed
    #[error("insufficient resources for {size} byte allocation")]
    InsufficientResources { size: usize },

    /// a cross-process copy moved some bytes and then failed
    #[error("partial copy: {bytes_copied} bytes moved")]
    PartialCopy { bytes_copied: usize },

    /// the memory manager refused a physical mapping request
    #[error("physical mapping failed at {address:#x} ({size} bytes)")]
    MappingFailed { address: u64, size: usize },

    /// well-formed request outside what this library implements
    #[error("not supported: {context}")]
    NotSupported { context: &'static str },
}

/// result type for easynt operations
pub type Result<T> = core::result::Result<T, EasyNtError>;

/// common NTSTATUS codes
pub mod status {
    use super::NtStatus;

    pub const STATUS_SUCCESS: NtStatus = 0;
    pub const STATUS_UNSUCCESSFUL: NtStatus = 0xC0000001_u32 as i32;
    pub const STATUS_INVALID_PARAMETER: NtStatus = 0xC000000D_u32 as i32;
    pub const STATUS_NO_MEMORY: NtStatus = 0xC0000017_u32 as i32;
    pub const STATUS_ACCESS_DENIED: NtStatus = 0xC0000022_u32 as i32;
    pub const STATUS_PROCESS_IS_TERMINATING: NtStatus = 0xC000010A_u32 as i32;
    pub const STATUS_INSUFFICIENT_RESOURCES: NtStatus = 0xC000009A_u32 as i32;
    pub const STATUS_NOT_SUPPORTED: NtStatus = 0xC00000BB_u32 as i32;
    pub const STATUS_INTERNAL_ERROR: NtStatus = 0xC00000E5_u32 as i32;
    pub const STATUS_INVALID_ADDRESS: NtStatus = 0xC0000141_u32 as i32;
    pub const STATUS_PARTIAL_COPY: NtStatus = 0x8000000D_u32 as i32;
    pub const STATUS_NO_MORE_ENTRIES: NtStatus = 0x8000001A_u32 as i32;

    // positional invalid-parameter codes, 0xC00000EF..=0xC00000F4
    pub const STATUS_INVALID_PARAMETER_1: NtStatus = 0xC00000EF_u32 as i32;
    pub const STATUS_INVALID_PARAMETER_2: NtStatus = 0xC00000F0_u32 as i32;
    pub const STATUS_INVALID_PARAMETER_3: NtStatus = 0xC00000F1_u32 as i32;
    pub const STATUS_INVALID_PARAMETER_4: NtStatus = 0xC00000F2_u32 as i32;
    pub const STATUS_INVALID_PARAMETER_5: NtStatus = 0xC00000F3_u32 as i32;
    pub const STATUS_INVALID_PARAMETER_6: NtStatus = 0xC00000F4_u32 as i32;

    /// check if NTSTATUS indicates success
    #[inline]
    pub const fn nt_success(status: NtStatus) -> bool {
        status >= 0
    }

    /// check if NTSTATUS indicates a warning
    #[inline]
    pub const fn nt_warning(status: NtStatus) -> bool {
        (status as u32) >> 30 == 2
    }

    /// check if NTSTATUS indicates an error
    #[inline]
    pub const fn nt_error(status: NtStatus) -> bool {
        (status as u32) >> 30 == 3
    }

    /// positional invalid-parameter code for a 1-based parameter index
    ///
    /// indexes outside the 1..=6 range collapse to the generic code
    #[inline]
    pub const fn invalid_parameter(index: u8) -> NtStatus {
        match index {
            1 => STATUS_INVALID_PARAMETER_1,
            2 => STATUS_INVALID_PARAMETER_2,
            3 => STATUS_INVALID_PARAMETER_3,
            4 => STATUS_INVALID_PARAMETER_4,
            5 => STATUS_INVALID_PARAMETER_5,
            6 => STATUS_INVALID_PARAMETER_6,
            _ => STATUS_INVALID_PARAMETER,
        }
    }
}

impl From<NtStatus> for EasyNtError {
    fn from(status: NtStatus) -> Self {
        EasyNtError::NtStatus(status)
    }
}

impl EasyNtError {
    /// convert to NTSTATUS for returning from driver dispatch functions
    pub const fn to_ntstatus(&self) -> NtStatus {
        match self {
            Self::NtStatus(s) => *s,
            Self::InvalidParameter { index } => status::invalid_parameter(*index),
            Self::InvalidAddress { .. } => status::STATUS_INVALID_ADDRESS,
            Self::NoMoreEntries => status::STATUS_NO_MORE_ENTRIES,
            Self::InsufficientResources { .. } => status::STATUS_INSUFFICIENT_RESOURCES,
            Self::PartialCopy { .. } => status::STATUS_PARTIAL_COPY,
            Self::MappingFailed { .. } => status::STATUS_INTERNAL_ERROR,
            Self::NotSupported { .. } => status::STATUS_NOT_SUPPORTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_parameter_codes() {
        assert_eq!(
            EasyNtError::InvalidParameter { index: 1 }.to_ntstatus(),
            status::STATUS_INVALID_PARAMETER_1
        );
        assert_eq!(
            EasyNtError::InvalidParameter { index: 5 }.to_ntstatus(),
            status::STATUS_INVALID_PARAMETER_5
        );
        // out-of-range index collapses to the generic code
        assert_eq!(
            EasyNtError::InvalidParameter { index: 9 }.to_ntstatus(),
            status::STATUS_INVALID_PARAMETER
        );
    }

    #[test]
    fn test_severity_predicates() {
        assert!(status::nt_success(status::STATUS_SUCCESS));
        assert!(!status::nt_success(status::STATUS_PARTIAL_COPY));
        assert!(status::nt_warning(status::STATUS_PARTIAL_COPY));
        assert!(status::nt_warning(status::STATUS_NO_MORE_ENTRIES));
        assert!(status::nt_error(status::STATUS_INVALID_PARAMETER_1));
        assert!(!status::nt_error(status::STATUS_NO_MORE_ENTRIES));
    }

    #[test]
    fn test_status_round_trip() {
        let err = EasyNtError::from(status::STATUS_ACCESS_DENIED);
        assert_eq!(err.to_ntstatus(), status::STATUS_ACCESS_DENIED);
        assert_eq!(
            EasyNtError::PartialCopy { bytes_copied: 4096 }.to_ntstatus(),
            status::STATUS_PARTIAL_COPY
        );
    }
}
