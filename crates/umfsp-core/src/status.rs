//! Driver-facing status codes.
//!
//! Every reply sent back to the kernel driver carries exactly one [`Status`].
//! The numeric values are NTSTATUS codes, which is what the driver expects on
//! the wire. Providers report failures with the same type so their statuses
//! can be forwarded without reinterpretation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Operation completed.
    Success,
    /// Lock acquisition did not complete within its bound.
    Timeout,
    /// Directory enumeration is exhausted (success-class terminal status).
    NoMoreEntries,
    /// Generic failure.
    Unsuccessful,
    /// Provider does not implement the requested capability.
    NotImplemented,
    /// Handle was never opened, or has been closed.
    InvalidHandle,
    /// Malformed request payload.
    InvalidParameter,
    /// Read started at or past end of file.
    EndOfFile,
    /// Caller lacks access.
    AccessDenied,
    /// Destination cannot hold even one result record.
    BufferTooSmall,
    /// Name does not exist.
    ObjectNameNotFound,
    /// Name already exists.
    ObjectNameCollision,
    /// A parent component of the path does not exist.
    ObjectPathNotFound,
    /// Conflicting access to the same file or range.
    SharingViolation,
    /// Byte range overlaps an existing lock.
    LockNotGranted,
    /// Unlock of a range that is not locked.
    RangeNotLocked,
    /// Storage exhausted.
    DiskFull,
    /// Directory still has children.
    DirectoryNotEmpty,
    /// Directory operation on a non-directory.
    NotADirectory,
    /// File operation on a directory.
    FileIsADirectory,
    /// Reparse query on an ordinary file.
    NotAReparsePoint,
    /// Illegal lifecycle transition.
    InvalidDeviceState,
    /// Request was abandoned because the dispatcher is stopping.
    Cancelled,
    /// Unexpected internal fault (e.g. provider panic).
    InternalError,
    /// Any other NTSTATUS value reported by a provider or mount manager.
    Other(u32),
}

impl Status {
    /// Returns the NTSTATUS value for this status.
    pub fn code(self) -> u32 {
        match self {
            Self::Success => 0x0000_0000,
            Self::Timeout => 0x0000_0102,
            Self::NoMoreEntries => 0x8000_0006,
            Self::Unsuccessful => 0xC000_0001,
            Self::NotImplemented => 0xC000_0002,
            Self::InvalidHandle => 0xC000_0008,
            Self::InvalidParameter => 0xC000_000D,
            Self::EndOfFile => 0xC000_0011,
            Self::AccessDenied => 0xC000_0022,
            Self::BufferTooSmall => 0xC000_0023,
            Self::ObjectNameNotFound => 0xC000_0034,
            Self::ObjectNameCollision => 0xC000_0035,
            Self::ObjectPathNotFound => 0xC000_003A,
            Self::SharingViolation => 0xC000_0043,
            Self::LockNotGranted => 0xC000_0055,
            Self::RangeNotLocked => 0xC000_007E,
            Self::DiskFull => 0xC000_007F,
            Self::DirectoryNotEmpty => 0xC000_0101,
            Self::NotADirectory => 0xC000_0103,
            Self::FileIsADirectory => 0xC000_00BA,
            Self::NotAReparsePoint => 0xC000_0275,
            Self::InvalidDeviceState => 0xC000_0184,
            Self::Cancelled => 0xC000_0120,
            Self::InternalError => 0xC000_00E5,
            Self::Other(code) => code,
        }
    }

    /// Maps an NTSTATUS value back to a [`Status`].
    ///
    /// Unknown values are preserved as [`Status::Other`].
    pub fn from_code(code: u32) -> Self {
        const KNOWN: [Status; 24] = [
            Status::Success,
            Status::Timeout,
            Status::NoMoreEntries,
            Status::Unsuccessful,
            Status::NotImplemented,
            Status::InvalidHandle,
            Status::InvalidParameter,
            Status::EndOfFile,
            Status::AccessDenied,
            Status::BufferTooSmall,
            Status::ObjectNameNotFound,
            Status::ObjectNameCollision,
            Status::ObjectPathNotFound,
            Status::SharingViolation,
            Status::LockNotGranted,
            Status::RangeNotLocked,
            Status::DiskFull,
            Status::DirectoryNotEmpty,
            Status::NotADirectory,
            Status::FileIsADirectory,
            Status::NotAReparsePoint,
            Status::InvalidDeviceState,
            Status::Cancelled,
            Status::InternalError,
        ];
        KNOWN
            .into_iter()
            .find(|s| s.code() == code)
            .unwrap_or(Self::Other(code))
    }

    /// True when the request completed.
    ///
    /// `NoMoreEntries` is a warning-class code and is treated as a terminal
    /// success variant. `Timeout` is success-class in NTSTATUS terms but means
    /// the request was not performed, so it is not a success here.
    pub fn is_success(self) -> bool {
        match self {
            Self::Success | Self::NoMoreEntries => true,
            // Success and informational severities both leave the sign bit clear.
            Self::Other(code) => code & 0x8000_0000 == 0,
            _ => false,
        }
    }

    /// True when the request was not performed.
    pub fn is_error(self) -> bool {
        !self.is_success()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "STATUS(0x{code:08X})"),
            other => write!(f, "{other:?}(0x{:08X})", other.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_for_known_values() {
        for status in [
            Status::Success,
            Status::NoMoreEntries,
            Status::SharingViolation,
            Status::InvalidDeviceState,
            Status::NotAReparsePoint,
        ] {
            assert_eq!(Status::from_code(status.code()), status);
        }
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let status = Status::from_code(0xC000_0999);
        assert_eq!(status, Status::Other(0xC000_0999));
        assert_eq!(status.code(), 0xC000_0999);
    }

    #[test]
    fn test_severity() {
        assert!(Status::Success.is_success());
        assert!(Status::Timeout.is_error());
        assert!(Status::Other(0x0000_0103).is_success());
        assert!(Status::NoMoreEntries.is_success());
        assert!(!Status::NoMoreEntries.is_error());
        assert!(Status::InvalidParameter.is_error());
        assert!(!Status::InvalidParameter.is_success());
    }

    #[test]
    fn test_informational_codes_are_success() {
        assert!(Status::Other(0x4000_0000).is_success());
        assert!(Status::Other(0x4000_0016).is_success());
        assert!(!Status::Other(0x8000_0005).is_success());
        assert!(Status::Other(0xC000_0001).is_error());
    }

    #[test]
    fn test_display_includes_hex_code() {
        assert_eq!(
            Status::SharingViolation.to_string(),
            "SharingViolation(0xC0000043)"
        );
        assert_eq!(Status::Other(0xC0000999).to_string(), "STATUS(0xC0000999)");
    }
}
