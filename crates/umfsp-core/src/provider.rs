//! Provider capability set.
//!
//! A provider is the application-supplied component that implements the
//! actual filesystem (storage, naming, attributes). [`DispatchCore`] calls
//! into it through [`FileSystemProvider`].
//!
//! Every capability has a default body returning
//! [`ProxyError::NotImplemented`], so a provider only overrides what it
//! supports and the driver sees `NotImplemented` for the rest.
//!
//! [`DispatchCore`]: crate::DispatchCore

use crate::dir_buffer::DirEntry;
use crate::ea::EaRecord;
use crate::error::{ProxyError, ProxyResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File attribute bits as understood by the driver.
pub mod attributes {
    /// Read-only file.
    pub const READONLY: u32 = 0x0000_0001;
    /// Hidden file.
    pub const HIDDEN: u32 = 0x0000_0002;
    /// System file.
    pub const SYSTEM: u32 = 0x0000_0004;
    /// Directory.
    pub const DIRECTORY: u32 = 0x0000_0010;
    /// Archive bit.
    pub const ARCHIVE: u32 = 0x0000_0020;
    /// No other attributes set.
    pub const NORMAL: u32 = 0x0000_0080;
    /// File carries reparse data.
    pub const REPARSE_POINT: u32 = 0x0000_0400;
}

/// Metadata returned by most provider calls.
///
/// Times are FILETIME values: 100ns intervals since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Attribute bits, see [`attributes`].
    pub attributes: u32,
    /// Logical size in bytes.
    pub file_size: u64,
    /// Allocated size in bytes.
    pub allocation_size: u64,
    /// Creation time.
    pub creation_time: u64,
    /// Last access time.
    pub last_access_time: u64,
    /// Last data write time.
    pub last_write_time: u64,
    /// Last metadata change time.
    pub change_time: u64,
    /// Provider-unique file index.
    pub index_number: u64,
}

impl FileInfo {
    /// True when the directory attribute is set.
    pub fn is_directory(&self) -> bool {
        self.attributes & attributes::DIRECTORY != 0
    }
}

/// Volume-level information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Total capacity in bytes.
    pub total_size: u64,
    /// Free capacity in bytes.
    pub free_size: u64,
    /// Volume label.
    pub label: String,
}

/// Arguments for creating a new file or directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateOptions {
    /// Create a directory instead of a file.
    pub directory: bool,
    /// Initial attribute bits.
    pub attributes: u32,
    /// Requested allocation size.
    pub allocation_size: u64,
    /// Initial security descriptor, if any.
    pub security_descriptor: Option<Vec<u8>>,
}

/// Arguments for opening an existing file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Driver create-options bits.
    pub create_options: u32,
    /// Access mask granted by the driver.
    pub granted_access: u32,
}

/// Basic-information update. `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicInfo {
    /// New attribute bits.
    pub attributes: Option<u32>,
    /// New creation time.
    pub creation_time: Option<u64>,
    /// New last access time.
    pub last_access_time: Option<u64>,
    /// New last write time.
    pub last_write_time: Option<u64>,
    /// New change time.
    pub change_time: Option<u64>,
}

/// A byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte of the range.
    pub offset: u64,
    /// Number of bytes.
    pub length: u64,
}

impl ByteRange {
    /// Create a new range.
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end of the range, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// True when the two ranges share at least one byte.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.length > 0 && other.length > 0 && self.offset < other.end() && other.offset < self.end()
    }
}

/// Where a write lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Write at an absolute offset, extending the file as needed.
    At(u64),
    /// Append at the current end of file.
    Append,
    /// Write at an offset but never past the current end of file.
    Constrained(u64),
}

/// Outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Bytes actually written.
    pub bytes_written: u32,
    /// File metadata after the write.
    pub info: FileInfo,
}

/// The set of filesystem operations a provider may implement.
///
/// Each open handle owns one `FileContext`, created by [`create`] or
/// [`open`] and handed back by value to [`close`]. Calls for one handle may
/// arrive on any worker thread, but directory enumeration on a handle is
/// never issued concurrently.
///
/// [`create`]: FileSystemProvider::create
/// [`open`]: FileSystemProvider::open
/// [`close`]: FileSystemProvider::close
#[allow(unused_variables)]
pub trait FileSystemProvider: Send + Sync + 'static {
    /// Per-handle provider state.
    type FileContext: Send + Sync + 'static;

    /// Volume size and label.
    fn get_volume_info(&self) -> ProxyResult<VolumeInfo> {
        Err(ProxyError::NotImplemented)
    }

    /// Create a new file or directory at `path`.
    fn create(
        &self,
        path: &str,
        options: &CreateOptions,
    ) -> ProxyResult<(Self::FileContext, FileInfo)> {
        Err(ProxyError::NotImplemented)
    }

    /// Open an existing file or directory at `path`.
    fn open(
        &self,
        path: &str,
        options: &OpenOptions,
    ) -> ProxyResult<(Self::FileContext, FileInfo)> {
        Err(ProxyError::NotImplemented)
    }

    /// Last user handle closed. Deletes the file when `delete` is set.
    fn cleanup(&self, file: &Self::FileContext, path: &str, delete: bool) {}

    /// Handle closed; the context is dropped afterwards.
    fn close(&self, file: Self::FileContext) {}

    /// Read up to `length` bytes at `offset`.
    fn read(&self, file: &Self::FileContext, offset: u64, length: u32) -> ProxyResult<Bytes> {
        Err(ProxyError::NotImplemented)
    }

    /// Write `data` as directed by `mode`.
    fn write(
        &self,
        file: &Self::FileContext,
        mode: WriteMode,
        data: &[u8],
    ) -> ProxyResult<WriteResult> {
        Err(ProxyError::NotImplemented)
    }

    /// Flush buffered data for the file.
    fn flush(&self, file: &Self::FileContext) -> ProxyResult<FileInfo> {
        Err(ProxyError::NotImplemented)
    }

    /// Current file metadata.
    fn get_file_info(&self, file: &Self::FileContext) -> ProxyResult<FileInfo> {
        Err(ProxyError::NotImplemented)
    }

    /// Update attributes and timestamps.
    fn set_basic_info(&self, file: &Self::FileContext, info: &BasicInfo) -> ProxyResult<FileInfo> {
        Err(ProxyError::NotImplemented)
    }

    /// Truncate or extend the file (or only its allocation).
    fn set_file_size(
        &self,
        file: &Self::FileContext,
        new_size: u64,
        allocation_only: bool,
    ) -> ProxyResult<FileInfo> {
        Err(ProxyError::NotImplemented)
    }

    /// Check whether the file may be deleted on cleanup.
    fn can_delete(&self, file: &Self::FileContext, path: &str) -> ProxyResult<()> {
        Err(ProxyError::NotImplemented)
    }

    /// Rename `path` to `new_path`.
    fn rename(
        &self,
        file: &Self::FileContext,
        path: &str,
        new_path: &str,
        replace_if_exists: bool,
    ) -> ProxyResult<()> {
        Err(ProxyError::NotImplemented)
    }

    /// Single enumeration step.
    ///
    /// Returns the entry at `position` (zero-based, among entries matching
    /// `pattern`) or `None` once the directory is exhausted. Entries should be
    /// yielded in ascending name order; the directory buffer keeps them in
    /// the order they are produced.
    fn read_directory(
        &self,
        file: &Self::FileContext,
        pattern: Option<&str>,
        position: u64,
    ) -> ProxyResult<Option<DirEntry>> {
        Err(ProxyError::NotImplemented)
    }

    /// Self-relative security descriptor.
    fn get_security(&self, file: &Self::FileContext) -> ProxyResult<Bytes> {
        Err(ProxyError::NotImplemented)
    }

    /// Apply the parts of `descriptor` selected by `security_information`.
    fn set_security(
        &self,
        file: &Self::FileContext,
        security_information: u32,
        descriptor: &[u8],
    ) -> ProxyResult<()> {
        Err(ProxyError::NotImplemented)
    }

    /// Extended attributes as a raw next-offset linked list.
    fn get_ea(&self, file: &Self::FileContext) -> ProxyResult<Bytes> {
        Err(ProxyError::NotImplemented)
    }

    /// Set (or, with an empty value, remove) extended attributes.
    fn set_ea(&self, file: &Self::FileContext, records: &[EaRecord<'_>]) -> ProxyResult<FileInfo> {
        Err(ProxyError::NotImplemented)
    }

    /// Lock a byte range on behalf of `owner`.
    fn lock(
        &self,
        file: &Self::FileContext,
        range: ByteRange,
        exclusive: bool,
        owner: u64,
    ) -> ProxyResult<()> {
        Err(ProxyError::NotImplemented)
    }

    /// Unlock a byte range previously locked by `owner`.
    fn unlock(&self, file: &Self::FileContext, range: ByteRange, owner: u64) -> ProxyResult<()> {
        Err(ProxyError::NotImplemented)
    }

    /// Reparse data attached to the file.
    fn get_reparse_point(&self, file: &Self::FileContext, path: &str) -> ProxyResult<Bytes> {
        Err(ProxyError::NotImplemented)
    }

    /// Attach reparse data to the file.
    fn set_reparse_point(
        &self,
        file: &Self::FileContext,
        path: &str,
        data: &[u8],
    ) -> ProxyResult<()> {
        Err(ProxyError::NotImplemented)
    }

    /// Remove reparse data from the file.
    fn delete_reparse_point(
        &self,
        file: &Self::FileContext,
        path: &str,
        data: &[u8],
    ) -> ProxyResult<()> {
        Err(ProxyError::NotImplemented)
    }
}

/// Seconds between the FILETIME epoch (1601) and the Unix epoch.
const FILETIME_UNIX_DIFF_SECS: u64 = 11_644_473_600;
const INTERVALS_PER_SEC: u64 = 10_000_000;

/// Convert a `SystemTime` to a FILETIME value.
pub fn system_time_to_filetime(time: SystemTime) -> u64 {
    let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    since_unix.as_secs() * INTERVALS_PER_SEC
        + u64::from(since_unix.subsec_nanos()) / 100
        + FILETIME_UNIX_DIFF_SECS * INTERVALS_PER_SEC
}

/// Convert a FILETIME value to a `SystemTime`. Pre-1970 values clamp to the
/// Unix epoch.
pub fn filetime_to_system_time(filetime: u64) -> SystemTime {
    let Some(unix_intervals) = filetime.checked_sub(FILETIME_UNIX_DIFF_SECS * INTERVALS_PER_SEC)
    else {
        return UNIX_EPOCH;
    };
    let secs = unix_intervals / INTERVALS_PER_SEC;
    #[allow(clippy::cast_possible_truncation)]
    let nanos = ((unix_intervals % INTERVALS_PER_SEC) * 100) as u32;
    UNIX_EPOCH + Duration::new(secs, nanos)
}

/// Current time as FILETIME.
pub fn filetime_now() -> u64 {
    system_time_to_filetime(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    impl FileSystemProvider for Nothing {
        type FileContext = ();
    }

    #[test]
    fn test_default_capabilities_are_not_implemented() {
        let p = Nothing;
        assert_eq!(p.get_volume_info(), Err(ProxyError::NotImplemented));
        assert_eq!(p.read(&(), 0, 10), Err(ProxyError::NotImplemented));
        assert_eq!(p.get_ea(&()), Err(ProxyError::NotImplemented));
        assert_eq!(
            p.lock(&(), ByteRange::new(0, 1), true, 1),
            Err(ProxyError::NotImplemented)
        );
        assert_eq!(
            p.read_directory(&(), None, 0),
            Err(ProxyError::NotImplemented)
        );
    }

    #[test]
    fn test_byte_range_overlap() {
        let a = ByteRange::new(0, 10);
        assert!(a.overlaps(&ByteRange::new(9, 1)));
        assert!(!a.overlaps(&ByteRange::new(10, 5)));
        assert!(!a.overlaps(&ByteRange::new(3, 0)));
        assert!(ByteRange::new(u64::MAX - 1, 10).overlaps(&ByteRange::new(u64::MAX - 1, 1)));
    }

    #[test]
    fn test_filetime_unix_epoch() {
        assert_eq!(system_time_to_filetime(UNIX_EPOCH), 116_444_736_000_000_000);
        assert_eq!(filetime_to_system_time(0), UNIX_EPOCH);
    }

    #[test]
    fn test_filetime_round_trip_preserves_100ns_precision() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_700);
        assert_eq!(filetime_to_system_time(system_time_to_filetime(t)), t);
    }

    #[test]
    fn test_directory_attribute() {
        let info = FileInfo {
            attributes: attributes::DIRECTORY,
            ..FileInfo::default()
        };
        assert!(info.is_directory());
        assert!(!FileInfo::default().is_directory());
    }
}
