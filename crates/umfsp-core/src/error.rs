//! Error handling and status mapping for the dispatch core.
//!
//! Internal failures are carried as [`ProxyError`] and converted to a driver
//! [`Status`] exactly once, when the reply is built. Provider failures travel
//! as [`ProxyError::Provider`] so the provider's own status reaches the driver
//! unchanged.

use crate::status::Status;
use std::io;
use thiserror::Error;

/// Errors produced while dispatching a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// Status reported by the provider, forwarded verbatim.
    #[error("provider failed: {0}")]
    Provider(Status),

    /// The provider does not implement this capability.
    #[error("operation not implemented by provider")]
    NotImplemented,

    /// Unknown or closed handle, or a directory buffer that was never filled.
    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    /// Malformed payload (bad EA chain, truncated record, bad offsets).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Adaptive lock was contended past its timeout.
    #[error("lock on {file} at offset {offset} timed out")]
    LockTimeout {
        /// File identity the lock was requested for.
        file: u64,
        /// Offset the lock was requested for.
        offset: u64,
    },

    /// Directory enumeration has nothing left to return.
    #[error("no more directory entries")]
    NoMoreEntries,

    /// Destination buffer cannot hold a single record.
    #[error("buffer of {available} bytes is too small, need {required}")]
    BufferTooSmall {
        /// Bytes offered by the caller.
        available: usize,
        /// Bytes needed for the next record.
        required: usize,
    },

    /// The dispatcher is stopping and no longer accepts requests.
    #[error("dispatcher is shutting down")]
    Shutdown,

    /// Unexpected internal fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Converts this error to the status code returned to the driver.
    pub fn to_status(&self) -> Status {
        match self {
            ProxyError::Provider(status) => *status,
            ProxyError::NotImplemented => Status::NotImplemented,
            ProxyError::InvalidHandle(_) => Status::InvalidHandle,
            ProxyError::InvalidParameter(_) => Status::InvalidParameter,
            ProxyError::LockTimeout { .. } => Status::Timeout,
            ProxyError::NoMoreEntries => Status::NoMoreEntries,
            ProxyError::BufferTooSmall { .. } => Status::BufferTooSmall,
            ProxyError::Shutdown => Status::Cancelled,
            ProxyError::Internal(_) => Status::InternalError,
        }
    }

    /// Shorthand for a malformed-payload error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        ProxyError::InvalidParameter(msg.into())
    }
}

impl From<Status> for ProxyError {
    fn from(status: Status) -> Self {
        ProxyError::Provider(status)
    }
}

impl From<io::Error> for ProxyError {
    fn from(e: io::Error) -> Self {
        ProxyError::Provider(io_error_to_status(&e))
    }
}

/// Maps an I/O error (typically from a provider backed by a real filesystem)
/// to a driver status.
pub fn io_error_to_status(e: &io::Error) -> Status {
    match e.kind() {
        io::ErrorKind::NotFound => Status::ObjectNameNotFound,
        io::ErrorKind::PermissionDenied => Status::AccessDenied,
        io::ErrorKind::AlreadyExists => Status::ObjectNameCollision,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Status::InvalidParameter,
        io::ErrorKind::Unsupported => Status::NotImplemented,
        io::ErrorKind::TimedOut => Status::Timeout,
        io::ErrorKind::UnexpectedEof => Status::EndOfFile,
        io::ErrorKind::DirectoryNotEmpty => Status::DirectoryNotEmpty,
        io::ErrorKind::NotADirectory => Status::NotADirectory,
        io::ErrorKind::IsADirectory => Status::FileIsADirectory,
        io::ErrorKind::StorageFull => Status::DiskFull,
        _ => Status::Unsuccessful,
    }
}

/// Result type for dispatch and provider operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
