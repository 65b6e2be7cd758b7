//! Request and reply types exchanged with the driver channel.
//!
//! A [`Request`] names its operation, the handle it targets and a context
//! token; the matching [`Response`] echoes the token so the driver can
//! correlate it. Both are serde types so hosts can record and replay traffic.

use crate::ea::ExtendedAttribute;
use crate::provider::{BasicInfo, CreateOptions, FileInfo, OpenOptions, VolumeInfo, WriteMode};
use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Context token correlating a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(pub u64);

impl RequestToken {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Monotonic token source, starting at 1.
#[derive(Debug)]
pub struct RequestTokenGenerator {
    next: AtomicU64,
}

impl Default for RequestTokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTokenGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next token.
    pub fn next(&self) -> RequestToken {
        RequestToken(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// One driver-originated operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation token echoed in the reply.
    #[serde(default)]
    pub token: RequestToken,
    /// Target handle; unused (0) for create, open and volume queries.
    #[serde(default)]
    pub handle: u64,
    /// Operation and its payload.
    #[serde(flatten)]
    pub op: Operation,
}

impl Request {
    pub fn new(token: RequestToken, handle: u64, op: Operation) -> Self {
        Self { token, handle, op }
    }
}

/// Operation kinds and their request payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    GetVolumeInfo,
    Create {
        path: String,
        #[serde(default)]
        options: CreateOptions,
    },
    Open {
        path: String,
        #[serde(default)]
        options: OpenOptions,
    },
    Cleanup {
        #[serde(default)]
        delete: bool,
    },
    Close,
    Read {
        offset: u64,
        length: u32,
    },
    Write {
        mode: WriteMode,
        data: Vec<u8>,
    },
    Flush,
    GetFileInfo,
    SetBasicInfo {
        info: BasicInfo,
    },
    SetFileSize {
        size: u64,
        #[serde(default)]
        allocation_only: bool,
    },
    CanDelete,
    Rename {
        new_path: String,
        #[serde(default)]
        replace_if_exists: bool,
    },
    QueryDirectory {
        #[serde(default)]
        pattern: Option<String>,
        /// Resume after this name.
        #[serde(default)]
        marker: Option<String>,
        /// Rewind: discard the buffer and enumerate afresh.
        #[serde(default)]
        restart: bool,
        /// Destination size in bytes.
        max_bytes: usize,
    },
    GetSecurity,
    SetSecurity {
        security_information: u32,
        descriptor: Vec<u8>,
    },
    GetEa,
    /// Raw extended-attribute list as sent by the driver.
    SetEa {
        ea: Vec<u8>,
    },
    Lock {
        offset: u64,
        length: u64,
        #[serde(default = "default_true")]
        exclusive: bool,
        /// Fail at once if the range's lock domain is busy.
        #[serde(default)]
        fail_immediately: bool,
        #[serde(default)]
        owner: u64,
    },
    Unlock {
        offset: u64,
        length: u64,
        #[serde(default)]
        owner: u64,
    },
    GetReparsePoint,
    SetReparsePoint {
        data: Vec<u8>,
    },
    DeleteReparsePoint {
        data: Vec<u8>,
    },
}

fn default_true() -> bool {
    true
}

impl Operation {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetVolumeInfo => "get_volume_info",
            Operation::Create { .. } => "create",
            Operation::Open { .. } => "open",
            Operation::Cleanup { .. } => "cleanup",
            Operation::Close => "close",
            Operation::Read { .. } => "read",
            Operation::Write { .. } => "write",
            Operation::Flush => "flush",
            Operation::GetFileInfo => "get_file_info",
            Operation::SetBasicInfo { .. } => "set_basic_info",
            Operation::SetFileSize { .. } => "set_file_size",
            Operation::CanDelete => "can_delete",
            Operation::Rename { .. } => "rename",
            Operation::QueryDirectory { .. } => "query_directory",
            Operation::GetSecurity => "get_security",
            Operation::SetSecurity { .. } => "set_security",
            Operation::GetEa => "get_ea",
            Operation::SetEa { .. } => "set_ea",
            Operation::Lock { .. } => "lock",
            Operation::Unlock { .. } => "unlock",
            Operation::GetReparsePoint => "get_reparse_point",
            Operation::SetReparsePoint { .. } => "set_reparse_point",
            Operation::DeleteReparsePoint { .. } => "delete_reparse_point",
        }
    }

    /// Whether the operation targets an existing handle.
    pub fn needs_handle(&self) -> bool {
        !matches!(
            self,
            Operation::GetVolumeInfo | Operation::Create { .. } | Operation::Open { .. }
        )
    }
}

/// Operation-specific reply payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponsePayload {
    None,
    Volume {
        info: VolumeInfo,
    },
    Opened {
        handle: u64,
        info: FileInfo,
    },
    Info {
        info: FileInfo,
    },
    Data {
        data: Vec<u8>,
    },
    Written {
        bytes_written: u32,
        info: FileInfo,
    },
    /// Serialized directory entries copied out of the handle's buffer.
    Directory {
        entries: usize,
        data: Vec<u8>,
    },
    Security {
        descriptor: Vec<u8>,
    },
    Ea {
        attributes: Vec<ExtendedAttribute>,
    },
    Reparse {
        data: Vec<u8>,
    },
}

/// Reply to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub token: RequestToken,
    pub status: Status,
    pub payload: ResponsePayload,
}

impl Response {
    /// Successful reply.
    pub fn ok(token: RequestToken, payload: ResponsePayload) -> Self {
        Self {
            token,
            status: Status::Success,
            payload,
        }
    }

    /// Reply with `status` and no payload.
    pub fn error(token: RequestToken, status: Status) -> Self {
        Self {
            token,
            status,
            payload: ResponsePayload::None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
