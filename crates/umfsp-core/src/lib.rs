//! User-mode filesystem proxy core.
//!
//! Requests originating from a kernel filesystem driver are dispatched to an
//! application-supplied [`FileSystemProvider`]. Alongside plain forwarding the
//! crate keeps the state that makes dispatch correct and cheap:
//!
//! - per-handle [`DirBuffer`]s serving directory listings incrementally
//! - [`AdaptiveLock`]s serializing conflicting operations per `(file, offset)`
//! - validation of extended-attribute lists in both directions
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use umfsp_core::testing::MemFs;
//! use umfsp_core::{DispatchConfig, DispatchCore, Dispatcher, Operation, Request, RequestToken};
//!
//! let core = Arc::new(DispatchCore::new(MemFs::new(), DispatchConfig::default().workers(2)));
//! let dispatcher = Dispatcher::start(core).unwrap();
//! dispatcher
//!     .submit(Request::new(RequestToken(1), 0, Operation::GetVolumeInfo))
//!     .unwrap();
//! let reply = dispatcher.replies().recv().unwrap();
//! assert!(reply.is_success());
//! dispatcher.stop();
//! ```

pub mod adaptive_lock;
pub mod config;
pub mod dir_buffer;
pub mod dispatch;
pub mod dispatcher;
pub mod ea;
pub mod error;
pub mod handles;
pub mod provider;
pub mod request;
pub mod status;
pub mod testing;
pub mod wksid;

pub use adaptive_lock::{
    AdaptiveLock, AdaptiveLockGuard, DomainKind, LockDomain, LockStatsSnapshot, LockTable, METADATA_LOCK_OFFSET,
};
pub use config::DispatchConfig;
pub use dir_buffer::{DirBuffer, DirBufferView, DirEntry, decode_entries};
pub use dispatch::{DispatchCore, DispatchStats, DispatchStatsSnapshot};
pub use dispatcher::{Dispatcher, DispatcherStats, DispatcherStatsSnapshot};
pub use ea::{EaIter, EaListBuilder, EaRecord, ExtendedAttribute, encode_ea, walk_ea};
pub use error::{ProxyError, ProxyResult};
pub use handles::{HandleRef, HandleTable, OpenFile};
pub use provider::{
    BasicInfo, ByteRange, CreateOptions, FileInfo, FileSystemProvider, OpenOptions, VolumeInfo,
    WriteMode, WriteResult,
};
pub use request::{Operation, Request, RequestToken, RequestTokenGenerator, Response, ResponsePayload};
pub use status::Status;
