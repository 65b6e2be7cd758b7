//! Request dispatch engine.
//!
//! [`DispatchCore`] turns each [`Request`] into a call on the provider and
//! builds exactly one [`Response`]. Besides forwarding, it owns the state
//! that makes forwarding correct:
//!
//! - the handle table (provider contexts and directory buffers)
//! - the adaptive lock table serializing byte-range locks and metadata
//!   updates per `(file, offset)`
//! - extended-attribute validation in both directions
//!
//! Provider failures are forwarded unchanged and never retried. The only
//! internal wait is the bounded adaptive lock acquisition.

use crate::adaptive_lock::{AdaptiveLockGuard, LockStatsSnapshot, LockTable};
use crate::config::DispatchConfig;
use crate::dir_buffer::{DirBuffer, DirBufferView};
use crate::ea::{EaRecord, walk_ea};
use crate::error::{ProxyError, ProxyResult};
use crate::handles::{HandleRef, HandleTable, OpenFile};
use crate::provider::{ByteRange, FileInfo, FileSystemProvider};
use crate::request::{Operation, Request, Response, ResponsePayload};
use crate::status::Status;
use serde::Serialize;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Requests dispatched.
    pub requests: AtomicU64,
    /// Requests answered with an error status.
    pub failures: AtomicU64,
    /// Requests that gave up on a contended lock domain.
    pub lock_timeouts: AtomicU64,
    /// Directory buffer fills (provider enumerations).
    pub dir_fills: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`] plus lock counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub lock_timeouts: u64,
    pub dir_fills: u64,
    pub open_handles: usize,
    pub locks: LockStatsSnapshot,
}

type Handle<P> = OpenFile<<P as FileSystemProvider>::FileContext>;

/// Dispatches driver requests to a [`FileSystemProvider`].
///
/// `DispatchCore` is `Sync`; any number of worker threads may call
/// [`dispatch`](Self::dispatch) concurrently.
pub struct DispatchCore<P: FileSystemProvider> {
    provider: Arc<P>,
    handles: HandleTable<Handle<P>>,
    locks: LockTable,
    config: DispatchConfig,
    stats: DispatchStats,
}

impl<P: FileSystemProvider> std::fmt::Debug for DispatchCore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCore")
            .field("open_handles", &self.handles.len())
            .field("lock_domains", &self.locks.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: FileSystemProvider> DispatchCore<P> {
    /// Create a dispatch core owning `provider`.
    pub fn new(provider: P, config: DispatchConfig) -> Self {
        Self::with_shared_provider(Arc::new(provider), config)
    }

    /// Create a dispatch core over a shared provider.
    pub fn with_shared_provider(provider: Arc<P>, config: DispatchConfig) -> Self {
        Self {
            provider,
            handles: HandleTable::new(),
            locks: LockTable::new(),
            config,
            stats: DispatchStats::default(),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Number of open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Number of lock domains currently tracked.
    pub fn lock_domains(&self) -> usize {
        self.locks.len()
    }

    /// Raw counters.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Copy of all counters.
    pub fn stats_snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            requests: self.stats.requests.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            lock_timeouts: self.stats.lock_timeouts.load(Ordering::Relaxed),
            dir_fills: self.stats.dir_fills.load(Ordering::Relaxed),
            open_handles: self.handles.len(),
            locks: self.locks.stats().snapshot(),
        }
    }

    /// Run one request to completion and build its reply.
    pub fn dispatch(&self, request: Request) -> Response {
        let Request { token, handle, op } = request;
        let name = op.name();
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        trace!(%token, op = name, handle, "dispatch");

        match self.execute(handle, op) {
            Ok(payload) => Response::ok(token, payload),
            Err(e) => {
                let status = e.to_status();
                if status.is_error() {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    debug!(%token, op = name, handle, %status, error = %e, "request failed");
                }
                Response::error(token, status)
            }
        }
    }

    /// Read-only access to a handle's directory buffer.
    ///
    /// The view lives only for the duration of `f`, during which the handle's
    /// directory reads are held off. Nothing is mutated. Fails with
    /// [`ProxyError::InvalidHandle`] if the handle is unknown or has not been
    /// enumerated yet.
    pub fn peek_directory<R>(
        &self,
        handle: u64,
        f: impl FnOnce(DirBufferView<'_>) -> R,
    ) -> ProxyResult<R> {
        let file = self.open_file(handle)?;
        let slot = file.dir_buffer();
        let buffer = slot.as_ref().ok_or(ProxyError::InvalidHandle(handle))?;
        Ok(f(buffer.peek()?))
    }

    /// Close every open handle, e.g. when the volume stops.
    pub fn close_all(&self) -> usize {
        let files = self.handles.drain();
        let count = files.len();
        for file in files {
            self.locks.forget_file(file.file_id());
            self.provider.close(file.into_context());
        }
        if count > 0 {
            debug!(count, "closed remaining handles");
        }
        count
    }

    fn open_file(&self, handle: u64) -> ProxyResult<HandleRef<'_, Handle<P>>> {
        self.handles
            .get(handle)
            .ok_or(ProxyError::InvalidHandle(handle))
    }

    /// Operations that do not target an existing handle.
    fn execute_unbound(&self, op: Operation) -> ProxyResult<ResponsePayload> {
        let provider = &*self.provider;
        match op {
            Operation::GetVolumeInfo => {
                let info = provider.get_volume_info()?;
                Ok(ResponsePayload::Volume { info })
            }
            Operation::Create { path, options } => {
                let (ctx, info) = provider.create(&path, &options)?;
                let is_directory = options.directory || info.is_directory();
                Ok(self.register(ctx, path, is_directory, info))
            }
            Operation::Open { path, options } => {
                let (ctx, info) = provider.open(&path, &options)?;
                Ok(self.register(ctx, path, info.is_directory(), info))
            }
            _ => Err(ProxyError::Internal("handle operation reached unbound dispatch".into())),
        }
    }

    fn execute(&self, handle: u64, op: Operation) -> ProxyResult<ResponsePayload> {
        if !op.needs_handle() {
            return self.execute_unbound(op);
        }
        let provider = &*self.provider;

        if let Operation::Close = op {
            let file = self
                .handles
                .remove(handle)
                .ok_or(ProxyError::InvalidHandle(handle))?;
            self.locks.forget_file(file.file_id());
            provider.close(file.into_context());
            trace!(handle, open = self.handles.len(), "handle closed");
            return Ok(ResponsePayload::None);
        }

        let file = self.open_file(handle)?;
        let ctx = file.ctx();

        let payload = match op {
            Operation::Cleanup { delete } => {
                provider.cleanup(ctx, &file.path(), delete);
                ResponsePayload::None
            }
            Operation::Read { offset, length } => {
                let data = provider.read(ctx, offset, length)?;
                ResponsePayload::Data { data: data.to_vec() }
            }
            Operation::Write { mode, data } => {
                let result = provider.write(ctx, mode, &data)?;
                ResponsePayload::Written {
                    bytes_written: result.bytes_written,
                    info: result.info,
                }
            }
            Operation::Flush => ResponsePayload::Info {
                info: provider.flush(ctx)?,
            },
            Operation::GetFileInfo => ResponsePayload::Info {
                info: provider.get_file_info(ctx)?,
            },
            Operation::SetBasicInfo { info } => {
                let _guard = self.lock_metadata(&file)?;
                ResponsePayload::Info {
                    info: provider.set_basic_info(ctx, &info)?,
                }
            }
            Operation::SetFileSize {
                size,
                allocation_only,
            } => {
                let _guard = self.lock_metadata(&file)?;
                ResponsePayload::Info {
                    info: provider.set_file_size(ctx, size, allocation_only)?,
                }
            }
            Operation::CanDelete => {
                provider.can_delete(ctx, &file.path())?;
                ResponsePayload::None
            }
            Operation::Rename {
                new_path,
                replace_if_exists,
            } => {
                provider.rename(ctx, &file.path(), &new_path, replace_if_exists)?;
                file.set_path(new_path);
                ResponsePayload::None
            }
            Operation::QueryDirectory {
                pattern,
                marker,
                restart,
                max_bytes,
            } => self.query_directory(
                handle,
                &file,
                pattern.as_deref(),
                marker.as_deref(),
                restart,
                max_bytes,
            )?,
            Operation::GetSecurity => ResponsePayload::Security {
                descriptor: provider.get_security(ctx)?.to_vec(),
            },
            Operation::SetSecurity {
                security_information,
                descriptor,
            } => {
                provider.set_security(ctx, security_information, &descriptor)?;
                ResponsePayload::None
            }
            Operation::GetEa => {
                let raw = provider.get_ea(ctx)?;
                let attributes = walk_ea(&raw)?
                    .iter()
                    .map(EaRecord::to_owned_attribute)
                    .collect();
                ResponsePayload::Ea { attributes }
            }
            Operation::SetEa { ea } => {
                let records = walk_ea(&ea)?;
                ResponsePayload::Info {
                    info: provider.set_ea(ctx, &records)?,
                }
            }
            Operation::Lock {
                offset,
                length,
                exclusive,
                fail_immediately,
                owner,
            } => {
                let timeout = if fail_immediately {
                    Duration::ZERO
                } else {
                    self.config.lock_timeout
                };
                let _guard = self.lock_range(&file, offset, timeout)?;
                provider.lock(ctx, ByteRange::new(offset, length), exclusive, owner)?;
                ResponsePayload::None
            }
            Operation::Unlock {
                offset,
                length,
                owner,
            } => {
                let _guard = self.lock_range(&file, offset, self.config.lock_timeout)?;
                provider.unlock(ctx, ByteRange::new(offset, length), owner)?;
                ResponsePayload::None
            }
            Operation::GetReparsePoint => ResponsePayload::Reparse {
                data: provider.get_reparse_point(ctx, &file.path())?.to_vec(),
            },
            Operation::SetReparsePoint { data } => {
                provider.set_reparse_point(ctx, &file.path(), &data)?;
                ResponsePayload::None
            }
            Operation::DeleteReparsePoint { data } => {
                provider.delete_reparse_point(ctx, &file.path(), &data)?;
                ResponsePayload::None
            }
            Operation::GetVolumeInfo
            | Operation::Create { .. }
            | Operation::Open { .. }
            | Operation::Close => {
                return Err(ProxyError::Internal("handle-less operation reached handle dispatch".into()));
            }
        };
        Ok(payload)
    }

    fn register(
        &self,
        ctx: P::FileContext,
        path: String,
        is_directory: bool,
        info: FileInfo,
    ) -> ResponsePayload {
        let file_id = file_identity(&path, &info);
        let handle = self
            .handles
            .insert(OpenFile::new(ctx, path, is_directory, file_id));
        trace!(handle, file_id, is_directory, "handle opened");
        ResponsePayload::Opened { handle, info }
    }

    fn query_directory(
        &self,
        handle: u64,
        file: &Handle<P>,
        pattern: Option<&str>,
        marker: Option<&str>,
        restart: bool,
        max_bytes: usize,
    ) -> ProxyResult<ResponsePayload> {
        if !file.is_directory() {
            return Err(Status::NotADirectory.into());
        }

        let mut slot = file.dir_buffer();
        let buffer =
            slot.get_or_insert_with(|| DirBuffer::new(handle, self.config.max_dir_buffer_bytes));
        if restart && buffer.is_filled() {
            buffer.invalidate();
        }
        buffer.retarget(pattern);

        let provider = &*self.provider;
        let ctx = file.ctx();
        if buffer.ensure_filled(|position| provider.read_directory(ctx, pattern, position))? {
            self.stats.dir_fills.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(marker) = marker {
            buffer.seek_after(marker);
        }

        let mut data = Vec::new();
        let entries = buffer.copy_out(&mut data, max_bytes)?;
        trace!(handle, entries, bytes = data.len(), cursor = buffer.cursor(), "directory served");
        Ok(ResponsePayload::Directory { entries, data })
    }

    /// Serialize a byte-range lock or unlock. A busy domain is reported as a
    /// sharing violation.
    fn lock_range(
        &self,
        file: &Handle<P>,
        offset: u64,
        timeout: Duration,
    ) -> ProxyResult<AdaptiveLockGuard> {
        self.locks
            .acquire(file.file_id(), offset, timeout)
            .map_err(|e| {
                self.note_lock_timeout(&e);
                Status::SharingViolation.into()
            })
    }

    /// Serialize a metadata update. A busy domain is reported as a timeout.
    fn lock_metadata(&self, file: &Handle<P>) -> ProxyResult<AdaptiveLockGuard> {
        self.locks
            .acquire_metadata(file.file_id(), self.config.lock_timeout)
            .inspect_err(|e| self.note_lock_timeout(e))
    }

    fn note_lock_timeout(&self, e: &ProxyError) {
        self.stats.lock_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(error = %e, "lock domain busy");
    }
}

impl<P: FileSystemProvider> Drop for DispatchCore<P> {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Lock-domain identity: the provider's index number, or a hash of the
/// case-folded path for providers that do not assign one.
fn file_identity(path: &str, info: &FileInfo) -> u64 {
    if info.index_number != 0 {
        return info.index_number;
    }
    let mut hasher = DefaultHasher::new();
    path.to_lowercase().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir_buffer::{DirEntry, decode_entries};
    use crate::ea::EaListBuilder;
    use crate::provider::{CreateOptions, OpenOptions, VolumeInfo};
    use crate::request::RequestToken;
    use bytes::Bytes;
    use parking_lot::Mutex;

    /// Minimal provider: one directory with fixed entries, one EA blob.
    #[derive(Default)]
    struct Fixture {
        entries: Vec<&'static str>,
        ea: Mutex<Vec<u8>>,
        enumerations: AtomicU64,
        locked: Mutex<Vec<ByteRange>>,
    }

    impl FileSystemProvider for Fixture {
        type FileContext = bool;

        fn get_volume_info(&self) -> ProxyResult<VolumeInfo> {
            Ok(VolumeInfo {
                total_size: 100,
                free_size: 50,
                label: "fixture".into(),
            })
        }

        fn open(&self, path: &str, _options: &OpenOptions) -> ProxyResult<(bool, FileInfo)> {
            let dir = path == "\\";
            let info = FileInfo {
                attributes: if dir { crate::provider::attributes::DIRECTORY } else { 0 },
                index_number: if dir { 1 } else { 2 },
                ..FileInfo::default()
            };
            if dir || path == "\\file" {
                Ok((dir, info))
            } else {
                Err(Status::ObjectNameNotFound.into())
            }
        }

        fn read_directory(
            &self,
            _file: &bool,
            _pattern: Option<&str>,
            position: u64,
        ) -> ProxyResult<Option<DirEntry>> {
            if position == 0 {
                self.enumerations.fetch_add(1, Ordering::Relaxed);
            }
            Ok(self
                .entries
                .get(usize::try_from(position).unwrap())
                .map(|n| DirEntry::new(*n, FileInfo::default())))
        }

        fn get_ea(&self, _file: &bool) -> ProxyResult<Bytes> {
            Ok(Bytes::from(self.ea.lock().clone()))
        }

        fn lock(&self, _file: &bool, range: ByteRange, _exclusive: bool, _owner: u64) -> ProxyResult<()> {
            self.locked.lock().push(range);
            Ok(())
        }

        fn unlock(&self, _file: &bool, range: ByteRange, _owner: u64) -> ProxyResult<()> {
            self.locked.lock().retain(|r| *r != range);
            Ok(())
        }

        fn set_file_size(&self, _file: &bool, new_size: u64, _allocation_only: bool) -> ProxyResult<FileInfo> {
            Ok(FileInfo {
                file_size: new_size,
                ..FileInfo::default()
            })
        }
    }

    fn core(entries: Vec<&'static str>) -> DispatchCore<Fixture> {
        DispatchCore::new(
            Fixture {
                entries,
                ..Fixture::default()
            },
            DispatchConfig::default().lock_timeout(Duration::from_millis(20)),
        )
    }

    fn send(core: &DispatchCore<Fixture>, handle: u64, op: Operation) -> Response {
        core.dispatch(Request::new(RequestToken(1), handle, op))
    }

    fn open(core: &DispatchCore<Fixture>, path: &str) -> u64 {
        let resp = send(
            core,
            0,
            Operation::Open {
                path: path.into(),
                options: OpenOptions::default(),
            },
        );
        match resp.payload {
            ResponsePayload::Opened { handle, .. } => handle,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    fn list(core: &DispatchCore<Fixture>, handle: u64, max_bytes: usize) -> Response {
        send(
            core,
            handle,
            Operation::QueryDirectory {
                pattern: None,
                marker: None,
                restart: false,
                max_bytes,
            },
        )
    }

    #[test]
    fn test_token_is_echoed() {
        let core = core(vec![]);
        let resp = core.dispatch(Request::new(RequestToken(77), 0, Operation::GetVolumeInfo));
        assert_eq!(resp.token, RequestToken(77));
        assert_eq!(resp.status, Status::Success);
    }

    #[test]
    fn test_unimplemented_capability() {
        let core = core(vec![]);
        let resp = send(
            &core,
            0,
            Operation::Create {
                path: "\\new".into(),
                options: CreateOptions::default(),
            },
        );
        assert_eq!(resp.status, Status::NotImplemented);
        let h = open(&core, "\\file");
        assert_eq!(send(&core, h, Operation::Flush).status, Status::NotImplemented);
    }

    #[test]
    fn test_provider_status_passes_through() {
        let core = core(vec![]);
        let resp = send(
            &core,
            0,
            Operation::Open {
                path: "\\missing".into(),
                options: OpenOptions::default(),
            },
        );
        assert_eq!(resp.status, Status::ObjectNameNotFound);
        assert_eq!(core.stats_snapshot().failures, 1);
    }

    #[test]
    fn test_unknown_handle() {
        let core = core(vec![]);
        assert_eq!(send(&core, 42, Operation::GetFileInfo).status, Status::InvalidHandle);
        assert_eq!(send(&core, 42, Operation::Close).status, Status::InvalidHandle);
    }

    #[test]
    fn test_directory_served_from_buffer() {
        let core = core(vec!["a", "b", "c"]);
        let h = open(&core, "\\");
        let one = DirEntry::new("a", FileInfo::default()).encoded_len();

        let first = list(&core, h, one);
        assert_eq!(first.status, Status::Success);
        let second = list(&core, h, one * 4);
        match second.payload {
            ResponsePayload::Directory { entries, data } => {
                assert_eq!(entries, 2);
                let names: Vec<_> = decode_entries(&data).map(|e| e.unwrap().name).collect();
                assert_eq!(names, vec!["b", "c"]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(list(&core, h, one).status, Status::NoMoreEntries);
        assert_eq!(core.provider().enumerations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_restart_refills() {
        let core = core(vec!["a"]);
        let h = open(&core, "\\");
        list(&core, h, 4096);
        let resp = send(
            &core,
            h,
            Operation::QueryDirectory {
                pattern: None,
                marker: None,
                restart: true,
                max_bytes: 4096,
            },
        );
        assert_eq!(resp.status, Status::Success);
        assert_eq!(core.provider().enumerations.load(Ordering::Relaxed), 2);
        assert_eq!(core.stats_snapshot().dir_fills, 2);
    }

    #[test]
    fn test_marker_resumes_after_name() {
        let core = core(vec!["a", "b", "c", "d"]);
        let h = open(&core, "\\");
        let resp = send(
            &core,
            h,
            Operation::QueryDirectory {
                pattern: None,
                marker: Some("b".into()),
                restart: false,
                max_bytes: 4096,
            },
        );
        match resp.payload {
            ResponsePayload::Directory { entries, .. } => assert_eq!(entries, 2),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_query_directory_on_file() {
        let core = core(vec![]);
        let h = open(&core, "\\file");
        assert_eq!(list(&core, h, 4096).status, Status::NotADirectory);
    }

    #[test]
    fn test_peek_requires_enumeration() {
        let core = core(vec!["x", "y"]);
        let h = open(&core, "\\");
        assert_eq!(
            core.peek_directory(h, |_| ()).unwrap_err(),
            ProxyError::InvalidHandle(h)
        );
        list(&core, h, 1);
        let (cursor, count) = core.peek_directory(h, |v| (v.cursor, v.count)).unwrap();
        assert_eq!((cursor, count), (0, 2));
    }

    #[test]
    fn test_close_drops_handle() {
        let core = core(vec!["x"]);
        let h = open(&core, "\\");
        list(&core, h, 4096);
        assert_eq!(core.open_handles(), 1);
        assert_eq!(send(&core, h, Operation::Close).status, Status::Success);
        assert_eq!(core.open_handles(), 0);
        assert_eq!(list(&core, h, 4096).status, Status::InvalidHandle);
    }

    #[test]
    fn test_malformed_ea_from_provider() {
        let core = core(vec![]);
        let h = open(&core, "\\file");
        let mut list = {
            let mut b = EaListBuilder::new();
            b.push(b"A", b"1", 0).unwrap();
            b.finish().to_vec()
        };
        list[0..4].copy_from_slice(&1000u32.to_le_bytes());
        *core.provider().ea.lock() = list;
        assert_eq!(send(&core, h, Operation::GetEa).status, Status::InvalidParameter);
    }

    #[test]
    fn test_malformed_set_ea_never_reaches_provider() {
        let core = core(vec![]);
        let h = open(&core, "\\file");
        let resp = send(&core, h, Operation::SetEa { ea: vec![1, 2, 3] });
        // Provider would answer NotImplemented; the walker rejects first.
        assert_eq!(resp.status, Status::InvalidParameter);
    }

    #[test]
    fn test_lock_unlock_pairs_leave_no_domains() {
        let core = core(vec![]);
        let h = open(&core, "\\file");
        for i in 0..500u64 {
            let offset = i * 512;
            let lock = Operation::Lock {
                offset,
                length: 512,
                exclusive: true,
                fail_immediately: true,
                owner: 1,
            };
            assert_eq!(send(&core, h, lock).status, Status::Success);
            let unlock = Operation::Unlock {
                offset,
                length: 512,
                owner: 1,
            };
            assert_eq!(send(&core, h, unlock).status, Status::Success);
        }
        assert_eq!(core.lock_domains(), 0);
        assert!(core.provider().locked.lock().is_empty());
    }

    #[test]
    fn test_range_lock_at_max_offset_does_not_block_metadata() {
        let core = core(vec![]);
        let h = open(&core, "\\file");
        let _range = core.locks.acquire(2, u64::MAX, Duration::ZERO).unwrap();
        let resp = send(
            &core,
            h,
            Operation::SetFileSize {
                size: 0,
                allocation_only: false,
            },
        );
        assert_eq!(resp.status, Status::Success);
        assert_eq!(core.stats_snapshot().lock_timeouts, 0);
    }

    #[test]
    fn test_fail_immediately_lock_on_busy_domain() {
        let core = core(vec![]);
        let h = open(&core, "\\file");
        let guard = core.locks.acquire(2, 0, Duration::ZERO).unwrap();

        let resp = send(
            &core,
            h,
            Operation::Lock {
                offset: 0,
                length: 10,
                exclusive: true,
                fail_immediately: true,
                owner: 1,
            },
        );
        assert_eq!(resp.status, Status::SharingViolation);
        assert!(core.provider().locked.lock().is_empty());
        assert_eq!(core.stats_snapshot().lock_timeouts, 1);

        drop(guard);
        let resp = send(
            &core,
            h,
            Operation::Lock {
                offset: 0,
                length: 10,
                exclusive: true,
                fail_immediately: true,
                owner: 1,
            },
        );
        assert_eq!(resp.status, Status::Success);
        assert_eq!(core.provider().locked.lock().len(), 1);
    }

    #[test]
    fn test_metadata_update_times_out() {
        let core = core(vec![]);
        let h = open(&core, "\\file");
        let _guard = core.locks.acquire_metadata(2, Duration::ZERO).unwrap();
        let resp = send(
            &core,
            h,
            Operation::SetFileSize {
                size: 0,
                allocation_only: false,
            },
        );
        assert_eq!(resp.status, Status::Timeout);
    }

    #[test]
    fn test_file_identity_falls_back_to_path() {
        let info = FileInfo::default();
        assert_eq!(file_identity("\\A", &info), file_identity("\\a", &info));
        assert_ne!(file_identity("\\a", &info), file_identity("\\b", &info));
        let numbered = FileInfo {
            index_number: 9,
            ..info
        };
        assert_eq!(file_identity("\\a", &numbered), 9);
    }
}
