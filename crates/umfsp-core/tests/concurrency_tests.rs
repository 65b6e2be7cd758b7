//! Concurrency tests for the dispatcher and adaptive locking.
//!
//! Focus areas:
//! - requests on one lock domain never reach the provider concurrently
//! - every submitted request gets exactly one reply under load
//! - directory reads on one handle stay consistent when racing

mod common;

use common::{TestVolume, init_tracing};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use umfsp_core::{
    ByteRange, DispatchConfig, DispatchCore, Dispatcher, FileInfo, FileSystemProvider,
    OpenOptions, Operation, ProxyResult, Request, RequestToken, Status,
};

/// Provider that records how many lock calls are inside it at once.
#[derive(Default)]
struct OverlapTracker {
    inside: AtomicUsize,
    max_inside: AtomicUsize,
    calls: AtomicUsize,
}

impl FileSystemProvider for OverlapTracker {
    type FileContext = ();

    fn open(&self, _path: &str, _options: &OpenOptions) -> ProxyResult<((), FileInfo)> {
        Ok((
            (),
            FileInfo {
                index_number: 1,
                ..FileInfo::default()
            },
        ))
    }

    fn lock(&self, _file: &(), _range: ByteRange, _exclusive: bool, _owner: u64) -> ProxyResult<()> {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_micros(200));
        self.inside.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_file_size(&self, file: &(), _new_size: u64, _allocation_only: bool) -> ProxyResult<FileInfo> {
        self.lock(file, ByteRange::new(0, 0), true, 0)?;
        Ok(FileInfo::default())
    }
}

fn open_handle<P: FileSystemProvider>(core: &DispatchCore<P>, path: &str) -> u64 {
    let reply = core.dispatch(Request::new(
        RequestToken(0),
        0,
        Operation::Open {
            path: path.into(),
            options: OpenOptions::default(),
        },
    ));
    match reply.payload {
        umfsp_core::ResponsePayload::Opened { handle, .. } => handle,
        _ => panic!("open failed: {}", reply.status),
    }
}

#[test]
fn test_same_domain_requests_are_serialized() {
    init_tracing();
    let config = DispatchConfig::default()
        .workers(8)
        .lock_timeout(Duration::from_secs(30));
    let core = Arc::new(DispatchCore::new(OverlapTracker::default(), config));
    // Two handles to the same file share the lock domain.
    let handles = [open_handle(&core, "\\a"), open_handle(&core, "\\a")];
    let dispatcher = Dispatcher::start(Arc::clone(&core)).unwrap();

    const REQUESTS: u64 = 200;
    for i in 0..REQUESTS {
        let handle = handles[usize::try_from(i % 2).unwrap()];
        dispatcher
            .submit(Request::new(
                RequestToken(i + 1),
                handle,
                Operation::Lock {
                    offset: 0,
                    length: 1,
                    exclusive: true,
                    fail_immediately: false,
                    owner: i,
                },
            ))
            .unwrap();
    }

    for _ in 0..REQUESTS {
        let reply = dispatcher.replies().recv_timeout(Duration::from_secs(30)).unwrap();
        assert_eq!(reply.status, Status::Success);
    }
    dispatcher.stop();

    let tracker = core.provider();
    assert_eq!(tracker.calls.load(Ordering::SeqCst), 200);
    assert_eq!(tracker.max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn test_metadata_and_range_domains_are_distinct() {
    let core = DispatchCore::new(
        OverlapTracker::default(),
        DispatchConfig::default().lock_timeout(Duration::from_millis(10)),
    );
    let h = open_handle(&core, "\\a");
    let lock = core.dispatch(Request::new(
        RequestToken(1),
        h,
        Operation::Lock {
            offset: 0,
            length: 1,
            exclusive: true,
            fail_immediately: true,
            owner: 1,
        },
    ));
    let resize = core.dispatch(Request::new(
        RequestToken(2),
        h,
        Operation::SetFileSize {
            size: 1,
            allocation_only: false,
        },
    ));
    assert_eq!(lock.status, Status::Success);
    assert_eq!(resize.status, Status::Success);
    assert_eq!(core.stats_snapshot().lock_timeouts, 0);
}

#[test]
fn test_exactly_one_reply_under_load() {
    let vol = TestVolume::with_files("\\", 16);
    let handles: Vec<u64> = (0..16).map(|i| vol.open(&format!("\\f{i:04}"))).collect();
    let dispatcher = Arc::new(Dispatcher::start(Arc::clone(&vol.core)).unwrap());

    const SUBMITTERS: u64 = 4;
    const PER_SUBMITTER: u64 = 250;
    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|s| {
            let dispatcher = Arc::clone(&dispatcher);
            let handles = handles.clone();
            thread::spawn(move || {
                for i in 0..PER_SUBMITTER {
                    let token = s * PER_SUBMITTER + i + 1;
                    let handle = handles[usize::try_from(token % 16).unwrap()];
                    dispatcher
                        .submit(Request::new(RequestToken(token), handle, Operation::GetFileInfo))
                        .unwrap();
                }
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for _ in 0..SUBMITTERS * PER_SUBMITTER {
        let reply = dispatcher.replies().recv_timeout(Duration::from_secs(30)).unwrap();
        assert_eq!(reply.status, Status::Success);
        assert!(seen.insert(reply.token), "duplicate reply for {}", reply.token);
    }
    for s in submitters {
        s.join().unwrap();
    }
    assert!(dispatcher.replies().try_recv().is_err());
    dispatcher.stop();
    assert_eq!(dispatcher.stats().in_flight(), 0);
}

#[test]
fn test_racing_directory_reads_on_one_handle() {
    let vol = Arc::new(TestVolume::with_files("\\d", 64));
    let h = vol.open("\\d");
    let entry = umfsp_core::DirEntry::new("f0000", FileInfo::default()).encoded_len();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let vol = Arc::clone(&vol);
            thread::spawn(move || vol.list_all(h, None, entry * 5))
        })
        .collect();

    let mut all: Vec<String> = readers
        .into_iter()
        .flat_map(|r| r.join().unwrap())
        .collect();
    // The shared cursor hands each entry to exactly one reader.
    all.sort();
    let expected: Vec<String> = (0..64).map(|i| format!("f{i:04}")).collect();
    assert_eq!(all, expected);
}
