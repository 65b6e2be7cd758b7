//! Worker pool feeding requests through a [`DispatchCore`].
//!
//! Requests enter a bounded `crossbeam-channel` queue (the bound provides
//! backpressure to the driver channel). Named worker threads pull from it and
//! post exactly one [`Response`] per request on the reply channel. A panic in
//! provider code is caught and answered with [`Status::InternalError`], so the
//! driver is never left waiting.

use crate::dispatch::DispatchCore;
use crate::error::{ProxyError, ProxyResult};
use crate::provider::FileSystemProvider;
use crate::request::{Request, Response};
use crate::status::Status;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Worker pool counters.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Requests accepted into the queue.
    pub submitted: AtomicU64,
    /// Replies posted.
    pub completed: AtomicU64,
    /// Requests whose dispatch panicked.
    pub panicked: AtomicU64,
    /// Submissions refused after shutdown.
    pub rejected: AtomicU64,
    /// Total time spent dispatching, in nanoseconds.
    pub total_dispatch_nanos: AtomicU64,
}

/// Copy of [`DispatcherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub rejected: u64,
    pub total_dispatch_nanos: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            total_dispatch_nanos: self.total_dispatch_nanos.load(Ordering::Relaxed),
        }
    }

    /// Requests accepted but not yet answered.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .load(Ordering::Relaxed)
            .saturating_sub(self.completed.load(Ordering::Relaxed))
    }
}

/// Multi-threaded request loop over a shared [`DispatchCore`].
pub struct Dispatcher<P: FileSystemProvider> {
    core: Arc<DispatchCore<P>>,
    /// `None` once stopped.
    sender: RwLock<Option<Sender<Request>>>,
    replies: Receiver<Response>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<DispatcherStats>,
}

impl<P: FileSystemProvider> std::fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.lock().len())
            .field("running", &self.is_running())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl<P: FileSystemProvider> Dispatcher<P> {
    /// Start `core.config().workers` workers.
    pub fn start(core: Arc<DispatchCore<P>>) -> ProxyResult<Self> {
        let config = core.config();
        let num_workers = config.workers.max(1);
        let (sender, receiver) = bounded::<Request>(config.queue_capacity());
        let (reply_tx, replies) = unbounded::<Response>();
        let stats = Arc::new(DispatcherStats::default());

        let mut workers = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let core = Arc::clone(&core);
            let receiver = receiver.clone();
            let reply_tx = reply_tx.clone();
            let stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("umfsp-worker-{i}"))
                .spawn(move || worker_loop(&core, &receiver, &reply_tx, &stats))
                .map_err(|e| ProxyError::Internal(format!("failed to spawn worker {i}: {e}")))?;
            workers.push(handle);
        }

        debug!(
            num_workers,
            queue_capacity = config.queue_capacity(),
            "dispatcher started"
        );

        Ok(Self {
            core,
            sender: RwLock::new(Some(sender)),
            replies,
            workers: Mutex::new(workers),
            stats,
        })
    }

    /// Queue a request, blocking while the queue is full.
    ///
    /// Fails with [`ProxyError::Shutdown`] after [`stop`](Self::stop).
    pub fn submit(&self, request: Request) -> ProxyResult<()> {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(ProxyError::Shutdown);
        };
        sender.send(request).map_err(|_| {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            ProxyError::Shutdown
        })?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reply channel; one response arrives per accepted request.
    pub fn replies(&self) -> &Receiver<Response> {
        &self.replies
    }

    pub fn core(&self) -> &Arc<DispatchCore<P>> {
        &self.core
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Stop accepting requests, let workers drain the queue and join them.
    ///
    /// Replies for everything accepted before the stop remain readable.
    pub fn stop(&self) {
        if self.sender.write().take().is_none() {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for (i, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.join() {
                warn!(worker = i, error = ?e, "worker thread panicked during shutdown");
            }
        }
        debug!(stats = ?self.stats.snapshot(), "dispatcher stopped");
    }
}

impl<P: FileSystemProvider> Drop for Dispatcher<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<P: FileSystemProvider>(
    core: &DispatchCore<P>,
    receiver: &Receiver<Request>,
    replies: &Sender<Response>,
    stats: &DispatcherStats,
) {
    trace!("worker started");
    while let Ok(request) = receiver.recv() {
        let token = request.token;
        let started = Instant::now();
        let response = match catch_unwind(AssertUnwindSafe(|| core.dispatch(request))) {
            Ok(response) => response,
            Err(panic) => {
                stats.panicked.fetch_add(1, Ordering::Relaxed);
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                warn!(%token, panic = %message, "dispatch panicked");
                Response::error(token, Status::InternalError)
            }
        };
        // Truncation only matters past ~584 years of dispatch time.
        #[allow(clippy::cast_possible_truncation)]
        let nanos = started.elapsed().as_nanos() as u64;
        stats.total_dispatch_nanos.fetch_add(nanos, Ordering::Relaxed);
        stats.completed.fetch_add(1, Ordering::Relaxed);
        if replies.send(response).is_err() {
            trace!(%token, "reply channel closed");
        }
    }
    trace!("worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::provider::{FileInfo, OpenOptions, VolumeInfo};
    use crate::request::{Operation, RequestToken};
    use std::collections::HashSet;
    use std::time::Duration;

    struct Volatile;

    impl FileSystemProvider for Volatile {
        type FileContext = ();

        fn get_volume_info(&self) -> ProxyResult<VolumeInfo> {
            Ok(VolumeInfo::default())
        }

        fn open(&self, path: &str, _options: &OpenOptions) -> ProxyResult<((), FileInfo)> {
            assert!(path != "\\boom", "provider bug");
            Ok(((), FileInfo::default()))
        }
    }

    fn dispatcher(workers: usize) -> Dispatcher<Volatile> {
        let config = DispatchConfig::default().workers(workers);
        Dispatcher::start(Arc::new(DispatchCore::new(Volatile, config))).unwrap()
    }

    fn volume(token: u64) -> Request {
        Request::new(RequestToken(token), 0, Operation::GetVolumeInfo)
    }

    #[test]
    fn test_exactly_one_reply_per_request() {
        let d = dispatcher(4);
        for t in 1..=100 {
            d.submit(volume(t)).unwrap();
        }
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let r = d.replies().recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(seen.insert(r.token.raw()), "duplicate reply");
            assert_eq!(r.status, Status::Success);
        }
        assert!(d.replies().recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(d.stats().snapshot().completed, 100);
    }

    #[test]
    fn test_panic_becomes_internal_error() {
        let d = dispatcher(1);
        d.submit(Request::new(
            RequestToken(9),
            0,
            Operation::Open {
                path: "\\boom".into(),
                options: OpenOptions::default(),
            },
        ))
        .unwrap();
        let r = d.replies().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(r.token, RequestToken(9));
        assert_eq!(r.status, Status::InternalError);

        // The worker survives the panic.
        d.submit(volume(10)).unwrap();
        let r = d.replies().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(r.status, Status::Success);
        assert_eq!(d.stats().snapshot().panicked, 1);
    }

    #[test]
    fn test_submit_after_stop_is_rejected() {
        let d = dispatcher(2);
        d.submit(volume(1)).unwrap();
        d.stop();
        assert!(!d.is_running());
        assert_eq!(d.submit(volume(2)), Err(ProxyError::Shutdown));
        // The request accepted before stop was still answered.
        assert_eq!(d.replies().try_recv().unwrap().token, RequestToken(1));
        assert_eq!(d.stats().snapshot().rejected, 1);
        d.stop();
    }
}
