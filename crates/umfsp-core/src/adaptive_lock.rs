//! Adaptive mutual exclusion keyed by `(file, offset)`.
//!
//! An [`AdaptiveLock`] is an atomic flag with a lazily created wait handle.
//! Acquisition first tries the flag without blocking. Only when that fails
//! does it create (once) and block on a `parking_lot` condvar, bounded by a
//! deadline. Uncontended acquisitions never touch the wait handle.
//!
//! Release happens by dropping the [`AdaptiveLockGuard`], so an acquire is
//! always paired with exactly one release.
//!
//! [`LockTable`] hands out one lock per [`LockDomain`]. A guard obtained
//! through the table removes its domain on drop once no other thread holds
//! or waits on it, so the table only tracks live domains.

use crate::error::{ProxyError, ProxyResult};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Offset recorded while a lock is free.
const NO_OFFSET: u64 = u64::MAX;

/// Offset recorded for metadata updates.
pub const METADATA_LOCK_OFFSET: u64 = u64::MAX;

/// What a lock domain serializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainKind {
    /// Byte-range work at an offset.
    Range,
    /// Attribute updates for the whole file.
    Metadata,
}

/// The unit of mutual exclusion: `(kind, file identity, offset)`.
///
/// The kind keeps a byte-range lock at any offset, `u64::MAX` included,
/// apart from the file's metadata lock.
pub type LockDomain = (DomainKind, u64, u64);

type LockMap = DashMap<LockDomain, Arc<AdaptiveLock>>;

/// Removes an idle domain from its table when the guard drops.
#[derive(Debug)]
struct Reclaim {
    locks: Arc<LockMap>,
    domain: LockDomain,
}

/// Condvar pair created on first contention.
#[derive(Debug, Default)]
struct WaitHandle {
    mutex: Mutex<()>,
    cond: Condvar,
}

/// Hybrid lock: atomic fast path, bounded condvar wait on contention.
#[derive(Debug)]
pub struct AdaptiveLock {
    held: AtomicBool,
    /// Offset of the current holder, [`NO_OFFSET`] when free.
    offset: AtomicU64,
    /// Threads blocked (or about to block) on the wait handle.
    waiters: AtomicUsize,
    wait: OnceCell<WaitHandle>,
}

impl Default for AdaptiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveLock {
    /// Create a free lock.
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            offset: AtomicU64::new(NO_OFFSET),
            waiters: AtomicUsize::new(0),
            wait: OnceCell::new(),
        }
    }

    fn try_take(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    fn granted(self: &Arc<Self>, offset: u64, contended: bool) -> AdaptiveLockGuard {
        self.offset.store(offset, Ordering::Release);
        AdaptiveLockGuard {
            lock: Arc::clone(self),
            contended,
            reclaim: None,
        }
    }

    /// Acquire the lock for `(file, offset)`, waiting at most `timeout`.
    ///
    /// A zero timeout makes a single non-blocking attempt. Fails with
    /// [`ProxyError::LockTimeout`] if the lock is still held at the deadline.
    pub fn acquire(
        self: &Arc<Self>,
        file: u64,
        offset: u64,
        timeout: Duration,
    ) -> ProxyResult<AdaptiveLockGuard> {
        if self.try_take() {
            return Ok(self.granted(offset, false));
        }
        if timeout.is_zero() {
            return Err(ProxyError::LockTimeout { file, offset });
        }

        trace!(file, offset, ?timeout, "adaptive lock contended, waiting");
        // A timeout too large to express as an instant waits without bound.
        let deadline = Instant::now().checked_add(timeout);
        let wait = self.wait.get_or_init(WaitHandle::default);
        let mut guard = wait.mutex.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let acquired = loop {
            if self.try_take() {
                break true;
            }
            match deadline {
                Some(deadline) => {
                    if wait.cond.wait_until(&mut guard, deadline).timed_out() {
                        break self.try_take();
                    }
                }
                None => wait.cond.wait(&mut guard),
            }
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        drop(guard);

        if acquired {
            Ok(self.granted(offset, true))
        } else {
            debug!(file, offset, ?timeout, "adaptive lock timed out");
            Err(ProxyError::LockTimeout { file, offset })
        }
    }

    /// Whether some thread currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Offset recorded by the current holder.
    pub fn holder_offset(&self) -> Option<u64> {
        match self.offset.load(Ordering::Acquire) {
            NO_OFFSET => None,
            offset => Some(offset),
        }
    }

    /// Whether the wait handle has been created.
    pub fn has_wait_handle(&self) -> bool {
        self.wait.get().is_some()
    }

    fn release(&self) {
        self.offset.store(NO_OFFSET, Ordering::Release);
        self.held.store(false, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0
            && let Some(wait) = self.wait.get()
        {
            // Taking the mutex orders this notify after the waiter parks.
            let _guard = wait.mutex.lock();
            wait.cond.notify_one();
        }
    }
}

/// Holds an [`AdaptiveLock`]; releases it on drop.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct AdaptiveLockGuard {
    lock: Arc<AdaptiveLock>,
    contended: bool,
    reclaim: Option<Reclaim>,
}

impl AdaptiveLockGuard {
    /// Whether the acquisition had to wait.
    pub fn was_contended(&self) -> bool {
        self.contended
    }
}

impl Drop for AdaptiveLockGuard {
    fn drop(&mut self) {
        self.lock.release();
        if let Some(reclaim) = self.reclaim.take() {
            // Two references left means only the table and this guard know
            // the lock; `lock_for` clones under the same shard lock, so a
            // newcomer either keeps it alive or finds a fresh entry.
            reclaim.locks.remove_if(&reclaim.domain, |_, lock| {
                Arc::strong_count(lock) == 2 && !lock.is_held()
            });
        }
    }
}

/// Acquisition counters for a [`LockTable`].
#[derive(Debug, Default)]
pub struct LockStats {
    /// Acquisitions satisfied by the atomic fast path.
    pub fast_path: AtomicU64,
    /// Acquisitions that had to wait.
    pub contended: AtomicU64,
    /// Acquisitions that gave up at the deadline.
    pub timeouts: AtomicU64,
}

/// Point-in-time copy of [`LockStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStatsSnapshot {
    pub fast_path: u64,
    pub contended: u64,
    pub timeouts: u64,
}

impl LockStats {
    /// Copy the current counters.
    pub fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            fast_path: self.fast_path.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Map from lock domain to its lock.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Arc<LockMap>,
    stats: LockStats,
}

impl LockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `domain`, created on first use.
    pub fn lock_for(&self, domain: LockDomain) -> Arc<AdaptiveLock> {
        Arc::clone(self.locks.entry(domain).or_default().value())
    }

    /// Acquire the byte-range lock for `(file, offset)`.
    pub fn acquire(&self, file: u64, offset: u64, timeout: Duration) -> ProxyResult<AdaptiveLockGuard> {
        self.acquire_domain((DomainKind::Range, file, offset), timeout)
    }

    /// Acquire the metadata lock for `file`.
    pub fn acquire_metadata(&self, file: u64, timeout: Duration) -> ProxyResult<AdaptiveLockGuard> {
        self.acquire_domain((DomainKind::Metadata, file, METADATA_LOCK_OFFSET), timeout)
    }

    fn acquire_domain(&self, domain: LockDomain, timeout: Duration) -> ProxyResult<AdaptiveLockGuard> {
        let (_, file, offset) = domain;
        let lock = self.lock_for(domain);
        let acquired = lock.acquire(file, offset, timeout);
        drop(lock);
        match acquired {
            Ok(mut guard) => {
                guard.reclaim = Some(Reclaim {
                    locks: Arc::clone(&self.locks),
                    domain,
                });
                let counter = if guard.was_contended() {
                    &self.stats.contended
                } else {
                    &self.stats.fast_path
                };
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(guard)
            }
            Err(e) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                // A timed-out caller may have been the last one to know
                // a domain whose holder has since released.
                self.locks
                    .remove_if(&domain, |_, lock| Arc::strong_count(lock) == 1 && !lock.is_held());
                Err(e)
            }
        }
    }

    /// Drop every lock that nobody holds or references.
    ///
    /// Guards reclaim their own domain, so this only finds entries left by
    /// [`lock_for`](Self::lock_for) callers.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|_, lock| Arc::strong_count(lock) > 1 || lock.is_held());
        before.saturating_sub(self.locks.len())
    }

    /// Drop the idle locks belonging to `file`.
    pub fn forget_file(&self, file: u64) {
        self.locks.retain(|&(_, f, _), lock| {
            f != file || Arc::strong_count(lock) > 1 || lock.is_held()
        });
    }

    /// Number of lock domains currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no domain is tracked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Acquisition counters.
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }
}
