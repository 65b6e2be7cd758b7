//! Open-handle table.
//!
//! Every successful create/open yields a handle id (starting at 1; 0 is never
//! issued) mapped to an [`OpenFile`]. The open file owns the provider's
//! per-handle context and the handle's directory buffer. Closing the handle
//! removes the entry, which drops the directory buffer exactly once and hands
//! the context back to the provider.
//!
//! Requests borrow a handle through a [`HandleRef`]. A close that finds
//! borrows outstanding parks on the table's condvar until the last one drops.

use crate::dir_buffer::DirBuffer;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};

/// State of one open handle.
#[derive(Debug)]
pub struct OpenFile<C> {
    ctx: C,
    path: RwLock<String>,
    is_directory: bool,
    /// Identity used for lock domains; shared by handles to the same file.
    file_id: u64,
    /// Enumeration cache; also serializes directory reads on this handle.
    dir: Mutex<Option<DirBuffer>>,
}

impl<C> OpenFile<C> {
    /// Wrap a provider context opened at `path`.
    pub fn new(ctx: C, path: impl Into<String>, is_directory: bool, file_id: u64) -> Self {
        Self {
            ctx,
            path: RwLock::new(path.into()),
            is_directory,
            file_id,
            dir: Mutex::new(None),
        }
    }

    /// Provider context.
    pub fn ctx(&self) -> &C {
        &self.ctx
    }

    /// Path the handle currently refers to.
    pub fn path(&self) -> String {
        self.path.read().clone()
    }

    /// Update the path after a rename.
    pub fn set_path(&self, path: impl Into<String>) {
        *self.path.write() = path.into();
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// File identity for lock domains.
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// Lock the handle's directory buffer slot.
    ///
    /// The slot is `None` until the first enumeration.
    pub fn dir_buffer(&self) -> MutexGuard<'_, Option<DirBuffer>> {
        self.dir.lock()
    }

    /// Give back the provider context, dropping the directory buffer.
    pub fn into_context(self) -> C {
        self.ctx
    }
}

/// Concurrent map from handle id to open file.
#[derive(Debug)]
pub struct HandleTable<V> {
    handles: DashMap<u64, Arc<V>>,
    next_id: AtomicU64,
    /// Guards the borrow-count check in [`remove`](Self::remove).
    released: Mutex<()>,
    release_cond: Condvar,
    /// Removals parked waiting for borrows to end.
    waiting: AtomicUsize,
}

/// A borrowed open handle; [`HandleTable::remove`] waits for it to drop.
#[derive(Debug)]
pub struct HandleRef<'a, V> {
    // Field order matters: the reference is released before the notice runs.
    value: Arc<V>,
    _notice: ReleaseNotice<'a, V>,
}

impl<V> Deref for HandleRef<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

/// Wakes parked removals once a borrow has been released.
#[derive(Debug)]
struct ReleaseNotice<'a, V> {
    table: &'a HandleTable<V>,
}

impl<V> Drop for ReleaseNotice<'_, V> {
    fn drop(&mut self) {
        fence(Ordering::SeqCst);
        if self.table.waiting.load(Ordering::SeqCst) > 0 {
            let _guard = self.table.released.lock();
            self.table.release_cond.notify_all();
        }
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> HandleTable<V> {
    /// Create an empty table. Ids start at 1.
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
            released: Mutex::new(()),
            release_cond: Condvar::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Insert `value` under a fresh id and return the id.
    pub fn insert(&self, value: V) -> u64 {
        let value = Arc::new(value);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // 0 is reserved; skip it if the counter ever wraps.
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id) {
                entry.insert(value);
                return id;
            }
        }
    }

    /// Borrow the value for `id`.
    ///
    /// The map shard is not held while the caller uses the value.
    pub fn get(&self, id: u64) -> Option<HandleRef<'_, V>> {
        let value = self.handles.get(&id).map(|v| Arc::clone(v.value()))?;
        Some(HandleRef {
            value,
            _notice: ReleaseNotice { table: self },
        })
    }

    /// Remove `id` and wait until no in-flight request still borrows its
    /// value, then return it by value.
    pub fn remove(&self, id: u64) -> Option<V> {
        let (_, mut value) = self.handles.remove(&id)?;
        loop {
            match Arc::try_unwrap(value) {
                Ok(v) => return Some(v),
                Err(shared) => value = shared,
            }
            let mut guard = self.released.lock();
            self.waiting.fetch_add(1, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            // A borrow dropped after this check sees `waiting` and notifies
            // under the mutex, which it cannot take until we are parked.
            if Arc::strong_count(&value) > 1 {
                self.release_cond.wait(&mut guard);
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.handles.contains_key(&id)
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Remove every handle, waiting out in-flight borrows.
    pub fn drain(&self) -> Vec<V> {
        let ids: Vec<u64> = self.handles.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
