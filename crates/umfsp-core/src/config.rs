//! Dispatch configuration.
//!
//! Tuning knobs for the dispatch core and its worker pool. Defaults suit a
//! local provider; hosts may load overrides from TOML, with durations written
//! in humantime form (`"250ms"`, `"2s"`).

use serde::Deserialize;
use std::time::Duration;

/// Default bound on waiting for a contended adaptive lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default upper bound on one handle's directory buffer.
pub const DEFAULT_MAX_DIR_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for [`DispatchCore`](crate::DispatchCore) and
/// [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a request waits on a contended lock domain before failing.
    ///
    /// Byte-range lock requests that ask to fail immediately ignore this and
    /// use a zero timeout.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// Maximum bytes of serialized entries held by one directory buffer.
    ///
    /// Enumeration stops filling once the next entry would exceed this.
    pub max_dir_buffer_bytes: usize,

    /// Number of worker threads servicing the request channel.
    pub workers: usize,

    /// Request queue depth per worker (bounded channel provides backpressure).
    pub queue_depth_per_worker: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_dir_buffer_bytes: DEFAULT_MAX_DIR_BUFFER_BYTES,
            workers: num_cpus::get().max(1),
            queue_depth_per_worker: 2,
        }
    }
}

impl DispatchConfig {
    /// Sets the adaptive lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the directory buffer size bound.
    #[must_use]
    pub fn max_dir_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_dir_buffer_bytes = bytes;
        self
    }

    /// Sets the worker count (clamped to at least one).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the per-worker queue depth (clamped to at least one).
    #[must_use]
    pub fn queue_depth_per_worker(mut self, depth: usize) -> Self {
        self.queue_depth_per_worker = depth.max(1);
        self
    }

    /// Total capacity of the request channel.
    pub fn queue_capacity(&self) -> usize {
        self.workers.max(1) * self.queue_depth_per_worker.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(1));
        assert_eq!(config.max_dir_buffer_bytes, 16 * 1024 * 1024);
        assert!(config.workers >= 1);
        assert_eq!(config.queue_depth_per_worker, 2);
    }

    #[test]
    fn test_builder_pattern() {
        let config = DispatchConfig::default()
            .lock_timeout(Duration::from_millis(50))
            .max_dir_buffer_bytes(4096)
            .workers(3)
            .queue_depth_per_worker(4);
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
        assert_eq!(config.max_dir_buffer_bytes, 4096);
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity(), 12);
    }

    #[test]
    fn test_zero_workers_clamped() {
        let config = DispatchConfig::default().workers(0).queue_depth_per_worker(0);
        assert_eq!(config.workers, 1);
        assert_eq!(config.queue_capacity(), 1);
    }
}
