//! Service loop stop signalling.
//!
//! A [`ServiceLoop`] is shared between the work loop and whoever may ask it
//! to stop (the console-control handler, or a caller in tests). Stopping sets
//! a flag and wakes any thread parked in [`ServiceLoop::wait_timeout`].

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default)]
pub struct ServiceLoop {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl ServiceLoop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask the loop to stop. Idempotent.
    pub fn stop_loop(&self) {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            *stopped = true;
            info!("service stop requested");
        }
        self.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Park for up to `timeout`. Returns true if the loop was stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.wake.wait_for(&mut stopped, timeout);
        }
        *stopped
    }

    /// Route Ctrl+C and termination signals to [`stop_loop`](Self::stop_loop).
    ///
    /// Can be installed once per process.
    pub fn install_console_handler(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        ctrlc::set_handler(move || {
            eprintln!("\nReceived interrupt, stopping...");
            this.stop_loop();
        })
        .context("Failed to set console control handler")
    }
}

/// Returned when work was cut short by [`ServiceLoop::stop_loop`].
#[derive(Debug)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("interrupted")
    }
}

impl std::error::Error for Interrupted {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out_when_running() {
        let service = ServiceLoop::new();
        assert!(!service.wait_timeout(Duration::from_millis(10)));
        assert!(!service.is_stopped());
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let service = ServiceLoop::new();
        let waiter = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let start = Instant::now();
                let stopped = service.wait_timeout(Duration::from_secs(30));
                (stopped, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        service.stop_loop();
        let (stopped, waited) = waiter.join().unwrap();
        assert!(stopped);
        assert!(waited < Duration::from_secs(30));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let service = ServiceLoop::new();
        service.stop_loop();
        service.stop_loop();
        assert!(service.is_stopped());
        assert!(service.wait_timeout(Duration::ZERO));
    }
}
