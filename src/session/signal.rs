// SPDX-License-Identifier: GPL-3.0-only

//! Cooperative cancellation shared between the controller, the delivery
//! loop, acquisition sources and the interrupt handler

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cancellation flag, cheap to clone and safe to set from any thread
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag; returns true only for the call that set it first
    pub fn request_stop(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::SeqCst);
        if first {
            debug!("Stop requested");
        }
        first
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`, returning early once a stop is requested
    ///
    /// Returns whether a stop has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let slice = crate::constants::timing::DELIVERY_IDLE_WAIT;
        loop {
            if self.is_stop_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_stop_is_idempotent() {
        let signal = StopSignal::new();
        assert!(!signal.is_stop_requested());
        assert!(signal.request_stop());
        assert!(!signal.request_stop());
        assert!(signal.is_stop_requested());
    }

    #[test]
    fn test_clones_share_flag() {
        let signal = StopSignal::new();
        let handler_copy = signal.clone();
        thread::spawn(move || {
            handler_copy.request_stop();
        })
        .join()
        .unwrap();
        assert!(signal.is_stop_requested());
    }

    #[test]
    fn test_wait_timeout_returns_early() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        let started = Instant::now();
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.request_stop();
        });

        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(2));
        setter.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let signal = StopSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }
}
