//! Pause / resume / cancel flags shared between the caller and the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Flags {
    paused: AtomicBool,
    cancelled: AtomicBool,
}

/// Cloneable control handle for one run.
///
/// The worker only observes these flags at checkpoints between discrete
/// steps; an in-flight host call is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    flags: Arc<Flags>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
    }

    /// Request cancellation. Also releases a paused worker.
    pub fn cancel(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `total` in `slice`-sized steps; returns `false` if cancelled meanwhile.
    pub fn sleep_unless_cancelled(&self, total: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + total;
        let slice = slice.max(Duration::from_millis(1));
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }

    /// Block while paused; returns `false` if cancelled before or during the wait.
    pub fn wait_while_paused(&self, poll: Duration) -> bool {
        while self.is_paused() && !self.is_cancelled() {
            thread::sleep(poll);
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_releases_pause() {
        let control = RunControl::new();
        control.pause();
        let worker = control.clone();
        let handle = thread::spawn(move || worker.wait_while_paused(Duration::from_millis(1)));
        thread::sleep(Duration::from_millis(10));
        control.cancel();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn resume_releases_pause() {
        let control = RunControl::new();
        control.pause();
        let worker = control.clone();
        let handle = thread::spawn(move || worker.wait_while_paused(Duration::from_millis(1)));
        thread::sleep(Duration::from_millis(10));
        control.resume();
        assert!(handle.join().unwrap());
        assert!(!control.is_paused());
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let control = RunControl::new();
        control.cancel();
        let start = Instant::now();
        assert!(!control.sleep_unless_cancelled(Duration::from_secs(60), Duration::from_millis(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(RunControl::new().sleep_unless_cancelled(Duration::ZERO, Duration::ZERO));
    }
}
