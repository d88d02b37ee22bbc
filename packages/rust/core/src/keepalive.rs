//! Optional low-frequency pinger that keeps an external session warm.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use assemblybuilder_shared::{AssemblyBuilderError, Result};

use crate::dialogs::park_for;

/// Something that can be pinged to keep its session alive.
pub trait SessionPinger: Send + Sync {
    fn ping(&self) -> Result<()>;
}

/// Counters published by the keep-alive thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveStats {
    pub pings: u64,
    pub failures: u64,
}

/// Background keep-alive. Failures are logged and never affect the run.
pub struct KeepAlive {
    shutdown: Arc<AtomicBool>,
    pings: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub fn start(pinger: Arc<dyn SessionPinger>, interval: Duration) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let pings = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));
        let (flag, ok, failed) = (
            Arc::clone(&shutdown),
            Arc::clone(&pings),
            Arc::clone(&failures),
        );

        let handle = thread::Builder::new()
            .name("keep-alive".into())
            .spawn(move || {
                loop {
                    park_for(&flag, interval);
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    match pinger.ping() {
                        Ok(()) => {
                            ok.fetch_add(1, Ordering::SeqCst);
                            debug!("keep-alive ping");
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::SeqCst);
                            warn!(error = %e, "keep-alive ping failed");
                        }
                    }
                }
            })
            .map_err(|e| AssemblyBuilderError::Worker(format!("keep-alive: {e}")))?;

        Ok(Self {
            shutdown,
            pings,
            failures,
            handle: Some(handle),
        })
    }

    pub fn stats(&self) -> KeepAliveStats {
        KeepAliveStats {
            pings: self.pings.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        }
    }

    /// Signal the thread and wait for it. Idempotent.
    pub fn stop(&mut self) -> KeepAliveStats {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("keep-alive thread panicked");
            }
        }
        self.stats()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}
