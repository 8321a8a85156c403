//! Bootstrap watchdog
//!
//! The host's frame clock may not exist yet when the engine starts. The
//! watchdog thread retries [`HostTickSource::try_attach`] at a coarse
//! interval and exits as soon as one attempt succeeds, so the scheduler's
//! tick handler is attached exactly once. Between attempts it waits on a stop
//! channel, which lets [`Watchdog::stop`] end it immediately.

use crate::error::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Callback invoked once per host frame
pub type TickHandler = Arc<dyn Fn(Instant) + Send + Sync>;

/// A per-frame callback source owned by the host
pub trait HostTickSource: Send + Sync {
    /// Attach `handler`; false if the source is not ready (retry later)
    fn try_attach(&self, handler: TickHandler) -> bool;
}

/// Handle to the attach-once thread
pub struct Watchdog {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    attached: Arc<AtomicBool>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("attached", &self.is_attached())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl Watchdog {
    /// Start retrying the attachment every `interval`
    pub fn spawn(source: Arc<dyn HostTickSource>, handler: TickHandler, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let attached = Arc::new(AtomicBool::new(false));
        let flag = attached.clone();

        let handle = std::thread::Builder::new()
            .name("tagcomms-watchdog".to_string())
            .spawn(move || {
                let mut attempts = 0u32;
                loop {
                    attempts += 1;
                    if source.try_attach(handler.clone()) {
                        flag.store(true, Ordering::Release);
                        tracing::debug!("Tick handler attached after {} attempt(s)", attempts);
                        return;
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            attached,
        })
    }

    /// Whether the handler has been attached
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Stop retrying and join the thread
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
