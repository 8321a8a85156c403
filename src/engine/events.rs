//! Notifications and the communication error latch
//!
//! The engine reports progress to the host through [`Notification`]s sent
//! over a bounded crossbeam channel. Producers (the tick thread and the
//! worker) never block on it: when the host falls behind, notifications are
//! dropped and counted instead.
//!
//! The [`ErrorLatch`] remembers the first error since the simulation was last
//! started; only the first one raises a [`Notification::CommError`].

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Event delivered to the host
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A poll ticket was enqueued for the group
    GroupPolled(String),
    /// Every tag of the group completed its first read (fires once)
    GroupInitialized(String),
    /// First communication error since the simulation started
    CommError {
        message: String,
        occurred_at: DateTime<Utc>,
    },
    /// The host announced that registration is complete
    AllGroupsRegistered,
}

/// Producer side of the notification channel
#[derive(Debug)]
pub(crate) struct EventSender {
    tx: Sender<Notification>,
    dropped: AtomicU64,
}

impl EventSender {
    /// Send without blocking; a full channel drops the event
    pub(crate) fn send(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Notification channel full, dropped {:?}", dropped);
            }
            // Host dropped its receiver; nobody is listening
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Events lost to a full channel
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Host side of the notification channel
#[derive(Debug, Clone)]
pub struct EventReceiver {
    rx: Receiver<Notification>,
}

impl EventReceiver {
    /// Try to receive a notification without blocking
    pub fn try_recv(&self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Receive all pending notifications
    pub fn drain(&self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            notifications.push(n);
        }
        notifications
    }

    /// Wait up to `timeout` for the next notification
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        match self.rx.recv_timeout(timeout) {
            Ok(n) => Some(n),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of notifications waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a notification channel holding at most `capacity` events
pub(crate) fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        EventSender {
            tx,
            dropped: AtomicU64::new(0),
        },
        EventReceiver { rx },
    )
}

/// Snapshot of the latched communication error state
#[derive(Debug, Clone, PartialEq)]
pub struct LatchedError {
    /// Message of the error that raised the latch
    pub first_message: String,
    /// Message of the most recent error
    pub last_message: String,
    /// Errors recorded since the latch was raised
    pub count: usize,
    /// When the latch was raised
    pub since: DateTime<Utc>,
}

/// Sticky "communication error" state
#[derive(Debug, Default)]
pub struct ErrorLatch {
    state: Mutex<Option<LatchedError>>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error; true if this one raised the latch
    pub fn record(&self, message: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.as_mut() {
            Some(latched) => {
                latched.last_message = message.to_string();
                latched.count += 1;
                false
            }
            None => {
                *state = Some(LatchedError {
                    first_message: message.to_string(),
                    last_message: message.to_string(),
                    count: 1,
                    since: Utc::now(),
                });
                true
            }
        }
    }

    /// Lower the latch
    pub fn clear(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Current state, if raised
    pub fn snapshot(&self) -> Option<LatchedError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check if the latch is raised
    pub fn is_raised(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
