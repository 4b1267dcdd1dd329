//! Completion notifications ("interrupts") from the coprocessor to the host.
//!
//! The worker raises a notification every time a batch of virtines has been cleaned. Delivery is
//! a bounded channel: raising never blocks the worker. If the host falls behind and the channel
//! is full, the notification is coalesced into the ones already pending and only counted.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// Monotonic per-device sequence number, starting at 1. Gaps mean notifications were
    /// coalesced because the channel was full.
    pub sequence: u64,
    /// Number of virtines cleaned since the previous notification.
    pub cleaned: u64,
}

/// Creates a connected notifier/receiver pair holding at most `capacity` pending notifications.
pub fn channel(capacity: usize) -> (Notifier, NotificationReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (
        Notifier {
            tx,
            next_sequence: 1,
            coalesced: 0,
        },
        NotificationReceiver { rx },
    )
}

#[derive(Debug)]
pub struct Notifier {
    tx: SyncSender<Notification>,
    next_sequence: u64,
    coalesced: u64,
}

impl Notifier {
    /// Queues a notification; returns whether it was delivered to the channel.
    pub fn raise(&mut self, cleaned: u64) -> bool {
        let notification = Notification {
            sequence: self.next_sequence,
            cleaned,
        };
        self.next_sequence += 1;

        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.coalesced += 1;
                tracing::debug!(
                    sequence = notification.sequence,
                    "notification channel full; coalescing"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!(sequence = notification.sequence, "no notification listener");
                false
            }
        }
    }

    /// Notifications that could not be queued because the channel was full.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}

#[derive(Debug)]
pub struct NotificationReceiver {
    rx: Receiver<Notification>,
}

impl NotificationReceiver {
    /// Blocks until a notification arrives; `None` once the device is gone.
    pub fn recv(&self) -> Option<Notification> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Notification> {
        match self.rx.try_recv() {
            Ok(n) => Some(n),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Bounded wait, for callers that must not hang (listeners polling a stop flag, tests,
    /// command-line tools).
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Notification, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Drains every notification that is already pending.
    pub fn drain(&self) -> Vec<Notification> {
        self.rx.try_iter().collect()
    }
}
