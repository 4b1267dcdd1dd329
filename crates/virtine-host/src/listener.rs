//! Delivers device notifications to a host callback on a dedicated thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use virtine_coproc::{Notification, NotificationReceiver};

use crate::error::ListenError;

/// How often an idle listener checks whether it has been asked to stop.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub const LISTENER_THREAD_NAME: &str = "virtine-listener";

/// Runs `callback` for every notification until the device goes away or the listener is stopped.
///
/// Dropping the listener stops and joins its thread.
pub struct Listener {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Option<NotificationReceiver>>>,
}

impl Listener {
    pub fn spawn<F>(receiver: NotificationReceiver, mut callback: F) -> Result<Self, ListenError>
    where
        F: FnMut(Notification) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(LISTENER_THREAD_NAME.to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    match receiver.recv_timeout(STOP_POLL_INTERVAL) {
                        Ok(notification) => callback(notification),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            tracing::debug!("device gone; listener exiting");
                            return None;
                        }
                    }
                }
                Some(receiver)
            })
            .map_err(ListenError::Spawn)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the listener and hands back the receiver, unless the device already went away (or
    /// the callback panicked).
    pub fn stop(mut self) -> Option<NotificationReceiver> {
        self.stop_and_join()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn stop_and_join(&mut self) -> Option<NotificationReceiver> {
        let handle = self.handle.take()?;
        self.stop.store(true, Ordering::Release);
        match handle.join() {
            Ok(receiver) => receiver,
            Err(_) => {
                tracing::error!("notification listener panicked");
                None
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
