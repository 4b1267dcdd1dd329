//! Device handle: owns the locked [`DeviceState`] and the worker thread that consumes it.

use core::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::CoprocConfig;
use crate::error::CoprocError;
use crate::irq::{self, NotificationReceiver};
use crate::memory::VirtineMemory;
use crate::port::RegisterPort;
use crate::state::{DeviceState, DeviceStatus};
use crate::worker;

pub(crate) struct Shared {
    state: Mutex<DeviceState>,
    wake: Condvar,
}

impl Shared {
    // Every mutation of `DeviceState` is a complete step, so a panic elsewhere cannot leave it
    // half-updated; recover the guard rather than propagating the poison.
    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait_for_work(&self) -> MutexGuard<'_, DeviceState> {
        let guard = self.lock();
        self.wake
            .wait_while(guard, |state| !state.doorbell && !state.stopping)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes the worker if the access left the doorbell set.
    fn kick_if_rung(&self, state: &DeviceState) {
        if state.doorbell {
            self.wake.notify_one();
        }
    }
}

impl RegisterPort for Shared {
    fn read_register(&self, offset: u64, buf: &mut [u8]) -> usize {
        let mut state = self.lock();
        let n = state.read_register(offset, buf);
        self.kick_if_rung(&state);
        n
    }

    fn write_register(&self, offset: u64, data: &[u8]) -> usize {
        let mut state = self.lock();
        let n = state.write_register(offset, data);
        self.kick_if_rung(&state);
        n
    }

    fn signal_doorbell(&self) {
        let mut state = self.lock();
        state.ring_doorbell();
        self.kick_if_rung(&state);
    }
}

/// A running virtine-cleaning coprocessor.
///
/// Dropping the handle stops the worker and joins it before the device state (ring buffers,
/// snapshot memory) is released.
pub struct VirtineCoprocessor {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl VirtineCoprocessor {
    /// Creates the device and starts its worker thread.
    ///
    /// The returned receiver yields one [`irq::Notification`] per completed batch.
    pub fn spawn(
        config: &CoprocConfig,
        memory: impl VirtineMemory + 'static,
    ) -> Result<(Self, NotificationReceiver), CoprocError> {
        config.validate()?;

        let (notifier, receiver) = irq::channel(config.notification_capacity);
        let state = DeviceState::new(Box::new(memory), notifier, config.batch_factor);
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(config.worker_thread_name.clone())
            .spawn(move || worker::run(&worker_shared))
            .map_err(CoprocError::SpawnWorker)?;

        tracing::debug!(
            batch_factor = config.batch_factor,
            thread = %config.worker_thread_name,
            "coprocessor started"
        );

        Ok((
            Self {
                shared,
                worker: Some(worker),
            },
            receiver,
        ))
    }

    pub fn status(&self) -> DeviceStatus {
        self.shared.lock().status()
    }

    pub fn port(&self) -> CoprocPort {
        CoprocPort {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs `f` against the locked device state.
    pub fn inspect<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        f(&self.shared.lock())
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut state = self.shared.lock();
            state.request_stop();
            self.shared.wake.notify_all();
        }
        if worker.join().is_err() {
            tracing::error!("coprocessor worker panicked");
        }
        tracing::debug!("coprocessor stopped");
    }
}

impl Drop for VirtineCoprocessor {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl RegisterPort for VirtineCoprocessor {
    fn read_register(&self, offset: u64, buf: &mut [u8]) -> usize {
        self.shared.read_register(offset, buf)
    }

    fn write_register(&self, offset: u64, data: &[u8]) -> usize {
        self.shared.write_register(offset, data)
    }

    fn signal_doorbell(&self) {
        self.shared.signal_doorbell()
    }
}

/// Clone-able register access to a coprocessor, detached from the handle's lifetime.
///
/// A port outlives the worker if the [`VirtineCoprocessor`] is shut down first; accesses then
/// still reach the register file but nothing is cleaned.
#[derive(Clone)]
pub struct CoprocPort {
    shared: Arc<Shared>,
}

impl fmt::Debug for CoprocPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoprocPort").finish_non_exhaustive()
    }
}

impl RegisterPort for CoprocPort {
    fn read_register(&self, offset: u64, buf: &mut [u8]) -> usize {
        self.shared.read_register(offset, buf)
    }

    fn write_register(&self, offset: u64, data: &[u8]) -> usize {
        self.shared.write_register(offset, data)
    }

    fn signal_doorbell(&self) {
        self.shared.signal_doorbell()
    }
}
