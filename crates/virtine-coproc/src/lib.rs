//! Software model of the virtine-cleaning coprocessor.
//!
//! The host submits dirty virtine addresses through a register window ([`regs`]), rings a
//! doorbell, and later reclaims clean virtines from the Complete Queue. A dedicated worker thread
//! copies the configured snapshot over each submitted virtine and raises a notification ([`irq`])
//! every `BATCH_FACTOR` virtines.
//!
//! [`DeviceState`] is the lock-free core and can be driven synchronously (see
//! [`DeviceState::process_ready_queue`]); [`VirtineCoprocessor`] wraps it in a mutex and owns the
//! worker thread.

#![forbid(unsafe_code)]

mod bridge;
pub mod config;
mod device;
pub mod error;
pub mod irq;
pub mod memory;
mod port;
pub mod regs;
mod state;
mod worker;

pub use bridge::UNKNOWN_REGISTER_READ;
pub use config::CoprocConfig;
pub use device::{CoprocPort, VirtineCoprocessor};
pub use error::CoprocError;
pub use irq::{Notification, NotificationReceiver, Notifier};
pub use memory::{DenseMemory, MemoryError, SharedMemory, VirtineMemory};
pub use port::RegisterPort;
pub use state::{
    CleanStep, DeviceState, DeviceStats, DeviceStatus, ProcessingReport, ProcessingState,
    Snapshot, VirtineAddr, VirtineQueue,
};
