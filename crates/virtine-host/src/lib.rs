//! Host side of the virtine coprocessor: the multiplexer user code talks to, notification
//! listeners, and attaching a device to a platform.

#![forbid(unsafe_code)]

mod attach;
pub mod command;
mod error;
mod listener;
mod mux;
pub mod platform;

pub use attach::AttachedDevice;
pub use command::Command;
pub use error::{AttachError, AttachStage, ListenError, MuxError, PlatformError};
pub use listener::{Listener, LISTENER_THREAD_NAME, STOP_POLL_INTERVAL};
pub use mux::{Multiplexer, RegisterStatus};
pub use platform::{EventLog, Platform, PlatformEvent, SimulatedPlatform};
