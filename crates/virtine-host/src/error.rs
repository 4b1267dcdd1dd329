use core::fmt;

use thiserror::Error;
use virtine_coproc::{CoprocError, MemoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MuxError {
    #[error("invalid command request 0x{request:08x}")]
    InvalidCommand { request: u32 },

    #[error("request 0x{request:08x} takes {expected} argument(s)")]
    MissingArgument { request: u32, expected: usize },

    #[error("virtine address 0 is reserved")]
    ZeroAddress,

    #[error("ready queue is full")]
    QueueFull,
}

/// One acquisition step of attaching a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachStage {
    EnableDevice,
    RequestRegion,
    MapRegisters,
    AllocateIrq,
}

impl AttachStage {
    /// Acquisition order; release runs in reverse.
    pub const ORDER: [AttachStage; 4] = [
        AttachStage::EnableDevice,
        AttachStage::RequestRegion,
        AttachStage::MapRegisters,
        AttachStage::AllocateIrq,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AttachStage::EnableDevice => "enable device",
            AttachStage::RequestRegion => "request register region",
            AttachStage::MapRegisters => "map registers",
            AttachStage::AllocateIrq => "allocate interrupt",
        }
    }
}

impl fmt::Display for AttachStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{stage} failed (injected fault)")]
    Injected { stage: AttachStage },

    #[error("no interrupt path: registers are not mapped")]
    IrqUnavailable,

    #[error(transparent)]
    Coproc(#[from] CoprocError),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

#[derive(Debug, Error)]
#[error("failed to {stage}")]
pub struct AttachError {
    pub stage: AttachStage,
    #[source]
    pub source: PlatformError,
}

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("a listener is already registered")]
    AlreadyListening,

    #[error("the notification receiver was taken")]
    NoReceiver,

    #[error("failed to spawn notification listener thread")]
    Spawn(#[source] std::io::Error),
}
