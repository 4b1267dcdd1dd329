//! Discrete commands a host issues besides raw register reads and writes.
//!
//! Request numbers follow the Linux `_IOC` layout with type `'F'`:
//! `dir << 30 | size << 16 | type << 8 | nr`.

use crate::error::MuxError;

pub const IOC_TYPE: u32 = b'F' as u32;

const fn ioc(dir: u32, nr: u32, size: u32) -> u32 {
    (dir << 30) | (size << 16) | (IOC_TYPE << 8) | nr
}

const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

pub const MODIFY_BATCH_FACTOR: u32 = ioc(IOC_READ, 0x30, 8);
pub const GET_MAX_NUM_VIRTINES: u32 = ioc(IOC_WRITE, 0x31, 8);
pub const RING_DOORBELL: u32 = ioc(IOC_NONE, 0x32, 0);
pub const SET_SNAPSHOT: u32 = ioc(IOC_WRITE, 0x33, 16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ModifyBatchFactor(u64),
    GetMaxNumVirtines,
    RingDoorbell,
    /// Written as SNAPSHOT_SIZE first, then SNAPSHOT_ADDR.
    SetSnapshot { address: u64, size: u64 },
}

impl Command {
    /// Builds a command from an ioctl-style request number and its arguments.
    pub fn from_request(request: u32, args: &[u64]) -> Result<Self, MuxError> {
        let arg = |i: usize| {
            args.get(i).copied().ok_or(MuxError::MissingArgument {
                request,
                expected: i + 1,
            })
        };
        match request {
            MODIFY_BATCH_FACTOR => Ok(Command::ModifyBatchFactor(arg(0)?)),
            GET_MAX_NUM_VIRTINES => Ok(Command::GetMaxNumVirtines),
            RING_DOORBELL => Ok(Command::RingDoorbell),
            SET_SNAPSHOT => Ok(Command::SetSnapshot {
                address: arg(0)?,
                size: arg(1)?,
            }),
            _ => Err(MuxError::InvalidCommand { request }),
        }
    }

    pub fn request(&self) -> u32 {
        match self {
            Command::ModifyBatchFactor(_) => MODIFY_BATCH_FACTOR,
            Command::GetMaxNumVirtines => GET_MAX_NUM_VIRTINES,
            Command::RingDoorbell => RING_DOORBELL,
            Command::SetSnapshot { .. } => SET_SNAPSHOT,
        }
    }
}
