//! Host-facing multiplexer: turns byte-range transfers and discrete commands into register
//! accesses on a [`RegisterPort`].
//!
//! The split-word protocols (RQ_TAIL enqueue, CQ_HEAD dequeue, SNAPSHOT_ADDR) are only safe when
//! each pair of 32-bit accesses is issued back-to-back. Every operation here that issues more
//! than one access holds the multiplexer's pair lock for its duration, so callers sharing one
//! multiplexer cannot interleave halves.

use std::sync::{Mutex, MutexGuard, PoisonError};

use virtine_coproc::regs::{self, ACCESS_ALIGN, WINDOW_SIZE};
use virtine_coproc::RegisterPort;

use crate::command::Command;
use crate::error::MuxError;

/// Snapshot of the side-effect-free registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterStatus {
    pub rq_head: u64,
    pub rq_tail: u64,
    pub doorbell: bool,
    pub is_processing: bool,
    pub cq_tail: u64,
    pub batch_factor: u64,
    pub max_virtines: u64,
    pub snapshot_size: u64,
    pub snapshot_addr: u64,
}

pub struct Multiplexer<P> {
    port: P,
    pair_lock: Mutex<()>,
}

impl<P: RegisterPort> Multiplexer<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            pair_lock: Mutex::new(()),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }

    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.pair_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads `buf.len()` bytes starting at `offset` as a sequence of 32-bit register reads.
    ///
    /// Returns the number of bytes transferred: 0 for a misaligned offset, and never more than
    /// the whole 4-byte words that fit in both `buf` and the register window.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Some(len) = transfer_len(offset, buf.len()) else {
            tracing::trace!(offset, len = buf.len(), "rejected register-window read");
            return 0;
        };
        let _pair = self.serialize();
        let mut done = 0;
        for word in buf[..len].chunks_exact_mut(ACCESS_ALIGN as usize) {
            if self.port.read_register(offset + done as u64, word) != word.len() {
                break;
            }
            done += word.len();
        }
        done
    }

    /// Writes `data` starting at `offset` as a sequence of 32-bit register writes.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> usize {
        let Some(len) = transfer_len(offset, data.len()) else {
            tracing::trace!(offset, len = data.len(), "rejected register-window write");
            return 0;
        };
        let _pair = self.serialize();
        let mut done = 0;
        for word in data[..len].chunks_exact(ACCESS_ALIGN as usize) {
            if self.port.write_register(offset + done as u64, word) != word.len() {
                break;
            }
            done += word.len();
        }
        done
    }

    pub fn command(&self, command: Command) -> u64 {
        tracing::debug!(?command, "command");
        match command {
            Command::ModifyBatchFactor(value) => {
                self.write_whole(regs::BATCH_FACTOR, value);
                0
            }
            Command::GetMaxNumVirtines => {
                let _pair = self.serialize();
                self.read_split(regs::MAX_VIRTINES_REG)
            }
            Command::RingDoorbell => {
                self.port.signal_doorbell();
                0
            }
            Command::SetSnapshot { address, size } => {
                let _pair = self.serialize();
                self.write_whole(regs::SNAPSHOT_SIZE, size);
                self.write_split(regs::SNAPSHOT_ADDR, address);
                0
            }
        }
    }

    /// Request-number entry point; unknown requests are rejected without touching the device.
    pub fn ioctl(&self, request: u32, args: &[u64]) -> Result<u64, MuxError> {
        let command = Command::from_request(request, args).map_err(|err| {
            tracing::debug!(request, "{err}");
            err
        })?;
        Ok(self.command(command))
    }

    /// Queues a dirty virtine for cleaning.
    ///
    /// A full Ready Queue is detected by the tail index not moving.
    pub fn submit_virtine(&self, addr: u64) -> Result<(), MuxError> {
        if addr == 0 {
            return Err(MuxError::ZeroAddress);
        }
        let _pair = self.serialize();
        let before = self.read_u64(regs::RQ_TAIL);
        self.write_split(regs::RQ_TAIL, addr);
        if self.read_u64(regs::RQ_TAIL) == before {
            tracing::debug!(addr, "ready queue full; virtine not submitted");
            return Err(MuxError::QueueFull);
        }
        Ok(())
    }

    /// Takes one clean virtine off the Complete Queue.
    pub fn reclaim_virtine(&self) -> Option<u64> {
        let _pair = self.serialize();
        match self.read_split(regs::CQ_HEAD) {
            0 => None,
            addr => Some(addr),
        }
    }

    pub fn ring_doorbell(&self) {
        self.command(Command::RingDoorbell);
    }

    pub fn status(&self) -> RegisterStatus {
        RegisterStatus {
            rq_head: self.read_u64(regs::RQ_HEAD),
            rq_tail: self.read_u64(regs::RQ_TAIL),
            doorbell: self.port.read_u32(regs::DOORBELL) != 0,
            is_processing: self.port.read_u32(regs::IS_PROCESSING) != 0,
            cq_tail: self.read_u64(regs::CQ_TAIL),
            batch_factor: self.read_u64(regs::BATCH_FACTOR),
            max_virtines: self.read_u64(regs::MAX_VIRTINES_REG),
            snapshot_size: self.read_u64(regs::SNAPSHOT_SIZE),
            snapshot_addr: self.read_u64(regs::SNAPSHOT_ADDR),
        }
    }

    /// One 8-byte access, for registers whose halves take effect as they are written.
    fn write_whole(&self, offset: u64, value: u64) {
        self.port.write_register(offset, &value.to_le_bytes());
    }

    fn write_split(&self, offset: u64, value: u64) {
        self.port.write_u32(offset, value as u32);
        self.port.write_u32(offset + 4, (value >> 32) as u32);
    }

    fn read_split(&self, offset: u64) -> u64 {
        let low = u64::from(self.port.read_u32(offset));
        let high = u64::from(self.port.read_u32(offset + 4));
        (high << 32) | low
    }

    fn read_u64(&self, offset: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.port.read_register(offset, &mut buf);
        u64::from_le_bytes(buf)
    }
}

/// Length of a window transfer, or `None` when nothing may be transferred.
fn transfer_len(offset: u64, requested: usize) -> Option<usize> {
    if offset % ACCESS_ALIGN != 0 || offset >= WINDOW_SIZE {
        return None;
    }
    let room = (WINDOW_SIZE - offset) as usize;
    let len = requested.min(room);
    Some(len - len % ACCESS_ALIGN as usize)
}
