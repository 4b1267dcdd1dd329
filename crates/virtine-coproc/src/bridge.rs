//! Register bridge: decodes accesses to the register window and applies them to [`DeviceState`].
//!
//! Accesses are little-endian, 4 or 8 bytes wide and 4-byte aligned:
//! - misaligned or zero-length accesses transfer nothing (return 0) and change nothing;
//! - accesses that match no register are accepted but ignored on write and read back as
//!   all-ones;
//! - 8-byte registers can be accessed as two 32-bit halves or as one 64-bit access.
//!
//! Two registers have split-word protocols that both sides must follow exactly:
//!
//! - `RQ_TAIL` writes: the low word is staged; the high write combines `high << 32 | low` and
//!   enqueues it. A 64-bit write enqueues directly.
//! - `CQ_HEAD` reads: reading the low word pops the Complete Queue (0 if empty), latches the
//!   popped value and returns its low half; reading the high word returns the latched high half
//!   and clears the latch. Reading the low word again before the high word returns the same
//!   latched value instead of popping again. A 64-bit read pops and returns the whole value.
//!
//! The staging registers are per device, not per writer: two writers interleaving halves of the
//! same register corrupt each other. Callers must issue each pair back-to-back.

use crate::regs::{self, Decoded, Part, Register, Ring};
use crate::state::{DeviceState, VirtineQueue};

/// Value returned for reads of unknown registers.
pub const UNKNOWN_REGISTER_READ: u64 = u64::MAX;

impl DeviceState {
    /// Reads `buf.len()` bytes at `offset`; returns the number of bytes transferred.
    pub fn read_register(&mut self, offset: u64, buf: &mut [u8]) -> usize {
        let value = match regs::decode(offset, buf.len()) {
            Decoded::Dropped => {
                tracing::trace!(offset, len = buf.len(), "dropped register read");
                return 0;
            }
            Decoded::Unknown => {
                tracing::trace!(offset, len = buf.len(), "read of unknown register");
                buf.fill(0xff);
                return buf.len();
            }
            Decoded::Register { register, part } => self.read_field(register, part),
            Decoded::Slot { ring, index, part } => {
                let slot = self.ring(ring).slot(index).map_or(0, |addr| addr.get());
                part.extract(slot)
            }
        };

        let len = buf.len();
        buf.copy_from_slice(&value.to_le_bytes()[..len]);
        len
    }

    /// Writes `data` at `offset`; returns the number of bytes transferred.
    pub fn write_register(&mut self, offset: u64, data: &[u8]) -> usize {
        let decoded = regs::decode(offset, data.len());
        let value = match (decoded, data.len()) {
            (Decoded::Dropped, _) => {
                tracing::trace!(offset, len = data.len(), "dropped register write");
                return 0;
            }
            (Decoded::Unknown, len) => {
                tracing::trace!(offset, len, "write to unknown register ignored");
                return len;
            }
            (_, 4) => u64::from(u32::from_le_bytes([data[0], data[1], data[2], data[3]])),
            (_, _) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(data);
                u64::from_le_bytes(raw)
            }
        };

        match decoded {
            Decoded::Register { register, part } => self.write_field(register, part, value),
            Decoded::Slot { ring, index, .. } => {
                tracing::trace!(?ring, index, "ring memory is not writable; write rejected");
            }
            Decoded::Dropped | Decoded::Unknown => {}
        }
        data.len()
    }

    /// Reads a register (or register half) as an integer.
    pub fn mmio_read(&mut self, offset: u64, size: usize) -> u64 {
        let mut buf = [0u8; 8];
        let size = size.min(8);
        self.read_register(offset, &mut buf[..size]);
        u64::from_le_bytes(buf)
    }

    /// Writes the low `size` bytes of `value` to a register (or register half).
    pub fn mmio_write(&mut self, offset: u64, size: usize, value: u64) -> usize {
        let size = size.min(8);
        self.write_register(offset, &value.to_le_bytes()[..size])
    }

    fn ring(&self, ring: Ring) -> &VirtineQueue {
        match ring {
            Ring::Ready => &self.rq,
            Ring::Complete => &self.cq,
        }
    }

    fn read_field(&mut self, register: Register, part: Part) -> u64 {
        match register {
            Register::RqHead => part.extract(self.rq.head() as u64),
            Register::RqTail => part.extract(self.rq.tail() as u64),
            Register::Doorbell => u64::from(self.doorbell),
            Register::IsProcessing => u64::from(self.is_processing),
            Register::CqHead => self.read_cq_head(part),
            Register::CqTail => part.extract(self.cq.tail() as u64),
            Register::BatchFactor => part.extract(self.batch_factor),
            Register::MaxVirtines => part.extract(regs::MAX_VIRTINES as u64),
            Register::SnapshotSize => part.extract(self.snapshot.size),
            Register::SnapshotAddr => part.extract(self.snapshot.address),
            // Ring regions decode to `Decoded::Slot`.
            Register::RqRing | Register::CqRing => 0,
        }
    }

    fn read_cq_head(&mut self, part: Part) -> u64 {
        match part {
            Part::Full => match self.cq_head_latch.take() {
                Some(latched) => latched,
                None => self.dequeue_complete(),
            },
            Part::Low => {
                let latched = match self.cq_head_latch {
                    Some(latched) => latched,
                    None => {
                        let popped = self.dequeue_complete();
                        self.cq_head_latch = Some(popped);
                        popped
                    }
                };
                Part::Low.extract(latched)
            }
            Part::High => match self.cq_head_latch.take() {
                Some(latched) => Part::High.extract(latched),
                None => {
                    tracing::trace!("CQ_HEAD high word read without a preceding low read");
                    0
                }
            },
        }
    }

    fn write_field(&mut self, register: Register, part: Part, value: u64) {
        match register {
            Register::RqTail => match part {
                Part::Full => self.enqueue_ready(value),
                Part::Low => self.staged_rq_tail = Some(value as u32),
                Part::High => {
                    let low = self.staged_rq_tail.take().unwrap_or(0);
                    self.enqueue_ready((value << 32) | u64::from(low));
                }
            },
            Register::Doorbell => {
                tracing::debug!("doorbell rung");
                self.ring_doorbell();
            }
            Register::BatchFactor => {
                self.batch_factor = part.merge(self.batch_factor, value);
                tracing::debug!(batch_factor = self.batch_factor, "batch factor updated");
            }
            Register::SnapshotSize => {
                self.snapshot.size = part.merge(self.snapshot.size, value);
            }
            Register::SnapshotAddr => match part {
                Part::Full => self.snapshot.address = value,
                Part::Low => self.staged_snapshot_addr = Some(value as u32),
                Part::High => {
                    let low = self.staged_snapshot_addr.take().unwrap_or(0);
                    self.snapshot.address = (value << 32) | u64::from(low);
                    tracing::debug!(
                        address = self.snapshot.address,
                        size = self.snapshot.size,
                        "snapshot updated"
                    );
                }
            },
            Register::RqHead
            | Register::IsProcessing
            | Register::CqHead
            | Register::CqTail
            | Register::MaxVirtines
            | Register::RqRing
            | Register::CqRing => {
                tracing::trace!(register = register.name(), "write to read-only register ignored");
            }
        }
    }
}
