//! Register window layout.
//!
//! The window is a flat sequence of fields; each field's offset is the running sum of the widths
//! before it. Everything is little-endian and accessed over a 32-bit bus: an 8-byte register is a
//! low word at `offset` and a high word at `offset + 4`, and may also be accessed with a single
//! 8-byte access at `offset`.
//!
//! ```text
//! 0x000 RQ_HEAD        8   R
//! 0x008 RQ_TAIL        8   RW  (write = split enqueue)
//! 0x010 DOORBELL       4   RW
//! 0x014 IS_PROCESSING  4   R
//! 0x018 CQ_HEAD        8   R   (read = split dequeue)
//! 0x020 CQ_TAIL        8   R
//! 0x028 BATCH_FACTOR   8   RW
//! 0x030 MAX_VIRTINES   8   R
//! 0x038 SNAPSHOT_SIZE  8   RW
//! 0x040 SNAPSHOT_ADDR  8   RW  (write = staged split write)
//! 0x048 RQ_RING      800   R   (100 x u64 slots)
//! 0x368 CQ_RING      800   R   (100 x u64 slots)
//! ```

use bitflags::bitflags;

/// Capacity of both the Ready Queue and the Complete Queue.
pub const MAX_VIRTINES: usize = 100;

/// Width of one ring slot as seen through the register window.
pub const SLOT_WIDTH: u64 = 8;

/// Size of the register window (page-rounded).
pub const WINDOW_SIZE: u64 = 0x1000;

/// Every register access must be aligned to this many bytes.
pub const ACCESS_ALIGN: u64 = 4;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct RegAccess: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Accessing the register mutates device state beyond the register itself.
        const SIDE_EFFECT = 1 << 2;
    }
}

const R: RegAccess = RegAccess::READ;
const RW: RegAccess = RegAccess::from_bits_retain(RegAccess::READ.bits() | RegAccess::WRITE.bits());
const RW_SE: RegAccess = RegAccess::from_bits_retain(RW.bits() | RegAccess::SIDE_EFFECT.bits());
const R_SE: RegAccess = RegAccess::from_bits_retain(R.bits() | RegAccess::SIDE_EFFECT.bits());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    RqHead,
    RqTail,
    Doorbell,
    IsProcessing,
    CqHead,
    CqTail,
    BatchFactor,
    MaxVirtines,
    SnapshotSize,
    SnapshotAddr,
    RqRing,
    CqRing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub register: Register,
    pub name: &'static str,
    pub offset: u64,
    pub width: u64,
    pub access: RegAccess,
}

impl RegisterInfo {
    #[inline]
    pub const fn end(&self) -> u64 {
        self.offset + self.width
    }

    /// Ring regions are arrays of slots rather than a single scalar.
    #[inline]
    pub const fn is_ring(&self) -> bool {
        matches!(self.register, Register::RqRing | Register::CqRing)
    }
}

const RING_WIDTH: u64 = SLOT_WIDTH * MAX_VIRTINES as u64;

// Order matters: offsets are derived from it.
const FIELDS: [(Register, &str, u64, RegAccess); REGISTER_COUNT] = [
    (Register::RqHead, "RQ_HEAD", 8, R),
    (Register::RqTail, "RQ_TAIL", 8, RW_SE),
    (Register::Doorbell, "DOORBELL", 4, RW_SE),
    (Register::IsProcessing, "IS_PROCESSING", 4, R),
    (Register::CqHead, "CQ_HEAD", 8, R_SE),
    (Register::CqTail, "CQ_TAIL", 8, R),
    (Register::BatchFactor, "BATCH_FACTOR", 8, RW),
    (Register::MaxVirtines, "MAX_VIRTINES", 8, R),
    (Register::SnapshotSize, "SNAPSHOT_SIZE", 8, RW),
    (Register::SnapshotAddr, "SNAPSHOT_ADDR", 8, RW),
    (Register::RqRing, "RQ_RING", RING_WIDTH, R),
    (Register::CqRing, "CQ_RING", RING_WIDTH, R),
];

pub const REGISTER_COUNT: usize = 12;

const TABLE: [RegisterInfo; REGISTER_COUNT] = build_table();

/// The register table in window order.
pub static REGISTERS: [RegisterInfo; REGISTER_COUNT] = TABLE;

const fn build_table() -> [RegisterInfo; REGISTER_COUNT] {
    let mut out = [RegisterInfo {
        register: Register::RqHead,
        name: "",
        offset: 0,
        width: 0,
        access: RegAccess::empty(),
    }; REGISTER_COUNT];

    let mut offset = 0u64;
    let mut i = 0;
    while i < REGISTER_COUNT {
        let (register, name, width, access) = FIELDS[i];
        assert!(register as usize == i, "FIELDS must follow Register declaration order");
        assert!(offset % ACCESS_ALIGN == 0);
        out[i] = RegisterInfo {
            register,
            name,
            offset,
            width,
            access,
        };
        offset += width;
        i += 1;
    }
    assert!(offset <= WINDOW_SIZE, "register layout overflows the window");
    out
}

impl Register {
    #[inline]
    pub fn info(self) -> &'static RegisterInfo {
        &REGISTERS[self as usize]
    }

    #[inline]
    pub const fn offset(self) -> u64 {
        TABLE[self as usize].offset
    }

    #[inline]
    pub const fn width(self) -> u64 {
        TABLE[self as usize].width
    }

    pub const fn name(self) -> &'static str {
        TABLE[self as usize].name
    }
}

pub const RQ_HEAD: u64 = Register::RqHead.offset();
pub const RQ_TAIL: u64 = Register::RqTail.offset();
pub const DOORBELL: u64 = Register::Doorbell.offset();
pub const IS_PROCESSING: u64 = Register::IsProcessing.offset();
pub const CQ_HEAD: u64 = Register::CqHead.offset();
pub const CQ_TAIL: u64 = Register::CqTail.offset();
pub const BATCH_FACTOR: u64 = Register::BatchFactor.offset();
pub const MAX_VIRTINES_REG: u64 = Register::MaxVirtines.offset();
pub const SNAPSHOT_SIZE: u64 = Register::SnapshotSize.offset();
pub const SNAPSHOT_ADDR: u64 = Register::SnapshotAddr.offset();
pub const RQ_RING: u64 = Register::RqRing.offset();
pub const CQ_RING: u64 = Register::CqRing.offset();

/// Which part of a register an access touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// The whole register (4-byte access to a 4-byte register, 8-byte access to an 8-byte one).
    Full,
    /// Bits 0..32 of an 8-byte register.
    Low,
    /// Bits 32..64 of an 8-byte register.
    High,
}

impl Part {
    /// Selects this part out of a 64-bit register value.
    #[inline]
    pub fn extract(self, value: u64) -> u64 {
        match self {
            Part::Full => value,
            Part::Low => value & 0xffff_ffff,
            Part::High => value >> 32,
        }
    }

    /// Replaces this part of `current` with `value`.
    #[inline]
    pub fn merge(self, current: u64, value: u64) -> u64 {
        match self {
            Part::Full => value,
            Part::Low => (current & !0xffff_ffff) | (value & 0xffff_ffff),
            Part::High => (current & 0xffff_ffff) | (value << 32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    Ready,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Misaligned or zero-length access: nothing is transferred.
    Dropped,
    /// No register matches the offset/size combination.
    Unknown,
    Register { register: Register, part: Part },
    Slot { ring: Ring, index: usize, part: Part },
}

/// Resolves an `(offset, len)` access against the register table.
pub fn decode(offset: u64, len: usize) -> Decoded {
    if len == 0 || offset % ACCESS_ALIGN != 0 {
        return Decoded::Dropped;
    }

    let Some(info) = REGISTERS
        .iter()
        .find(|info| offset >= info.offset && offset < info.end())
    else {
        return Decoded::Unknown;
    };

    let rel = offset - info.offset;
    if info.is_ring() {
        let index = (rel / SLOT_WIDTH) as usize;
        let Some(part) = part_for(SLOT_WIDTH, rel % SLOT_WIDTH, len) else {
            return Decoded::Unknown;
        };
        let ring = match info.register {
            Register::RqRing => Ring::Ready,
            _ => Ring::Complete,
        };
        return Decoded::Slot { ring, index, part };
    }

    match part_for(info.width, rel, len) {
        Some(part) => Decoded::Register {
            register: info.register,
            part,
        },
        None => Decoded::Unknown,
    }
}

fn part_for(width: u64, rel: u64, len: usize) -> Option<Part> {
    match (width, rel, len) {
        (4, 0, 4) => Some(Part::Full),
        (8, 0, 8) => Some(Part::Full),
        (8, 0, 4) => Some(Part::Low),
        (8, 4, 4) => Some(Part::High),
        _ => None,
    }
}
