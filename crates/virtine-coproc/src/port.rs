use std::sync::Arc;

/// Primitive register-level operations a host drives the coprocessor through.
///
/// Offsets are byte offsets into the register window (see [`crate::regs`]). Both transfer
/// methods return the number of bytes moved; misaligned accesses move zero bytes.
pub trait RegisterPort: Send + Sync {
    fn read_register(&self, offset: u64, buf: &mut [u8]) -> usize;

    fn write_register(&self, offset: u64, data: &[u8]) -> usize;

    fn signal_doorbell(&self);

    fn read_u32(&self, offset: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_register(offset, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn write_u32(&self, offset: u64, value: u32) -> usize {
        self.write_register(offset, &value.to_le_bytes())
    }
}

impl<P: RegisterPort + ?Sized> RegisterPort for Arc<P> {
    fn read_register(&self, offset: u64, buf: &mut [u8]) -> usize {
        (**self).read_register(offset, buf)
    }

    fn write_register(&self, offset: u64, data: &[u8]) -> usize {
        (**self).write_register(offset, data)
    }

    fn signal_doorbell(&self) {
        (**self).signal_doorbell()
    }
}

impl<P: RegisterPort + ?Sized> RegisterPort for &P {
    fn read_register(&self, offset: u64, buf: &mut [u8]) -> usize {
        (**self).read_register(offset, buf)
    }

    fn write_register(&self, offset: u64, data: &[u8]) -> usize {
        (**self).write_register(offset, data)
    }

    fn signal_doorbell(&self) {
        (**self).signal_doorbell()
    }
}
