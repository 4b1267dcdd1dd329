//! Device attach/detach.
//!
//! Attaching acquires every [`AttachStage`] in order. If one fails, the stages already acquired
//! are released in reverse order before the error is returned, so a failed attach leaves nothing
//! behind. Detaching (explicitly or on drop) stops the listener and then releases every stage in
//! reverse order.

use virtine_coproc::{Notification, NotificationReceiver};

use crate::error::{AttachError, AttachStage, ListenError, PlatformError};
use crate::listener::Listener;
use crate::mux::Multiplexer;
use crate::platform::Platform;

pub struct AttachedDevice<P: Platform> {
    platform: P,
    mux: Multiplexer<P::Port>,
    irq: Option<NotificationReceiver>,
    listener: Option<Listener>,
    attached: bool,
}

impl<P: Platform> AttachedDevice<P> {
    pub fn attach(mut platform: P) -> Result<Self, AttachError> {
        let mut acquired = Vec::with_capacity(AttachStage::ORDER.len());
        match acquire_all(&mut platform, &mut acquired) {
            Ok((port, irq)) => {
                tracing::info!("virtine coprocessor attached");
                Ok(Self {
                    platform,
                    mux: Multiplexer::new(port),
                    irq: Some(irq),
                    listener: None,
                    attached: true,
                })
            }
            Err((stage, source)) => {
                tracing::warn!(%stage, "attach failed: {source}; rolling back");
                for &done in acquired.iter().rev() {
                    platform.release(done, None);
                }
                Err(AttachError { stage, source })
            }
        }
    }

    pub fn mux(&self) -> &Multiplexer<P::Port> {
        &self.mux
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Takes the raw notification receiver, for callers that want to poll it themselves.
    pub fn take_irq(&mut self) -> Option<NotificationReceiver> {
        self.irq.take()
    }

    /// Routes notifications to `callback` on a listener thread.
    pub fn listen<F>(&mut self, callback: F) -> Result<(), ListenError>
    where
        F: FnMut(Notification) + Send + 'static,
    {
        if self.listener.is_some() {
            return Err(ListenError::AlreadyListening);
        }
        let Some(irq) = self.irq.take() else {
            return Err(ListenError::NoReceiver);
        };
        self.listener = Some(Listener::spawn(irq, callback)?);
        Ok(())
    }

    /// Stops the listener, returning the receiver to the device.
    pub fn unlisten(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.irq = listener.stop();
        }
    }

    pub fn detach(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.unlisten();
        let mut irq = self.irq.take();
        for &stage in AttachStage::ORDER.iter().rev() {
            let held = match stage {
                AttachStage::AllocateIrq => irq.take(),
                _ => None,
            };
            self.platform.release(stage, held);
        }
        tracing::info!("virtine coprocessor detached");
    }
}

/// Acquires each stage in order, recording the ones that succeeded.
fn acquire_all<P: Platform>(
    platform: &mut P,
    acquired: &mut Vec<AttachStage>,
) -> Result<(P::Port, NotificationReceiver), (AttachStage, PlatformError)> {
    platform
        .enable_device()
        .map_err(|e| (AttachStage::EnableDevice, e))?;
    acquired.push(AttachStage::EnableDevice);

    platform
        .request_region()
        .map_err(|e| (AttachStage::RequestRegion, e))?;
    acquired.push(AttachStage::RequestRegion);

    let port = platform
        .map_registers()
        .map_err(|e| (AttachStage::MapRegisters, e))?;
    acquired.push(AttachStage::MapRegisters);

    let irq = platform
        .allocate_irq()
        .map_err(|e| (AttachStage::AllocateIrq, e))?;
    Ok((port, irq))
}

impl<P: Platform> Drop for AttachedDevice<P> {
    fn drop(&mut self) {
        self.release_all();
    }
}
