//! Resources a device needs from its host platform, acquired in [`AttachStage::ORDER`].

use std::sync::{Arc, Mutex, PoisonError};

use virtine_coproc::{
    CoprocConfig, CoprocPort, NotificationReceiver, RegisterPort, SharedMemory, VirtineCoprocessor,
};

use crate::error::{AttachStage, PlatformError};

pub trait Platform {
    type Port: RegisterPort;

    fn enable_device(&mut self) -> Result<(), PlatformError>;
    fn disable_device(&mut self);

    fn request_region(&mut self) -> Result<(), PlatformError>;
    fn release_region(&mut self);

    fn map_registers(&mut self) -> Result<Self::Port, PlatformError>;
    /// Tears down the register mapping. Any device-side worker must have exited when this returns.
    fn unmap_registers(&mut self);

    fn allocate_irq(&mut self) -> Result<NotificationReceiver, PlatformError>;
    fn free_irq(&mut self, irq: Option<NotificationReceiver>);

    /// Releases the resource acquired at `stage`.
    fn release(&mut self, stage: AttachStage, irq: Option<NotificationReceiver>) {
        match stage {
            AttachStage::EnableDevice => self.disable_device(),
            AttachStage::RequestRegion => self.release_region(),
            AttachStage::MapRegisters => self.unmap_registers(),
            AttachStage::AllocateIrq => self.free_irq(irq),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    Acquired(AttachStage),
    Failed(AttachStage),
    Released(AttachStage),
}

/// Shared record of what a [`SimulatedPlatform`] did, readable after the platform is consumed.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<PlatformEvent>>>,
}

impl EventLog {
    fn push(&self, event: PlatformEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// In-process platform hosting a [`VirtineCoprocessor`] over [`SharedMemory`].
pub struct SimulatedPlatform {
    config: CoprocConfig,
    memory: SharedMemory,
    fail_at: Option<AttachStage>,
    device: Option<VirtineCoprocessor>,
    irq: Option<NotificationReceiver>,
    log: EventLog,
}

impl SimulatedPlatform {
    pub fn new(config: CoprocConfig) -> Result<Self, PlatformError> {
        config.validate()?;
        let memory = SharedMemory::new(config.memory_size)?;
        Ok(Self {
            config,
            memory,
            fail_at: None,
            device: None,
            irq: None,
            log: EventLog::default(),
        })
    }

    /// Makes the given acquisition step fail.
    pub fn fail_at(mut self, stage: AttachStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Host-side handle to the memory the device cleans.
    pub fn memory(&self) -> SharedMemory {
        self.memory.clone()
    }

    pub fn event_log(&self) -> EventLog {
        self.log.clone()
    }

    pub fn device(&self) -> Option<&VirtineCoprocessor> {
        self.device.as_ref()
    }

    fn acquire(&self, stage: AttachStage) -> Result<(), PlatformError> {
        if self.fail_at == Some(stage) {
            self.log.push(PlatformEvent::Failed(stage));
            return Err(PlatformError::Injected { stage });
        }
        Ok(())
    }

    fn acquired(&self, stage: AttachStage) {
        tracing::debug!(%stage, "acquired");
        self.log.push(PlatformEvent::Acquired(stage));
    }

    fn released(&self, stage: AttachStage) {
        tracing::debug!(%stage, "released");
        self.log.push(PlatformEvent::Released(stage));
    }
}

impl Platform for SimulatedPlatform {
    type Port = CoprocPort;

    fn enable_device(&mut self) -> Result<(), PlatformError> {
        self.acquire(AttachStage::EnableDevice)?;
        self.acquired(AttachStage::EnableDevice);
        Ok(())
    }

    fn disable_device(&mut self) {
        self.released(AttachStage::EnableDevice);
    }

    fn request_region(&mut self) -> Result<(), PlatformError> {
        self.acquire(AttachStage::RequestRegion)?;
        self.acquired(AttachStage::RequestRegion);
        Ok(())
    }

    fn release_region(&mut self) {
        self.released(AttachStage::RequestRegion);
    }

    fn map_registers(&mut self) -> Result<CoprocPort, PlatformError> {
        self.acquire(AttachStage::MapRegisters)?;
        let (device, irq) = VirtineCoprocessor::spawn(&self.config, self.memory.clone())?;
        let port = device.port();
        self.device = Some(device);
        self.irq = Some(irq);
        self.acquired(AttachStage::MapRegisters);
        Ok(port)
    }

    fn unmap_registers(&mut self) {
        if let Some(device) = self.device.take() {
            device.shutdown();
        }
        self.irq = None;
        self.released(AttachStage::MapRegisters);
    }

    fn allocate_irq(&mut self) -> Result<NotificationReceiver, PlatformError> {
        self.acquire(AttachStage::AllocateIrq)?;
        let irq = self.irq.take().ok_or(PlatformError::IrqUnavailable)?;
        self.acquired(AttachStage::AllocateIrq);
        Ok(irq)
    }

    fn free_irq(&mut self, irq: Option<NotificationReceiver>) {
        drop(irq);
        self.released(AttachStage::AllocateIrq);
    }
}
