//! Device state shared between the register bridge and the processing worker.
//!
//! Everything here is mutated only while the device lock is held; see [`crate::device`].

use core::fmt;
use std::num::NonZeroU64;

use virtine_ring::RingQueue;

use crate::irq::Notifier;
use crate::memory::{MemoryError, VirtineMemory};
use crate::regs::MAX_VIRTINES;

/// Address of a virtine's memory.
///
/// Zero is not a valid virtine address: on the wire it means "queue empty".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtineAddr(NonZeroU64);

impl VirtineAddr {
    #[inline]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for VirtineAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtineAddr(0x{:x})", self.get())
    }
}

impl fmt::Display for VirtineAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.get())
    }
}

pub type VirtineQueue = RingQueue<VirtineAddr, MAX_VIRTINES>;

/// Clean-state image copied over each virtine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub address: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessingState {
    #[default]
    WaitingForDoorbell,
    Processing,
    Stopping,
    Terminated,
}

/// Lifetime counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub submitted: u64,
    pub cleaned: u64,
    pub reclaimed: u64,
    pub notifications: u64,
    pub notifications_coalesced: u64,
    pub rejected_full: u64,
    pub rejected_zero: u64,
    pub copy_failures: u64,
    pub stalls: u64,
    pub passes: u64,
}

/// Outcome of cleaning at most one virtine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanStep {
    Cleaned(VirtineAddr),
    /// The snapshot could not be copied; the virtine was dropped from the Ready Queue without
    /// being posted to the Complete Queue.
    CopyFailed(VirtineAddr),
    /// The Ready Queue is empty.
    Drained,
    /// The Complete Queue is full; Ready Queue entries stay where they are.
    Stalled,
    /// Teardown was requested.
    Stopped,
}

impl CleanStep {
    /// Whether the pass should keep going after this step.
    pub fn continues(self) -> bool {
        matches!(self, CleanStep::Cleaned(_) | CleanStep::CopyFailed(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingReport {
    pub cleaned: u64,
    pub notifications: u64,
    pub copy_failures: u64,
    pub stalled: bool,
}

/// Point-in-time copy of the observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub phase: ProcessingState,
    pub doorbell: bool,
    pub is_processing: bool,
    pub stalled: bool,
    pub ready_len: usize,
    pub complete_len: usize,
    pub batch_factor: u64,
    pub cleaned_count: u64,
    pub snapshot: Snapshot,
    pub stats: DeviceStats,
}

pub struct DeviceState {
    pub(crate) rq: VirtineQueue,
    pub(crate) cq: VirtineQueue,
    pub(crate) doorbell: bool,
    pub(crate) is_processing: bool,
    pub(crate) batch_factor: u64,
    pub(crate) cleaned_count: u64,
    pub(crate) snapshot: Snapshot,
    pub(crate) stopping: bool,
    pub(crate) stalled: bool,
    pub(crate) phase: ProcessingState,

    // Split-write staging and the CQ_HEAD read latch.
    pub(crate) staged_rq_tail: Option<u32>,
    pub(crate) staged_snapshot_addr: Option<u32>,
    pub(crate) cq_head_latch: Option<u64>,

    pub(crate) stats: DeviceStats,
    memory: Box<dyn VirtineMemory>,
    /// Released when the worker terminates, which closes the host's channel.
    notifier: Option<Notifier>,
}

impl DeviceState {
    pub fn new(memory: Box<dyn VirtineMemory>, notifier: Notifier, batch_factor: u64) -> Self {
        Self {
            rq: VirtineQueue::new(),
            cq: VirtineQueue::new(),
            doorbell: false,
            is_processing: false,
            batch_factor,
            cleaned_count: 0,
            snapshot: Snapshot::default(),
            stopping: false,
            stalled: false,
            phase: ProcessingState::WaitingForDoorbell,
            staged_rq_tail: None,
            staged_snapshot_addr: None,
            cq_head_latch: None,
            stats: DeviceStats::default(),
            memory,
            notifier: Some(notifier),
        }
    }

    pub fn doorbell(&self) -> bool {
        self.doorbell
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn batch_factor(&self) -> u64 {
        self.batch_factor
    }

    pub fn cleaned_count(&self) -> u64 {
        self.cleaned_count
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn ready_queue(&self) -> &VirtineQueue {
        &self.rq
    }

    pub fn complete_queue(&self) -> &VirtineQueue {
        &self.cq
    }

    pub fn memory(&self) -> &dyn VirtineMemory {
        self.memory.as_ref()
    }

    pub fn status(&self) -> DeviceStatus {
        let mut stats = self.stats;
        if let Some(notifier) = &self.notifier {
            stats.notifications_coalesced = notifier.coalesced();
        }
        DeviceStatus {
            phase: self.phase,
            doorbell: self.doorbell,
            is_processing: self.is_processing,
            stalled: self.stalled,
            ready_len: self.rq.len(),
            complete_len: self.cq.len(),
            batch_factor: self.batch_factor,
            cleaned_count: self.cleaned_count,
            snapshot: self.snapshot,
            stats,
        }
    }

    /// Rings the doorbell.
    ///
    /// While a pass is running the ring is absorbed: the pass re-checks the Ready Queue before it
    /// ends, so it already covers anything queued before this call.
    pub fn ring_doorbell(&mut self) {
        if self.is_processing {
            tracing::trace!("doorbell rung while processing; ignored");
            return;
        }
        self.doorbell = true;
    }

    pub fn request_stop(&mut self) {
        self.stopping = true;
    }

    pub(crate) fn close_notifications(&mut self) {
        if let Some(notifier) = self.notifier.take() {
            self.stats.notifications_coalesced = notifier.coalesced();
        }
    }

    pub(crate) fn set_phase(&mut self, phase: ProcessingState) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "processing state change");
            self.phase = phase;
        }
    }

    /// Starts a processing pass: marks the device busy and consumes the doorbell.
    pub fn begin_pass(&mut self) {
        self.is_processing = true;
        self.doorbell = false;
        self.stalled = false;
        self.stats.passes += 1;
        tracing::debug!(ready = self.rq.len(), "processing pass started");
    }

    pub fn end_pass(&mut self) {
        self.is_processing = false;
        tracing::debug!(
            ready = self.rq.len(),
            complete = self.cq.len(),
            stalled = self.stalled,
            "processing pass finished"
        );
    }

    /// Cleans the virtine at the head of the Ready Queue, if there is one and the Complete Queue
    /// has room for it.
    pub fn clean_next(&mut self) -> CleanStep {
        if self.stopping {
            return CleanStep::Stopped;
        }
        if self.cq.is_full() {
            if self.rq.is_empty() {
                return CleanStep::Drained;
            }
            if !self.stalled {
                self.stalled = true;
                self.stats.stalls += 1;
                tracing::debug!(ready = self.rq.len(), "complete queue full; stalling");
            }
            return CleanStep::Stalled;
        }
        let Some(addr) = self.rq.pop_head() else {
            return CleanStep::Drained;
        };

        if let Err(err) = self.restore_snapshot(addr) {
            self.stats.copy_failures += 1;
            tracing::warn!(virtine = %addr, "failed to restore snapshot: {err}");
            return CleanStep::CopyFailed(addr);
        }

        self.cleaned_count += 1;
        self.stats.cleaned += 1;
        if let Err(full) = self.cq.insert_tail(addr) {
            // Unreachable while capacity is checked above under the same lock.
            tracing::warn!(virtine = %addr, "{full}; cleaned virtine lost");
        }

        if self.cleaned_count >= self.batch_factor.max(1) {
            self.raise_notification();
        }
        CleanStep::Cleaned(addr)
    }

    /// Runs a whole pass synchronously: begin, clean until the Ready Queue is drained (or the
    /// device stalls or stops), end.
    pub fn process_ready_queue(&mut self) -> ProcessingReport {
        let mut report = ProcessingReport::default();
        let notifications_before = self.stats.notifications;

        self.begin_pass();
        loop {
            let step = self.clean_next();
            match step {
                CleanStep::Cleaned(_) => report.cleaned += 1,
                CleanStep::CopyFailed(_) => report.copy_failures += 1,
                CleanStep::Stalled => report.stalled = true,
                CleanStep::Drained | CleanStep::Stopped => {}
            }
            if !step.continues() {
                break;
            }
        }
        self.end_pass();

        report.notifications = self.stats.notifications - notifications_before;
        report
    }

    fn restore_snapshot(&mut self, addr: VirtineAddr) -> Result<(), MemoryError> {
        let Snapshot { address, size } = self.snapshot;
        self.memory.copy_range(address, addr.get(), size)
    }

    fn raise_notification(&mut self) {
        let cleaned = self.cleaned_count;
        self.cleaned_count = 0;
        self.stats.notifications += 1;
        if let Some(notifier) = self.notifier.as_mut() {
            notifier.raise(cleaned);
        }
        tracing::debug!(cleaned, "batch complete; host notified");
    }

    /// Appends a raw address to the Ready Queue. Zero and full-queue submissions are dropped.
    pub(crate) fn enqueue_ready(&mut self, raw: u64) {
        let Some(addr) = VirtineAddr::new(raw) else {
            self.stats.rejected_zero += 1;
            tracing::warn!("rejected zero virtine address");
            return;
        };
        match self.rq.insert_tail(addr) {
            Ok(_) => {
                self.stats.submitted += 1;
                tracing::trace!(virtine = %addr, "virtine queued for cleaning");
            }
            Err(full) => {
                self.stats.rejected_full += 1;
                tracing::debug!(virtine = %addr, "{full}; submission dropped");
            }
        }
    }

    /// Pops the Complete Queue; `0` when empty. Releases a stalled worker.
    pub(crate) fn dequeue_complete(&mut self) -> u64 {
        let Some(addr) = self.cq.pop_head() else {
            return 0;
        };
        self.stats.reclaimed += 1;
        if self.stalled {
            self.stalled = false;
            self.doorbell = true;
            tracing::debug!("complete queue drained below capacity; resuming");
        }
        addr.get()
    }
}

impl fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceState")
            .field("status", &self.status())
            .field("staged_rq_tail", &self.staged_rq_tail)
            .field("staged_snapshot_addr", &self.staged_snapshot_addr)
            .field("cq_head_latch", &self.cq_head_latch)
            .finish_non_exhaustive()
    }
}
