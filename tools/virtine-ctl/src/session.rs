//! Simulated offload sessions against an in-process device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use serde::Serialize;
use virtine_coproc::regs::MAX_VIRTINES;
use virtine_coproc::{CoprocConfig, SharedMemory, VirtineMemory};
use virtine_host::{AttachedDevice, Command, SimulatedPlatform};

const PAGE: u64 = 0x1000;
const DIRTY_BYTE: u8 = 0xdb;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub virtines: u64,
    pub snapshot_size: u64,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub virtines: u64,
    pub batch_factor: u64,
    pub snapshot_size: u64,
    pub rounds: u64,
    pub reclaimed: u64,
    pub notifications: u64,
    pub notifications_delivered: u64,
    pub notifications_coalesced: u64,
    pub copy_failures: u64,
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct ProbeSummary {
    pub max_virtines: u64,
    pub batch_factor: u64,
    pub rq_tail: u64,
    pub cq_tail: u64,
    pub doorbell: bool,
    pub is_processing: bool,
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

fn snapshot_pattern(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ 0xa5).collect()
}

/// Memory layout: the snapshot at 0, then one page-aligned slot per virtine.
struct Layout {
    stride: u64,
    base: u64,
}

impl Layout {
    fn new(config: &CoprocConfig, opts: &RunOptions) -> anyhow::Result<Self> {
        let stride = align_up(opts.snapshot_size.max(1), PAGE);
        let base = stride;
        let needed = opts
            .virtines
            .checked_mul(stride)
            .and_then(|v| v.checked_add(base))
            .context("virtine layout overflows the address space")?;
        if needed > config.memory_size {
            bail!(
                "{} virtines of {} bytes need {needed:#x} bytes of memory; memory_size is {:#x}",
                opts.virtines,
                opts.snapshot_size,
                config.memory_size
            );
        }
        Ok(Self { stride, base })
    }

    fn virtine(&self, index: u64) -> u64 {
        self.base + index * self.stride
    }
}

fn prepare_memory(memory: &SharedMemory, layout: &Layout, opts: &RunOptions) -> anyhow::Result<()> {
    let dirty = vec![DIRTY_BYTE; opts.snapshot_size as usize];
    memory.with(|mem| {
        mem.write_from(0, &snapshot_pattern(opts.snapshot_size))?;
        for i in 0..opts.virtines {
            mem.write_from(layout.virtine(i), &dirty)?;
        }
        Ok::<_, virtine_coproc::MemoryError>(())
    })?;
    Ok(())
}

fn verify_memory(memory: &SharedMemory, layout: &Layout, opts: &RunOptions) -> bool {
    let expected = snapshot_pattern(opts.snapshot_size);
    let len = opts.snapshot_size as usize;
    memory.with(|mem| {
        (0..opts.virtines).all(|i| {
            let start = layout.virtine(i) as usize;
            mem.as_slice()[start..start + len] == expected[..]
        })
    })
}

/// Gives every virtine to the device, at most one queue's worth per round, and reclaims the
/// cleaned ones.
pub fn run(config: &CoprocConfig, opts: &RunOptions) -> anyhow::Result<RunSummary> {
    let layout = Layout::new(config, opts)?;
    let platform = SimulatedPlatform::new(config.clone()).context("failed to create platform")?;
    let memory = platform.memory();
    prepare_memory(&memory, &layout, opts).context("failed to prepare virtine memory")?;

    let mut device = AttachedDevice::attach(platform).context("failed to attach device")?;
    let delivered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&delivered);
    device
        .listen(move |notification| {
            tracing::debug!(
                sequence = notification.sequence,
                cleaned = notification.cleaned,
                "notification"
            );
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .context("failed to start notification listener")?;

    let mux = device.mux();
    mux.command(Command::SetSnapshot {
        address: 0,
        size: opts.snapshot_size,
    });

    let mut reclaimed = 0;
    let mut rounds = 0;
    let mut next = 0;
    while next < opts.virtines {
        let round_end = (next + MAX_VIRTINES as u64).min(opts.virtines);
        for i in next..round_end {
            mux.submit_virtine(layout.virtine(i))
                .with_context(|| format!("failed to submit virtine {i}"))?;
        }
        mux.ring_doorbell();

        let deadline = Instant::now() + opts.timeout;
        let mut pending = round_end - next;
        while pending > 0 {
            match mux.reclaim_virtine() {
                Some(_) => {
                    pending -= 1;
                    reclaimed += 1;
                }
                None if Instant::now() >= deadline => {
                    bail!("timed out waiting for {pending} virtine(s) in round {rounds}");
                }
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        tracing::info!(round = rounds, cleaned = round_end - next, "round complete");
        rounds += 1;
        next = round_end;
    }

    device.unlisten();
    let drained = device.take_irq().map_or(0, |irq| irq.drain().len() as u64);
    let stats = device
        .platform()
        .device()
        .map(|dev| dev.status().stats)
        .unwrap_or_default();
    let verified = verify_memory(&memory, &layout, opts);
    device.detach();

    Ok(RunSummary {
        virtines: opts.virtines,
        batch_factor: config.batch_factor,
        snapshot_size: opts.snapshot_size,
        rounds,
        reclaimed,
        notifications: stats.notifications,
        notifications_delivered: delivered.load(Ordering::Relaxed) + drained,
        notifications_coalesced: stats.notifications_coalesced,
        copy_failures: stats.copy_failures,
        verified,
    })
}

/// Reads the device's identity registers, the way a host checks a freshly attached device.
pub fn probe(config: &CoprocConfig) -> anyhow::Result<ProbeSummary> {
    let platform = SimulatedPlatform::new(config.clone()).context("failed to create platform")?;
    let device = AttachedDevice::attach(platform).context("failed to attach device")?;
    let mux = device.mux();
    let max_virtines = mux.command(Command::GetMaxNumVirtines);
    let status = mux.status();
    Ok(ProbeSummary {
        max_virtines,
        batch_factor: status.batch_factor,
        rq_tail: status.rq_tail,
        cq_tail: status.cq_tail,
        doorbell: status.doorbell,
        is_processing: status.is_processing,
    })
}
