use std::time::{Duration, Instant};

use virtine_coproc::regs::*;
use virtine_coproc::{
    CoprocConfig, CoprocError, ProcessingState, RegisterPort, SharedMemory, VirtineCoprocessor,
    VirtineMemory,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const SNAPSHOT_LEN: u64 = 0x200;

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for device");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn submit(dev: &VirtineCoprocessor, addr: u64) {
    dev.write_u32(RQ_TAIL, addr as u32);
    dev.write_u32(RQ_TAIL + 4, (addr >> 32) as u32);
}

fn reclaim(dev: &VirtineCoprocessor) -> u64 {
    let low = u64::from(dev.read_u32(CQ_HEAD));
    let high = u64::from(dev.read_u32(CQ_HEAD + 4));
    (high << 32) | low
}

fn config(batch_factor: u64) -> CoprocConfig {
    CoprocConfig {
        batch_factor,
        notification_capacity: 256,
        memory_size: 0x10_0000,
        ..CoprocConfig::default()
    }
}

fn memory_with_snapshot() -> SharedMemory {
    let mut memory = SharedMemory::new(0x10_0000).unwrap();
    let pattern: Vec<u8> = (0..SNAPSHOT_LEN).map(|i| (i % 253) as u8).collect();
    memory.write_from(0, &pattern).unwrap();
    memory
}

fn set_snapshot(dev: &VirtineCoprocessor) {
    dev.write_register(SNAPSHOT_SIZE, &SNAPSHOT_LEN.to_le_bytes());
    dev.write_register(SNAPSHOT_ADDR, &0u64.to_le_bytes());
}

#[test]
fn doorbell_wakes_worker_and_virtines_are_cleaned() {
    let memory = memory_with_snapshot();
    let virtines: Vec<u64> = (1..=20).map(|i| i * 0x1000).collect();
    memory.with(|mem| {
        for &addr in &virtines {
            mem.write_from(addr, &[0xcc; SNAPSHOT_LEN as usize]).unwrap();
        }
    });

    let (dev, rx) = VirtineCoprocessor::spawn(&config(5), memory.clone()).unwrap();
    set_snapshot(&dev);
    for &addr in &virtines {
        submit(&dev, addr);
    }
    dev.write_u32(DOORBELL, 1);

    let mut cleaned = 0;
    while cleaned < virtines.len() as u64 {
        let n = rx.recv_timeout(TIMEOUT).expect("notification");
        assert_eq!(n.cleaned, 5);
        cleaned += n.cleaned;
    }

    let reclaimed: Vec<u64> = (0..virtines.len()).map(|_| reclaim(&dev)).collect();
    assert_eq!(reclaimed, virtines);
    assert_eq!(reclaim(&dev), 0);

    memory.with(|mem| {
        let snapshot = &mem.as_slice()[..SNAPSHOT_LEN as usize];
        for &addr in &virtines {
            let start = addr as usize;
            assert_eq!(&mem.as_slice()[start..start + SNAPSHOT_LEN as usize], snapshot);
        }
    });
}

#[test]
fn signal_doorbell_is_equivalent_to_register_write() {
    let (dev, rx) = VirtineCoprocessor::spawn(&config(1), memory_with_snapshot()).unwrap();
    submit(&dev, 0x4000);
    dev.signal_doorbell();

    let n = rx.recv_timeout(TIMEOUT).expect("notification");
    assert_eq!(n.sequence, 1);
    assert_eq!(reclaim(&dev), 0x4000);
}

#[test]
fn worker_resumes_after_complete_queue_drains() {
    let (dev, rx) = VirtineCoprocessor::spawn(&config(1), memory_with_snapshot()).unwrap();
    set_snapshot(&dev);

    for i in 0..MAX_VIRTINES as u64 {
        submit(&dev, 0x1000 + i * 0x1000);
    }
    dev.signal_doorbell();
    for _ in 0..MAX_VIRTINES {
        rx.recv_timeout(TIMEOUT).expect("notification");
    }

    for i in 0..5 {
        submit(&dev, 0x8_0000 + i * 0x1000);
    }
    dev.signal_doorbell();
    wait_until(|| dev.status().stalled);
    assert_eq!(dev.status().ready_len, 5);

    for _ in 0..5 {
        assert_ne!(reclaim(&dev), 0);
    }
    for _ in 0..5 {
        rx.recv_timeout(TIMEOUT).expect("notification after resume");
    }
    wait_until(|| dev.status().phase == ProcessingState::WaitingForDoorbell);

    let status = dev.status();
    assert_eq!(status.ready_len, 0);
    assert_eq!(status.complete_len, MAX_VIRTINES);
    assert_eq!(status.stats.cleaned, MAX_VIRTINES as u64 + 5);
}

#[test]
fn shutdown_joins_worker_and_closes_channel() {
    let (dev, rx) = VirtineCoprocessor::spawn(&config(1), memory_with_snapshot()).unwrap();
    wait_until(|| dev.status().phase == ProcessingState::WaitingForDoorbell);
    dev.shutdown();
    assert!(rx.recv().is_none());
}

#[test]
fn dropping_idle_device_does_not_hang() {
    for _ in 0..20 {
        let (dev, _rx) = VirtineCoprocessor::spawn(&config(1), memory_with_snapshot()).unwrap();
        drop(dev);
    }
}

#[test]
fn invalid_config_is_rejected_before_spawning() {
    let cfg = CoprocConfig {
        notification_capacity: 0,
        ..CoprocConfig::default()
    };
    let err = VirtineCoprocessor::spawn(&cfg, memory_with_snapshot()).err();
    assert!(matches!(err, Some(CoprocError::InvalidConfig(_))));
}

#[test]
fn shutdown_during_a_pass_stops_before_the_ready_queue_drains() {
    const LARGE_SNAPSHOT: u64 = 512 * 1024;
    let memory = SharedMemory::new(LARGE_SNAPSHOT * (MAX_VIRTINES as u64 + 1)).unwrap();
    let (dev, rx) = VirtineCoprocessor::spawn(&config(1), memory).unwrap();
    let port = dev.port();

    port.write_register(SNAPSHOT_SIZE, &LARGE_SNAPSHOT.to_le_bytes());
    port.write_register(SNAPSHOT_ADDR, &0u64.to_le_bytes());
    for i in 1..=MAX_VIRTINES as u64 {
        port.write_register(RQ_TAIL, &(i * LARGE_SNAPSHOT).to_le_bytes());
    }
    port.signal_doorbell();

    let deadline = Instant::now() + TIMEOUT;
    while !dev.status().is_processing {
        assert!(Instant::now() < deadline, "worker never started the pass");
        std::thread::yield_now();
    }
    dev.shutdown();

    // Batch factor 1: one notification per cleaned virtine, and the channel is closed.
    let cleaned = rx.drain().len();
    assert!(cleaned < MAX_VIRTINES, "pass ran to completion ({cleaned} cleaned)");
    assert!(rx.recv().is_none());

    // Everything cleaned before the stop was posted; nothing else was.
    let mut completed = 0;
    let mut buf = [0u8; 8];
    loop {
        port.read_register(CQ_HEAD, &mut buf);
        if u64::from_le_bytes(buf) == 0 {
            break;
        }
        completed += 1;
    }
    assert_eq!(completed, cleaned);
}
