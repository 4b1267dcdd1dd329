use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread;

use proptest::prelude::*;
use virtine_coproc::irq::{self, NotificationReceiver};
use virtine_coproc::regs::*;
use virtine_coproc::{DenseMemory, DeviceState, RegisterPort};
use virtine_host::command::{GET_MAX_NUM_VIRTINES, MODIFY_BATCH_FACTOR, RING_DOORBELL, SET_SNAPSHOT};
use virtine_host::{Command, Multiplexer, MuxError};

/// Drives the register file directly, without a worker thread.
struct InlinePort(Mutex<DeviceState>);

impl InlinePort {
    fn process(&self) {
        self.0.lock().unwrap().process_ready_queue();
    }
}

impl RegisterPort for InlinePort {
    fn read_register(&self, offset: u64, buf: &mut [u8]) -> usize {
        self.0.lock().unwrap().read_register(offset, buf)
    }

    fn write_register(&self, offset: u64, data: &[u8]) -> usize {
        self.0.lock().unwrap().write_register(offset, data)
    }

    fn signal_doorbell(&self) {
        self.0.lock().unwrap().ring_doorbell();
    }
}

fn mux() -> (Multiplexer<Arc<InlinePort>>, Arc<InlinePort>, NotificationReceiver) {
    let (notifier, rx) = irq::channel(64);
    let state = DeviceState::new(Box::new(DenseMemory::new(0x1000).unwrap()), notifier, 1);
    let port = Arc::new(InlinePort(Mutex::new(state)));
    (Multiplexer::new(Arc::clone(&port)), port, rx)
}

#[test]
fn misaligned_transfers_move_nothing() {
    let (mux, port, _rx) = mux();
    let before = port.0.lock().unwrap().status();

    let mut buf = [0u8; 8];
    assert_eq!(mux.read_at(1, &mut buf), 0);
    assert_eq!(mux.write_at(RQ_TAIL + 2, &[1; 8]), 0);
    assert_eq!(port.0.lock().unwrap().status(), before);
}

#[test]
fn transfers_are_whole_words() {
    let (mux, _port, _rx) = mux();
    let mut buf = [0u8; 11];
    assert_eq!(mux.read_at(MAX_VIRTINES_REG, &mut buf), 8);
    assert_eq!(&buf[..8], &100u64.to_le_bytes());
    assert_eq!(&buf[8..], &[0, 0, 0]);

    let mut tail = [0u8; 16];
    assert_eq!(mux.read_at(WINDOW_SIZE - 8, &mut tail), 8);
    assert_eq!(&tail[..8], &[0xff; 8]);
}

#[test]
fn byte_writes_enqueue_through_split_protocol() {
    let (mux, port, _rx) = mux();
    let addr = 0x0000_0042_0000_1000u64;
    assert_eq!(mux.write_at(RQ_TAIL, &addr.to_le_bytes()), 8);
    assert_eq!(
        port.0
            .lock()
            .unwrap()
            .ready_queue()
            .iter()
            .map(|a| a.get())
            .collect::<Vec<_>>(),
        vec![addr]
    );

    port.process();
    let mut buf = [0u8; 8];
    assert_eq!(mux.read_at(CQ_HEAD, &mut buf), 8);
    assert_eq!(u64::from_le_bytes(buf), addr);
}

#[test]
fn ioctl_commands() {
    let (mux, port, _rx) = mux();

    assert_eq!(mux.ioctl(GET_MAX_NUM_VIRTINES, &[]), Ok(100));
    assert_eq!(mux.ioctl(MODIFY_BATCH_FACTOR, &[0x1_0000_0007]), Ok(0));
    assert_eq!(mux.ioctl(SET_SNAPSHOT, &[0x2_0000_0800, 0x400]), Ok(0));
    assert_eq!(mux.ioctl(RING_DOORBELL, &[]), Ok(0));

    let status = mux.status();
    assert_eq!(status.batch_factor, 0x1_0000_0007);
    assert_eq!(status.snapshot_addr, 0x2_0000_0800);
    assert_eq!(status.snapshot_size, 0x400);
    assert_eq!(status.max_virtines, 100);
    assert!(status.doorbell);
    assert!(port.0.lock().unwrap().doorbell());
}

#[test]
fn invalid_request_leaves_device_untouched() {
    let (mux, port, _rx) = mux();
    let before = port.0.lock().unwrap().status();
    assert_eq!(
        mux.ioctl(0xfeed_bead, &[1, 2]),
        Err(MuxError::InvalidCommand {
            request: 0xfeed_bead
        })
    );
    assert_eq!(
        mux.ioctl(MODIFY_BATCH_FACTOR, &[]),
        Err(MuxError::MissingArgument {
            request: MODIFY_BATCH_FACTOR,
            expected: 1
        })
    );
    assert_eq!(port.0.lock().unwrap().status(), before);
}

#[test]
fn set_snapshot_command_writes_size_before_address() {
    let (mux, port, _rx) = mux();
    mux.command(Command::SetSnapshot {
        address: 0xabcd_0000_1000,
        size: 0x80,
    });
    let snapshot = port.0.lock().unwrap().snapshot();
    assert_eq!(snapshot.address, 0xabcd_0000_1000);
    assert_eq!(snapshot.size, 0x80);
}

#[test]
fn submit_and_reclaim() {
    let (mux, port, _rx) = mux();
    assert_eq!(mux.submit_virtine(0), Err(MuxError::ZeroAddress));
    assert_eq!(mux.reclaim_virtine(), None);

    mux.submit_virtine(0x7_0000_0000).unwrap();
    mux.submit_virtine(0x8_0000_0000).unwrap();
    port.process();

    assert_eq!(mux.reclaim_virtine(), Some(0x7_0000_0000));
    assert_eq!(mux.reclaim_virtine(), Some(0x8_0000_0000));
    assert_eq!(mux.reclaim_virtine(), None);
}

#[test]
fn full_ready_queue_is_reported() {
    let (mux, _port, _rx) = mux();
    for i in 1..=MAX_VIRTINES as u64 {
        mux.submit_virtine(i << 12).unwrap();
    }
    assert_eq!(mux.submit_virtine(0xdead_0000), Err(MuxError::QueueFull));
    assert_eq!(mux.status().rq_tail, 0);
}

#[test]
fn concurrent_submitters_do_not_interleave_halves() {
    let (mux, port, _rx) = mux();
    let mux = Arc::new(mux);

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let mux = Arc::clone(&mux);
            thread::spawn(move || {
                for i in 0..25u64 {
                    let addr = ((t + 1) << 40) | ((i + 1) << 8);
                    mux.submit_virtine(addr).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let queued: BTreeSet<u64> = port
        .0
        .lock()
        .unwrap()
        .ready_queue()
        .iter()
        .map(|a| a.get())
        .collect();
    let expected: BTreeSet<u64> = (0..4u64)
        .flat_map(|t| (0..25u64).map(move |i| ((t + 1) << 40) | ((i + 1) << 8)))
        .collect();
    assert_eq!(queued, expected);
}

proptest! {
    #[test]
    fn reclaim_returns_submissions_in_order(addrs in proptest::collection::vec(1u64.., 1..=MAX_VIRTINES)) {
        let (mux, port, _rx) = mux();
        for &addr in &addrs {
            prop_assert_eq!(mux.submit_virtine(addr), Ok(()));
        }
        port.process();

        let reclaimed: Vec<u64> = std::iter::from_fn(|| mux.reclaim_virtine()).collect();
        prop_assert_eq!(reclaimed, addrs);
    }
}

/// Records the live BATCH_FACTOR and SNAPSHOT_SIZE values after every register write.
struct ObservingPort {
    state: Mutex<DeviceState>,
    seen: Mutex<Vec<(u64, u64)>>,
}

impl RegisterPort for ObservingPort {
    fn read_register(&self, offset: u64, buf: &mut [u8]) -> usize {
        self.state.lock().unwrap().read_register(offset, buf)
    }

    fn write_register(&self, offset: u64, data: &[u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        let n = state.write_register(offset, data);
        self.seen
            .lock()
            .unwrap()
            .push((state.batch_factor(), state.snapshot().size));
        n
    }

    fn signal_doorbell(&self) {
        self.state.lock().unwrap().ring_doorbell();
    }
}

#[test]
fn live_registers_never_hold_a_half_written_value() {
    let (notifier, _rx) = irq::channel(64);
    let state = DeviceState::new(Box::new(DenseMemory::new(0x1000).unwrap()), notifier, 5);
    let mux = Multiplexer::new(ObservingPort {
        state: Mutex::new(state),
        seen: Mutex::new(Vec::new()),
    });

    mux.command(Command::ModifyBatchFactor(0x1_0000_0000));
    assert_eq!(*mux.port().seen.lock().unwrap(), vec![(0x1_0000_0000, 0)]);

    mux.port().seen.lock().unwrap().clear();
    mux.command(Command::SetSnapshot {
        address: 0x2_0000_0000,
        size: 0x1_0000_0040,
    });
    // Every write after the first sees the whole new size.
    let seen = mux.port().seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|&(_, size)| size == 0x1_0000_0040));
    assert_eq!(mux.status().snapshot_addr, 0x2_0000_0000);
}
