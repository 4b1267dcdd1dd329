use std::sync::mpsc;
use std::time::{Duration, Instant};

use virtine_coproc::irq;
use virtine_host::Listener;

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn callback_runs_for_each_notification() {
    let (mut notifier, receiver) = irq::channel(8);
    let (tx, rx) = mpsc::channel();
    let listener = Listener::spawn(receiver, move |n| {
        let _ = tx.send(n.sequence);
    })
    .unwrap();

    notifier.raise(1);
    notifier.raise(1);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 2);

    let receiver = listener.stop().expect("receiver handed back");
    notifier.raise(3);
    assert_eq!(receiver.try_recv().map(|n| n.sequence), Some(3));
}

#[test]
fn listener_exits_when_device_goes_away() {
    let (notifier, receiver) = irq::channel(8);
    let listener = Listener::spawn(receiver, |_| {}).unwrap();
    drop(notifier);

    let deadline = Instant::now() + TIMEOUT;
    while !listener.is_finished() {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(listener.stop().is_none());
}
