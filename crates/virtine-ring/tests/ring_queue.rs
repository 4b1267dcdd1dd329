use std::collections::VecDeque;

use proptest::prelude::*;
use virtine_ring::{QueueFull, RingQueue};

#[test]
fn capacity_four_fills_rejects_and_drains_in_order() {
    let mut q = RingQueue::<u64, 4>::new();
    for addr in [0x100, 0x200, 0x300, 0x400] {
        q.insert_tail(addr).unwrap();
    }
    assert!(q.is_full());

    let tail_before = q.tail();
    assert_eq!(q.insert_tail(0x500), Err(QueueFull { tail: tail_before }));
    assert_eq!(q.tail(), tail_before);

    let popped: Vec<_> = std::iter::from_fn(|| q.pop_head()).collect();
    assert_eq!(popped, vec![0x100, 0x200, 0x300, 0x400]);
    assert_eq!(q.pop_head(), None);
}

#[test]
fn insert_into_full_queue_leaves_every_slot_untouched() {
    let mut q = RingQueue::<u64, 4>::new();
    // Rotate first so the full state is reached with head/tail away from slot 0.
    q.insert_tail(1).unwrap();
    q.insert_tail(2).unwrap();
    q.pop_head();
    q.pop_head();
    for v in 10..14 {
        q.insert_tail(v).unwrap();
    }
    assert_eq!(q.head(), q.tail());

    let slots_before: Vec<_> = (0..4).map(|i| q.slot(i)).collect();
    let (head, tail) = (q.head(), q.tail());

    for _ in 0..3 {
        assert!(q.insert_tail(99).is_err());
    }

    let slots_after: Vec<_> = (0..4).map(|i| q.slot(i)).collect();
    assert_eq!(slots_before, slots_after);
    assert_eq!((q.head(), q.tail()), (head, tail));
}

#[test]
fn pop_from_empty_queue_does_not_move_head() {
    let mut q = RingQueue::<u64, 8>::new();
    q.insert_tail(5).unwrap();
    q.insert_tail(6).unwrap();
    q.pop_head();
    q.pop_head();

    let head = q.head();
    assert_eq!(q.pop_head(), None);
    assert_eq!(q.pop_head(), None);
    assert_eq!(q.head(), head);
    assert!(q.is_empty());
}

#[test]
fn indices_wrap_to_zero_at_capacity() {
    let mut q = RingQueue::<u64, 3>::new();
    assert_eq!(q.insert_tail(1), Ok(1));
    assert_eq!(q.insert_tail(2), Ok(2));
    assert_eq!(q.insert_tail(3), Ok(0));
    assert_eq!(q.pop_head(), Some(1));
    assert_eq!(q.head(), 1);
    assert_eq!(q.insert_tail(4), Ok(1));
    assert_eq!(q.pop_head(), Some(2));
    assert_eq!(q.pop_head(), Some(3));
    assert_eq!(q.head(), 0);
    assert_eq!(q.pop_head(), Some(4));
    assert_eq!(q.head(), 1);
}

#[test]
fn popped_slot_is_cleared() {
    let mut q = RingQueue::<u64, 2>::new();
    q.insert_tail(0xabc).unwrap();
    assert_eq!(q.slot(0), Some(0xabc));
    q.pop_head();
    assert_eq!(q.slot(0), None);
    assert_eq!(q.slot(7), None);
}

#[test]
fn clear_resets_indices() {
    let mut q = RingQueue::<u64, 4>::new();
    q.insert_tail(1).unwrap();
    q.insert_tail(2).unwrap();
    q.pop_head();
    q.clear();
    assert_eq!((q.head(), q.tail(), q.len()), (0, 0, 0));
    assert!(q.is_empty());
}

#[derive(Debug, Clone)]
enum Op {
    Insert(u64),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u64>().prop_map(Op::Insert), Just(Op::Pop)]
}

proptest! {
    #[test]
    fn behaves_like_a_bounded_fifo(ops in prop::collection::vec(op(), 0..400)) {
        let mut q = RingQueue::<u64, 7>::new();
        let mut model: VecDeque<u64> = VecDeque::new();

        for op in ops {
            match op {
                Op::Insert(v) => {
                    let tail = q.tail();
                    match q.insert_tail(v) {
                        Ok(new_tail) => {
                            prop_assert!(model.len() < 7);
                            prop_assert_eq!(new_tail, (tail + 1) % 7);
                            model.push_back(v);
                        }
                        Err(QueueFull { tail: reported }) => {
                            prop_assert_eq!(model.len(), 7);
                            prop_assert_eq!(reported, tail);
                            prop_assert_eq!(q.tail(), tail);
                        }
                    }
                }
                Op::Pop => prop_assert_eq!(q.pop_head(), model.pop_front()),
            }
            prop_assert!(q.head() < 7 && q.tail() < 7);
            prop_assert_eq!(q.len(), model.len());
            prop_assert_eq!(q.is_empty(), model.is_empty());
            prop_assert_eq!(q.is_full(), model.len() == 7);
        }

        prop_assert_eq!(q.iter().collect::<Vec<_>>(), model.iter().copied().collect::<Vec<_>>());
    }
}
