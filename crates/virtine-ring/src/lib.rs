//! Fixed-capacity circular queue shared by the coprocessor's Ready Queue and Complete Queue.
//!
//! Design goals:
//! - Storage is a plain array plus `head`/`tail` indices; there is no pointer arithmetic and
//!   both indices always lie within `[0, N)`.
//! - Every slot is tagged present/absent. The queue is *empty* iff `head == tail` and the slot at
//!   `head` is absent; it is *full* iff `head == tail` and that slot is present. No value is
//!   reserved as an "empty" sentinel, so any `T` can be stored.
//! - Inserting into a full queue and popping from an empty queue are both non-mutating.
//! - There is deliberately no way to step backwards from `head` or `tail`.
//!
//! The queue is not synchronized; owners wrap it in whatever lock protects the surrounding state.

#![forbid(unsafe_code)]

use core::fmt;

use thiserror::Error;

/// Returned by [`RingQueue::insert_tail`] when every slot is occupied.
///
/// `tail` is the (unchanged) tail index, mirroring the register-level contract where a full
/// queue is detected by observing that the tail did not move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ring queue is full (tail={tail})")]
pub struct QueueFull {
    pub tail: usize,
}

pub struct RingQueue<T, const N: usize> {
    slots: [Option<T>; N],
    head: usize,
    tail: usize,
}

impl<T: Copy, const N: usize> RingQueue<T, N> {
    const NON_ZERO_CAPACITY: () = assert!(N > 0, "RingQueue capacity must be non-zero");

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_ZERO_CAPACITY;
        Self {
            slots: [None; N],
            head: 0,
            tail: 0,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn head(&self) -> usize {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail && self.slots[self.head].is_none()
    }

    pub fn is_full(&self) -> bool {
        self.head == self.tail && self.slots[self.head].is_some()
    }

    pub fn len(&self) -> usize {
        if self.is_full() {
            N
        } else {
            (self.tail + N - self.head) % N
        }
    }

    /// Appends `value` at `tail` and returns the new tail index.
    ///
    /// On a full queue nothing is modified and the unchanged tail is reported through
    /// [`QueueFull`].
    pub fn insert_tail(&mut self, value: T) -> Result<usize, QueueFull> {
        if self.is_full() {
            return Err(QueueFull { tail: self.tail });
        }
        debug_assert!(self.slots[self.tail].is_none());
        self.slots[self.tail] = Some(value);
        self.tail = advance::<N>(self.tail);
        Ok(self.tail)
    }

    /// Removes and returns the value at `head`, clearing its slot.
    ///
    /// Returns `None` without moving `head` when the queue is empty.
    pub fn pop_head(&mut self) -> Option<T> {
        // Outside of the empty state the occupied region is `[head, tail)` (cyclically), so the
        // head slot is present exactly when the queue holds at least one value.
        let value = self.slots[self.head].take()?;
        self.head = advance::<N>(self.head);
        Some(value)
    }

    /// Raw view of a single slot by absolute index, for diagnostics.
    pub fn slot(&self, index: usize) -> Option<T> {
        self.slots.get(index).copied().flatten()
    }

    /// Iterates over the queued values in FIFO order without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).filter_map(move |i| self.slots[(self.head + i) % N])
    }

    pub fn clear(&mut self) {
        self.slots = [None; N];
        self.head = 0;
        self.tail = 0;
    }
}

#[inline]
const fn advance<const N: usize>(index: usize) -> usize {
    if index + 1 == N {
        0
    } else {
        index + 1
    }
}

impl<T: Copy, const N: usize> Default for RingQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + fmt::Debug, const N: usize> fmt::Debug for RingQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("capacity", &N)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("entries", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}
