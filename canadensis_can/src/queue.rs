//!
//! The transmit queue: an ordered collection of prepared frames waiting to be sent
//!
//! The ordering key is `(priority, CAN ID, sequence)`, compared field by field in that order.
//! This guarantees that `peek`/`pop` always return the highest-priority frame, that frames of
//! one transfer stay in the order they were generated (their CAN ID is identical, so the
//! insertion sequence breaks the tie), and that frames of different transfers at the same
//! priority are served in the order their transfers were pushed.
//!
//! The reference implementation keeps this queue as an intrusive AVL tree (`cavl`) so that it
//! can run with no dynamic allocation at all. This version uses `alloc::collections::BTreeMap`,
//! which gives the same O(log n) insert/peek-min/remove behavior and the same tie-break
//! guarantees without hand-rolling balanced-tree rotations.
//!

use alloc::collections::BTreeMap;

use canadensis_core::OutOfMemoryError;

use crate::data::{CanId, Frame, Mtu};

/// The key that orders items in the transmit queue
///
/// Lower keys are served first: lower numeric priority value, then lower CAN ID, then lower
/// sequence number.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct OrderKey {
    priority: u8,
    can_id: u32,
    sequence: i64,
}

/// A source of frames to transmit, drained by a CAN driver
pub trait FrameQueueSource<I> {
    /// Removes and returns the highest-priority queued frame, or `None` if the queue is empty
    fn pop_frame(&mut self) -> Option<Frame<I>>;

    /// Returns a reference to the highest-priority queued frame without removing it
    fn peek_frame(&self) -> Option<&Frame<I>>;
}

/// A destination that accepts frames produced by [`crate::tx::Transmitter`]
pub trait FrameSink<I> {
    /// Reserves space for at least `additional` more frames
    ///
    /// If this fails, no frames have been added and the caller's transfer is rejected in its
    /// entirety.
    fn try_reserve(&mut self, additional: usize) -> Result<(), OutOfMemoryError>;

    /// Adds one frame to the sink
    fn push_frame(&mut self, frame: Frame<I>) -> Result<(), OutOfMemoryError>;
}

/// The ordered transmit queue described in the transport specification
///
/// `peek`/`pop` expose the literal "peek returns a reference, pop removes the named item"
/// contract; [`FrameQueueSource`] and [`FrameSink`] are thin adapters over the same state for
/// driver code and the [`crate::tx::Transmitter`].
pub struct TxQueue<I> {
    items: BTreeMap<OrderKey, Frame<I>>,
    capacity: usize,
    mtu: Mtu,
    next_push_sequence: i64,
    next_return_sequence: i64,
}

impl<I> TxQueue<I> {
    /// Creates an empty queue with the given capacity (in frames) and MTU
    pub fn new(capacity: usize, mtu: Mtu) -> Self {
        TxQueue {
            items: BTreeMap::new(),
            capacity,
            mtu,
            next_push_sequence: 0,
            next_return_sequence: -1,
        }
    }

    /// Returns the configured MTU
    pub fn mtu(&self) -> Mtu {
        self.mtu
    }

    /// Sets the MTU used for frames generated by future pushes
    pub fn set_mtu(&mut self, mtu: Mtu) {
        self.mtu = mtu;
    }

    /// Returns the number of frames currently queued
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Returns the maximum number of frames this queue can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the key and a reference to the highest-priority queued frame
    pub fn peek(&self) -> Option<(OrderKey, &Frame<I>)> {
        self.items.iter().next().map(|(key, frame)| (*key, frame))
    }

    /// Removes and returns the frame with the given key
    ///
    /// Returns `None` (a no-op) if no item with that key is queued, matching the "passing
    /// nil is a no-op" rule from the reference implementation.
    pub fn pop(&mut self, key: OrderKey) -> Option<Frame<I>> {
        self.items.remove(&key)
    }

    /// Computes the order key for a new frame at the given priority and CAN ID, using the next
    /// insertion sequence number
    fn next_key(&mut self, priority: u8, can_id: CanId) -> OrderKey {
        let sequence = self.next_push_sequence;
        self.next_push_sequence += 1;
        OrderKey {
            priority,
            can_id: u32::from(can_id),
            sequence,
        }
    }

    /// Inserts a batch of already-built frames for one transfer, provided there is capacity for
    /// all of them
    ///
    /// This is how [`crate::tx::Transmitter::push`] achieves transactional behavior: frames are
    /// built up front, and only inserted here once every frame for the transfer exists.
    pub(crate) fn insert_transfer(
        &mut self,
        priority: u8,
        frames: alloc::vec::Vec<Frame<I>>,
    ) -> Result<usize, OutOfMemoryError> {
        if self.items.len() + frames.len() > self.capacity {
            return Err(OutOfMemoryError);
        }
        let count = frames.len();
        for frame in frames {
            let key = self.next_key(priority, frame.id());
            self.items.insert(key, frame);
        }
        Ok(count)
    }

    /// Puts a frame that could not be transmitted back into the queue so that it will be tried
    /// again before any frame pushed after it
    ///
    /// Used by drivers that pulled a frame out of the queue, attempted to hand it to the CAN
    /// peripheral, and were told to try again later (for example, all hardware mailboxes full).
    pub fn return_frame(&mut self, priority: u8, frame: Frame<I>) -> Result<(), OutOfMemoryError> {
        if self.items.len() >= self.capacity {
            return Err(OutOfMemoryError);
        }
        let sequence = self.next_return_sequence;
        self.next_return_sequence -= 1;
        let key = OrderKey {
            priority,
            can_id: u32::from(frame.id()),
            sequence,
        };
        self.items.insert(key, frame);
        Ok(())
    }
}

impl<I> FrameQueueSource<I> for TxQueue<I> {
    fn pop_frame(&mut self) -> Option<Frame<I>> {
        let key = *self.items.keys().next()?;
        self.items.remove(&key)
    }

    fn peek_frame(&self) -> Option<&Frame<I>> {
        self.items.values().next()
    }
}

impl<I> FrameSink<I> for TxQueue<I> {
    fn try_reserve(&mut self, additional: usize) -> Result<(), OutOfMemoryError> {
        if self.items.len() + additional > self.capacity {
            Err(OutOfMemoryError)
        } else {
            Ok(())
        }
    }

    fn push_frame(&mut self, frame: Frame<I>) -> Result<(), OutOfMemoryError> {
        // The priority is not recoverable from a bare Frame without re-parsing its CAN ID;
        // Transmitter uses insert_transfer() directly instead of this trait method so that the
        // priority from the transfer header is preserved without a re-parse. This
        // implementation exists so TxQueue satisfies FrameSink for generic code and tests that
        // do not care about priority ordering across different sinks.
        let priority_bits = ((u32::from(frame.id()) >> 26) & 0x7) as u8;
        let key = self.next_key(priority_bits, frame.id());
        if self.items.len() >= self.capacity {
            return Err(OutOfMemoryError);
        }
        self.items.insert(key, frame);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use canadensis_core::time::Microseconds64;
    use core::convert::TryFrom;

    fn frame(id: u32, seq_hint: u8) -> Frame<Microseconds64> {
        Frame::new(Microseconds64::new(0), CanId::try_from(id).unwrap(), &[seq_hint])
    }

    #[test]
    fn peek_returns_lowest_key() {
        let mut queue: TxQueue<Microseconds64> = TxQueue::new(16, Mtu::Can8);
        // Priority 4 frame
        queue
            .insert_transfer(4, alloc::vec![frame(0x1000, 1)])
            .unwrap();
        // Priority 1 frame: higher priority (lower number), should be peeked first
        queue
            .insert_transfer(1, alloc::vec![frame(0x2000, 2)])
            .unwrap();
        let (_, top) = queue.peek().unwrap();
        assert_eq!(&[2], top.data());
    }

    #[test]
    fn same_transfer_frames_stay_in_order() {
        let mut queue: TxQueue<Microseconds64> = TxQueue::new(16, Mtu::Can8);
        queue
            .insert_transfer(4, alloc::vec![frame(0x1000, 1), frame(0x1000, 2), frame(0x1000, 3)])
            .unwrap();
        assert_eq!(&[1], queue.pop_frame().unwrap().data());
        assert_eq!(&[2], queue.pop_frame().unwrap().data());
        assert_eq!(&[3], queue.pop_frame().unwrap().data());
        assert!(queue.pop_frame().is_none());
    }

    #[test]
    fn capacity_enforced() {
        let mut queue: TxQueue<Microseconds64> = TxQueue::new(2, Mtu::Can8);
        assert!(queue
            .insert_transfer(4, alloc::vec![frame(1, 1), frame(2, 2), frame(3, 3)])
            .is_err());
        // Rejected transfer leaves the queue unchanged
        assert_eq!(0, queue.size());
    }
}
