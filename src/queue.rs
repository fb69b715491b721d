//! Thread-safe priority-ordered buffer of pending frames for one session.
//!
//! The receive path pushes frames in arrival order; the session's drain
//! thread repeatedly asks for the next frame in sequence. One mutex plus
//! one condition variable make `push` followed by `next_in_sequence`
//! linearizable; the bounded wait keeps the drain thread responsive to
//! cancellation even when the link goes quiet.

use crate::frame::Frame;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Upper bound on one wait for new arrivals.
const ARRIVAL_WAIT: Duration = Duration::from_micros(100);

/// Outcome of one [`OrderedPacketQueue::next_in_sequence`] cycle.
#[derive(Debug)]
pub enum SequencedPacket {
    /// The frame at the head of the queue was the next in sequence;
    /// ownership transfers to the caller.
    Found(Frame),
    /// The queue is empty or the head is ahead of the expected sequence
    /// number; nothing was removed.
    WaitOrEmpty,
    /// The head was a duplicate of an already-written frame and has been
    /// dropped.
    Discarded,
}

/// Min-heap of frames keyed on sequence number, shared between the receive
/// path and the drain thread.
#[derive(Debug, Default)]
pub struct OrderedPacketQueue {
    heap: Mutex<BinaryHeap<Reverse<Frame>>>,
    arrival: Condvar,
}

impl OrderedPacketQueue {
    pub fn new() -> Self {
        OrderedPacketQueue::default()
    }

    /// Insert a frame and wake the drain thread. Frames are never mutated
    /// once inserted.
    pub fn push(&self, frame: Frame) {
        {
            let mut heap = self.heap.lock().expect("packet queue lock poisoned");
            heap.push(Reverse(frame));
        }
        self.arrival.notify_all();
    }

    pub fn len(&self) -> usize {
        self.heap.lock().expect("packet queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait briefly for new arrivals, then resolve the head of the queue
    /// against the drain thread's sequence position.
    pub fn next_in_sequence(
        &self,
        next_frame_count: u32,
        last_frame_written: u32,
    ) -> SequencedPacket {
        let guard = self.heap.lock().expect("packet queue lock poisoned");
        let (mut heap, _) = self
            .arrival
            .wait_timeout(guard, ARRIVAL_WAIT)
            .expect("packet queue lock poisoned");

        let head = match heap.peek() {
            Some(Reverse(frame)) => frame.header.frame_count,
            None => return SequencedPacket::WaitOrEmpty,
        };

        if head == next_frame_count {
            match heap.pop() {
                Some(Reverse(frame)) => SequencedPacket::Found(frame),
                None => SequencedPacket::WaitOrEmpty,
            }
        } else if head <= last_frame_written {
            tracing::debug!(frame = head, "discarding duplicate frame");
            heap.pop();
            SequencedPacket::Discarded
        } else {
            SequencedPacket::WaitOrEmpty
        }
    }
}
