//! Bounded outbound frame queue with drop-oldest eviction

use bytes::Bytes;
use std::collections::VecDeque;

/// One encoded report waiting for the link
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedFrame {
    pub sequence_number: u32,
    pub payload: Bytes,
}

/// FIFO of pending frames holding at most `capacity` entries.
///
/// Pushing into a full queue evicts the oldest frame: a stale position is
/// worth nothing once a newer one exists.
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
    evicted: u64,
}

impl FrameQueue {
    /// Create a queue; a capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append a frame, returning the evicted oldest frame if the queue was full
    pub fn push_back(&mut self, frame: QueuedFrame) -> Option<QueuedFrame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.evicted += 1;
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Put a frame back at the head after a failed send.
    ///
    /// Returns `false`, dropping the frame, when the queue is already full.
    pub fn push_front(&mut self, frame: QueuedFrame) -> bool {
        if self.frames.len() >= self.capacity {
            self.evicted += 1;
            return false;
        }
        self.frames.push_front(frame);
        true
    }

    pub fn pop_front(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    pub fn front(&self) -> Option<&QueuedFrame> {
        self.frames.front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped by the eviction policy since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Sequence numbers of the queued frames, oldest first
    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.sequence_number).collect()
    }

    /// Drop everything, returning how many frames were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        dropped
    }
}
