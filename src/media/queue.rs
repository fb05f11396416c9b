//! Transmit queue of encoded media packets

use heapless::{Deque, Vec};

use crate::constants::{MAX_MEDIA_FRAME_SIZE, MAX_OUTPUT_FRAME_QUEUE_SZ};

/// One encoded media packet as produced by the encoder
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MediaFrame {
    /// RTP timestamp in samples
    pub timestamp: u32,
    /// Codec frames carried in `payload`
    pub num_frames: u8,
    /// Media payload including the codec payload header
    pub payload: Vec<u8, MAX_MEDIA_FRAME_SIZE>,
}

impl MediaFrame {
    /// Build a frame from an encoded payload
    ///
    /// Returns `None` if the payload does not fit.
    #[must_use]
    pub fn new(timestamp: u32, num_frames: u8, payload: &[u8]) -> Option<Self> {
        Some(Self {
            timestamp,
            num_frames,
            payload: Vec::from_slice(payload).ok()?,
        })
    }
}

/// Bounded FIFO of encoded frames owned by the media worker
#[derive(Debug)]
pub struct TxQueue {
    frames: Deque<MediaFrame, MAX_OUTPUT_FRAME_QUEUE_SZ>,
    max_len: usize,
}

impl TxQueue {
    /// Create a queue holding at most `max_len` frames
    ///
    /// `max_len` is clamped to the compile-time capacity.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            frames: Deque::new(),
            max_len: max_len.clamp(1, MAX_OUTPUT_FRAME_QUEUE_SZ),
        }
    }

    /// Configured bound
    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Number of queued frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether adding `frames_n` would exceed the bound
    #[must_use]
    pub fn would_overflow(&self, frames_n: u8) -> bool {
        self.frames.len() + usize::from(frames_n) > self.max_len
    }

    /// Append a frame
    ///
    /// # Errors
    ///
    /// Gives the frame back if the queue is at its bound.
    pub fn push(&mut self, frame: MediaFrame) -> Result<(), MediaFrame> {
        if self.frames.len() >= self.max_len {
            return Err(frame);
        }
        self.frames.push_back(frame)
    }

    /// Remove the oldest frame
    pub fn pop(&mut self) -> Option<MediaFrame> {
        self.frames.pop_front()
    }

    /// Drop every frame, returning how many were dropped
    pub fn flush(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(timestamp: u32) -> MediaFrame {
        MediaFrame::new(timestamp, 1, &[0x01, 0xAA]).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TxQueue::new(4);
        for ts in 0..3 {
            queue.push(frame(ts)).unwrap();
        }
        assert_eq!(queue.pop().unwrap().timestamp, 0);
        assert_eq!(queue.pop().unwrap().timestamp, 1);
        queue.push(frame(7)).unwrap();
        assert_eq!(queue.pop().unwrap().timestamp, 2);
        assert_eq!(queue.pop().unwrap().timestamp, 7);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_bound() {
        let mut queue = TxQueue::new(2);
        queue.push(frame(0)).unwrap();
        assert!(!queue.would_overflow(1));
        queue.push(frame(1)).unwrap();
        assert!(queue.would_overflow(1));
        assert!(queue.push(frame(2)).is_err());
        assert_eq!(queue.flush(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_max_len_clamped() {
        assert_eq!(TxQueue::new(0).max_len(), 1);
        assert_eq!(TxQueue::new(1000).max_len(), MAX_OUTPUT_FRAME_QUEUE_SZ);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let big = [0u8; MAX_MEDIA_FRAME_SIZE + 1];
        assert!(MediaFrame::new(0, 1, &big).is_none());
    }
}
