//! Subframe queue for the packet currently being decoded

use std::collections::VecDeque;
use std::ops::Range;

use crate::audio::pool::PooledBuffer;
use crate::error::FramingError;
use crate::protocol::Framing;

/// FIFO of subframes from one retrieved jitter entry.
///
/// Holds the retrieved copy and hands out slices of it in order; the copy
/// goes back to its pool once the queue is drained.
#[derive(Debug, Default)]
pub struct FrameQueue {
    packet: Option<PooledBuffer>,
    pending: VecDeque<Range<usize>>,
    terminator: bool,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue contents with the subframes of `packet`
    pub fn load(&mut self, packet: PooledBuffer, framing: &Framing) -> Result<usize, FramingError> {
        self.pending.clear();
        self.packet = None;
        self.terminator = false;

        let parsed = framing.parse(&packet)?;
        self.pending.extend(parsed.subframes);
        self.terminator = parsed.terminator;
        self.packet = Some(packet);
        Ok(self.pending.len())
    }

    /// Next subframe in arrival order
    pub fn pop(&mut self) -> Option<&[u8]> {
        let range = self.pending.pop_front()?;
        self.packet.as_deref().map(|packet| &packet[range])
    }

    /// Return the packet copy to its pool once every subframe is consumed
    pub fn release_drained(&mut self) {
        if self.pending.is_empty() {
            self.packet = None;
        }
    }

    /// Whether the loaded packet ended a talk spurt. Clears the mark.
    pub fn take_terminator(&mut self) -> bool {
        std::mem::take(&mut self.terminator)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pool::AudioDataPool;

    #[test]
    fn test_pops_in_order_and_releases() {
        let pool = AudioDataPool::new(32, 4);
        let framing = Framing::Legacy { frame_size: 480 };
        let mut queue = FrameQueue::new();

        let packet = pool.copy_of(&[0x00, 0x82, 1, 2, 0x81, 3, 0x00]);
        assert_eq!(queue.load(packet, &framing).unwrap(), 2);

        assert_eq!(queue.pop(), Some(&[1u8, 2][..]));
        queue.release_drained();
        assert_eq!(pool.idle(), 0);

        assert_eq!(queue.pop(), Some(&[3u8][..]));
        queue.release_drained();
        assert_eq!(pool.idle(), 1);
        assert!(queue.pop().is_none());
        assert!(queue.take_terminator());
        assert!(!queue.take_terminator());
    }

    #[test]
    fn test_malformed_packet_leaves_queue_empty() {
        let pool = AudioDataPool::new(32, 4);
        let framing = Framing::Legacy { frame_size: 480 };
        let mut queue = FrameQueue::new();

        assert!(queue.load(pool.copy_of(&[0x00, 0x05, 1]), &framing).is_err());
        assert!(queue.is_empty());
        assert_eq!(pool.idle(), 1);
    }
}
