//! Timestamp-ordered reorder buffers
//!
//! [`JitterPrimitive`] is the narrow put/get/tick/ctl surface the speaker
//! adapter drives. [`ReorderBuffer`] is the built-in implementation; the
//! speexdsp jitter buffer can be swapped in behind the same trait.
//!
//! Timestamps are in samples and wrap at `u32::MAX`, so every ordering
//! comparison goes through wrapping subtraction.

use tracing::{trace, warn};

use crate::audio::pool::PooledBuffer;
use crate::config::{JitterBackend, PlayoutConfig};
use crate::error::JitterError;

/// Entry handed to a jitter primitive
#[derive(Debug)]
pub struct JitterPacket {
    pub data: PooledBuffer,
    /// Decoded samples this entry represents
    pub span: u32,
    /// Position of the first sample, `sequence * frame_size`
    pub timestamp: u32,
}

/// Outcome of [`JitterPrimitive::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetStatus {
    /// An entry was copied into the scratch buffer
    Ok {
        timestamp: u32,
        span: u32,
        /// Offset of the entry start relative to the playback pointer
        start_offset: i32,
    },
    /// Nothing is ready for the current slot
    Missing,
    /// The primitive asks for a frame to be synthesized
    Insertion,
}

/// Reorder-by-timestamp buffer primitive
pub trait JitterPrimitive: Send {
    /// Hand an entry to the buffer
    fn put(&mut self, packet: JitterPacket);

    /// Copy the entry at the playback pointer into `scratch`
    fn get(&mut self, scratch: &mut PooledBuffer, desired_span: u32) -> GetStatus;

    /// Report a missed slot so the buffer can adapt its delay
    fn update_delay(&mut self);

    /// Advance the playback pointer by one frame
    fn tick(&mut self);

    /// Set the reorder margin in samples
    fn set_margin(&mut self, margin: u32);

    /// Entries at or ahead of the playback pointer
    fn available_count(&self) -> u32;

    /// Current playback pointer
    fn pointer_timestamp(&self) -> u32;

    /// Statistics snapshot, when the primitive keeps any
    fn stats(&self) -> Option<JitterStats> {
        None
    }
}

/// Build the primitive selected by the configuration
pub fn create_primitive(config: &PlayoutConfig) -> Result<Box<dyn JitterPrimitive>, JitterError> {
    match config.jitter_backend {
        JitterBackend::Builtin => Ok(Box::new(ReorderBuffer::new(
            config.frame_size as u32,
            config.jitter_capacity,
        ))),
        #[cfg(feature = "speexdsp")]
        JitterBackend::Speex => Ok(Box::new(crate::audio::speex::SpeexJitterBuffer::new(
            config.frame_size as u32,
        )?)),
        #[cfg(not(feature = "speexdsp"))]
        JitterBackend::Speex => Err(JitterError::BackendUnavailable("speex".into())),
    }
}

/// `a < b` on wrapping timestamps
fn lt32(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a <= b` on wrapping timestamps
fn le32(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

/// Consecutive misses after which the buffer drops its sync and re-anchors
/// on the oldest pending entry
pub const RESYNC_AFTER_LOSSES: u32 = 20;

/// Built-in jitter buffer.
///
/// Entries live in a fixed set of slots and are found by linear scan, which
/// is cheap for the few dozen entries a speaker ever has in flight. The
/// playback pointer moves only on [`tick`](JitterPrimitive::tick); a
/// successful `get` does not advance it, so a multi-frame entry keeps the
/// pointer inside its span until the decoded frames have been ticked off.
pub struct ReorderBuffer {
    /// Entry slots
    slots: Vec<Option<JitterPacket>>,
    /// Samples per tick
    frame_size: u32,
    /// Reorder tolerance in samples
    margin: u32,
    /// Playback pointer
    pointer: u32,
    /// Whether the pointer has been anchored to a received entry
    synced: bool,
    /// Consecutive missed gets
    lost_count: u32,
    stats: JitterStats,
}

impl ReorderBuffer {
    /// Create a reorder buffer holding at most `capacity` entries
    pub fn new(frame_size: u32, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity.max(1), || None);

        Self {
            slots,
            frame_size,
            margin: 0,
            pointer: 0,
            synced: false,
            lost_count: 0,
            stats: JitterStats {
                capacity: capacity.max(1),
                ..JitterStats::default()
            },
        }
    }

    fn is_late(&self, timestamp: u32, span: u32) -> bool {
        self.synced && le32(timestamp.wrapping_add(span), self.pointer)
    }

    fn oldest_index(&self) -> Option<usize> {
        let mut oldest: Option<(usize, u32)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(packet) = slot {
                match oldest {
                    Some((_, ts)) if !lt32(packet.timestamp, ts) => {}
                    _ => oldest = Some((i, packet.timestamp)),
                }
            }
        }
        oldest.map(|(i, _)| i)
    }

    fn purge_late(&mut self) {
        for i in 0..self.slots.len() {
            let late = match &self.slots[i] {
                Some(packet) => self.is_late(packet.timestamp, packet.span),
                None => false,
            };
            if late {
                self.slots[i] = None;
                self.stats.late += 1;
            }
        }
    }

    /// Slot of the entry starting at the pointer, or else one covering it
    fn find_current(&self) -> Option<usize> {
        let mut covering = None;
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(packet) = slot else { continue };
            if packet.timestamp == self.pointer {
                return Some(i);
            }
            let end = packet.timestamp.wrapping_add(packet.span);
            if lt32(packet.timestamp, self.pointer) && lt32(self.pointer, end) {
                covering = Some(i);
            }
        }
        covering
    }

    fn deliver(&mut self, index: usize, scratch: &mut PooledBuffer) -> GetStatus {
        let Some(packet) = self.slots[index].take() else {
            return GetStatus::Missing;
        };

        scratch.copy_from(&packet.data);
        self.lost_count = 0;
        self.stats.delivered += 1;

        trace!(
            timestamp = packet.timestamp,
            span = packet.span,
            pointer = self.pointer,
            "Jitter entry delivered"
        );

        GetStatus::Ok {
            timestamp: packet.timestamp,
            span: packet.span,
            start_offset: packet.timestamp.wrapping_sub(self.pointer) as i32,
        }
        // `packet.data` drops here and returns to its pool
    }

    /// Get statistics
    pub fn stats(&self) -> JitterStats {
        JitterStats {
            level: self.slots.iter().filter(|s| s.is_some()).count(),
            ..self.stats.clone()
        }
    }
}

impl JitterPrimitive for ReorderBuffer {
    fn put(&mut self, packet: JitterPacket) {
        self.stats.received += 1;

        if self.is_late(packet.timestamp, packet.span) {
            self.stats.late += 1;
            trace!(
                timestamp = packet.timestamp,
                pointer = self.pointer,
                "Late jitter entry dropped"
            );
            return;
        }

        let index = match self.slots.iter().position(|s| s.is_none()) {
            Some(index) => index,
            None => {
                // Full: make room by evicting the oldest entry
                let Some(oldest) = self.oldest_index() else { return };
                self.stats.overflow += 1;
                warn!("Jitter buffer full, evicting oldest entry");
                oldest
            }
        };

        self.slots[index] = Some(packet);
    }

    fn get(&mut self, scratch: &mut PooledBuffer, _desired_span: u32) -> GetStatus {
        if !self.synced {
            let Some(oldest) = self.oldest_index() else {
                return GetStatus::Missing;
            };
            if let Some(packet) = &self.slots[oldest] {
                self.pointer = packet.timestamp;
            }
            self.synced = true;
        }

        self.purge_late();

        if let Some(index) = self.find_current() {
            return self.deliver(index, scratch);
        }

        // A pending entry far beyond the reorder window, after a full run of
        // losses, means a new talk spurt started while the pointer stalled
        if self.lost_count >= RESYNC_AFTER_LOSSES {
            if let Some(oldest) = self.oldest_index() {
                let ahead = self.slots[oldest]
                    .as_ref()
                    .map(|p| p.timestamp.wrapping_sub(self.pointer))
                    .unwrap_or(0);
                if ahead > self.margin {
                    warn!(
                        pointer = self.pointer,
                        ahead, "Jitter pointer resynced to pending entry"
                    );
                    self.stats.resyncs += 1;
                    if let Some(packet) = &self.slots[oldest] {
                        self.pointer = packet.timestamp;
                    }
                    return self.deliver(oldest, scratch);
                }
            }
        }

        self.stats.lost += 1;
        GetStatus::Missing
    }

    fn update_delay(&mut self) {
        self.lost_count += 1;
        if self.lost_count > RESYNC_AFTER_LOSSES {
            trace!(lost = self.lost_count, "Jitter buffer dropping sync");
            self.synced = false;
            self.lost_count = 0;
        }
    }

    fn tick(&mut self) {
        if self.synced {
            self.pointer = self.pointer.wrapping_add(self.frame_size);
        }
    }

    fn set_margin(&mut self, margin: u32) {
        self.margin = margin;
    }

    fn available_count(&self) -> u32 {
        self.slots
            .iter()
            .flatten()
            .filter(|p| !self.synced || le32(self.pointer, p.timestamp))
            .count() as u32
    }

    fn pointer_timestamp(&self) -> u32 {
        self.pointer
    }

    fn stats(&self) -> Option<JitterStats> {
        Some(ReorderBuffer::stats(self))
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterStats {
    pub level: usize,
    pub capacity: usize,
    pub received: u64,
    pub delivered: u64,
    pub lost: u64,
    pub late: u64,
    pub overflow: u64,
    pub resyncs: u64,
}

impl JitterStats {
    pub fn loss_rate(&self) -> f32 {
        if self.delivered + self.lost == 0 {
            0.0
        } else {
            self.lost as f32 / (self.delivered + self.lost) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pool::AudioDataPool;

    const FRAME: u32 = 480;

    fn packet(pool: &AudioDataPool, seq: u32, span_frames: u32) -> JitterPacket {
        JitterPacket {
            data: pool.copy_of(&seq.to_le_bytes()),
            span: span_frames * FRAME,
            timestamp: seq * FRAME,
        }
    }

    fn buffer() -> ReorderBuffer {
        let mut jb = ReorderBuffer::new(FRAME, 32);
        jb.set_margin(10 * FRAME);
        jb
    }

    #[test]
    fn test_reorders_by_timestamp() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();

        for seq in [12, 10, 11] {
            jb.put(packet(&pool, seq, 1));
        }
        assert_eq!(jb.available_count(), 3);

        for expected in [10u32, 11, 12] {
            match jb.get(&mut scratch, FRAME) {
                GetStatus::Ok { timestamp, .. } => assert_eq!(timestamp, expected * FRAME),
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(&*scratch, &expected.to_le_bytes());
            jb.tick();
        }
        assert_eq!(jb.get(&mut scratch, FRAME), GetStatus::Missing);
    }

    #[test]
    fn test_empty_buffer_is_missing() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();
        assert_eq!(jb.get(&mut scratch, FRAME), GetStatus::Missing);
        assert_eq!(jb.available_count(), 0);
    }

    #[test]
    fn test_gap_within_margin_reports_missing() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();

        jb.put(packet(&pool, 0, 1));
        assert!(matches!(jb.get(&mut scratch, FRAME), GetStatus::Ok { .. }));
        jb.tick();

        jb.put(packet(&pool, 3, 1));
        assert_eq!(jb.get(&mut scratch, FRAME), GetStatus::Missing);
        jb.tick();
        assert_eq!(jb.get(&mut scratch, FRAME), GetStatus::Missing);
        jb.tick();
        assert!(matches!(
            jb.get(&mut scratch, FRAME),
            GetStatus::Ok { timestamp, .. } if timestamp == 3 * FRAME
        ));
        assert_eq!(jb.stats().lost, 2);
    }

    #[test]
    fn test_resync_beyond_margin() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();

        jb.put(packet(&pool, 0, 1));
        assert!(matches!(jb.get(&mut scratch, FRAME), GetStatus::Ok { .. }));
        jb.tick();

        jb.put(packet(&pool, 500, 1));
        // Far ahead, but the pointer keeps walking until a full run of losses
        for _ in 0..RESYNC_AFTER_LOSSES {
            assert_eq!(jb.get(&mut scratch, FRAME), GetStatus::Missing);
            jb.update_delay();
            jb.tick();
        }
        assert_eq!(jb.stats().resyncs, 0);

        assert!(matches!(
            jb.get(&mut scratch, FRAME),
            GetStatus::Ok { timestamp, start_offset: 0, .. } if timestamp == 500 * FRAME
        ));
        assert_eq!(jb.pointer_timestamp(), 500 * FRAME);
        assert_eq!(jb.stats().resyncs, 1);
    }

    #[test]
    fn test_late_entries_dropped() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();

        jb.put(packet(&pool, 5, 1));
        assert!(jb.get(&mut scratch, FRAME) != GetStatus::Missing);
        jb.tick();

        jb.put(packet(&pool, 4, 1));
        assert_eq!(jb.available_count(), 0);
        assert_eq!(jb.stats().late, 1);
    }

    #[test]
    fn test_multi_frame_entry_holds_pointer_until_ticked() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();

        jb.put(packet(&pool, 0, 2));
        jb.put(packet(&pool, 2, 1));
        assert!(matches!(jb.get(&mut scratch, FRAME), GetStatus::Ok { span, .. } if span == 2 * FRAME));
        jb.tick();
        jb.tick();
        assert!(matches!(
            jb.get(&mut scratch, FRAME),
            GetStatus::Ok { timestamp, .. } if timestamp == 2 * FRAME
        ));
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = ReorderBuffer::new(FRAME, 2);
        let mut scratch = pool.acquire();

        jb.put(packet(&pool, 1, 1));
        jb.put(packet(&pool, 2, 1));
        jb.put(packet(&pool, 3, 1));
        assert_eq!(jb.stats().overflow, 1);
        assert!(matches!(
            jb.get(&mut scratch, FRAME),
            GetStatus::Ok { timestamp, .. } if timestamp == 2 * FRAME
        ));
    }

    #[test]
    fn test_sustained_loss_drops_sync() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();

        jb.put(packet(&pool, 0, 1));
        assert!(matches!(jb.get(&mut scratch, FRAME), GetStatus::Ok { .. }));
        jb.tick();
        jb.put(packet(&pool, 8, 1));

        for _ in 0..=RESYNC_AFTER_LOSSES {
            jb.update_delay();
        }
        // Unsynced: the next get anchors on the pending entry
        assert!(matches!(
            jb.get(&mut scratch, FRAME),
            GetStatus::Ok { timestamp, .. } if timestamp == 8 * FRAME
        ));
    }

    #[test]
    fn test_entries_return_to_pool() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();

        jb.put(packet(&pool, 0, 1));
        assert_eq!(pool.idle(), 0);
        jb.get(&mut scratch, FRAME);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_timestamps_wrap() {
        let pool = AudioDataPool::new(16, 8);
        let mut jb = buffer();
        let mut scratch = pool.acquire();
        let start = u32::MAX - FRAME + 1;

        jb.put(JitterPacket {
            data: pool.copy_of(&[1]),
            span: FRAME,
            timestamp: start,
        });
        jb.put(JitterPacket {
            data: pool.copy_of(&[2]),
            span: FRAME,
            timestamp: 0,
        });

        assert!(matches!(jb.get(&mut scratch, FRAME), GetStatus::Ok { timestamp, .. } if timestamp == start));
        jb.tick();
        assert!(matches!(jb.get(&mut scratch, FRAME), GetStatus::Ok { timestamp: 0, .. }));
    }
}
