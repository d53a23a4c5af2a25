//! Locked access to a speaker's jitter buffer
//!
//! Both the network path (`ingest`) and the mixer path (`retrieve`, `tick`,
//! `available_count`) go through here. Every primitive call happens under a
//! per-speaker fair lock so packets are put in the order they arrived.

use parking_lot::FairMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

use crate::audio::jitter::{GetStatus, JitterPacket, JitterPrimitive, JitterStats};
use crate::audio::pool::{AudioDataPool, PooledBuffer};
use crate::error::FramingError;
use crate::protocol::{Framing, ParsedPacket};
use crate::speaker::liveness::MissCounter;

/// Outcome of [`JitterAdapter::retrieve`]
#[derive(Debug)]
pub enum Retrieved {
    /// Copy of the stored payload, ready for re-parsing
    Packet(PooledBuffer),
    /// Nothing was ready; carries the consecutive miss count
    Missing { missed: u32 },
}

/// Owner of one speaker's jitter primitive and payload pool
pub struct JitterAdapter {
    primitive: FairMutex<Box<dyn JitterPrimitive>>,
    framing: Framing,
    frame_size: u32,
    pool: AudioDataPool,
    missed: MissCounter,
    /// Set by ingest, taken by the pull side to wake a silent speaker
    revived: AtomicBool,
    packets_ingested: AtomicU64,
    packets_malformed: AtomicU64,
}

impl JitterAdapter {
    /// Wrap `primitive`, configuring its reorder margin (in samples)
    pub fn new(
        mut primitive: Box<dyn JitterPrimitive>,
        framing: Framing,
        margin: u32,
        pool: AudioDataPool,
    ) -> Self {
        primitive.set_margin(margin);

        Self {
            primitive: FairMutex::new(primitive),
            frame_size: framing.frame_size() as u32,
            framing,
            pool,
            missed: MissCounter::new(),
            revived: AtomicBool::new(false),
            packets_ingested: AtomicU64::new(0),
            packets_malformed: AtomicU64::new(0),
        }
    }

    /// Validate a voice payload and queue a pooled copy of it at
    /// `sequence * frame_size`
    pub fn ingest(&self, payload: &[u8], sequence: u64) -> Result<ParsedPacket, FramingError> {
        let parsed = match self.framing.parse(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.packets_malformed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let packet = JitterPacket {
            data: self.pool.copy_of(payload),
            span: parsed.total_samples as u32,
            timestamp: sequence.wrapping_mul(u64::from(self.frame_size)) as u32,
        };

        trace!(
            sequence,
            span = packet.span,
            timestamp = packet.timestamp,
            len = payload.len(),
            "Voice packet queued"
        );

        self.primitive.lock().put(packet);
        self.packets_ingested.fetch_add(1, Ordering::Relaxed);
        self.revived.store(true, Ordering::Release);

        Ok(parsed)
    }

    /// Fetch the entry at the playback pointer.
    ///
    /// A hit resets the missed-frame counter; a miss lets the primitive
    /// adapt its delay and bumps the counter.
    pub fn retrieve(&self) -> Retrieved {
        let mut scratch = self.pool.acquire();
        let mut primitive = self.primitive.lock();

        match primitive.get(&mut scratch, self.frame_size) {
            GetStatus::Ok { .. } => {
                self.missed.reset();
                Retrieved::Packet(scratch)
            }
            GetStatus::Missing | GetStatus::Insertion => {
                primitive.update_delay();
                let missed = self.missed.miss();
                trace!(missed, "Jitter buffer miss");
                Retrieved::Missing { missed }
            }
        }
    }

    /// Entries at or ahead of the playback pointer
    pub fn available_count(&self) -> u32 {
        self.primitive.lock().available_count()
    }

    /// Advance the playback pointer by `frames` frames
    pub fn tick(&self, frames: usize) {
        if frames == 0 {
            return;
        }
        let mut primitive = self.primitive.lock();
        for _ in 0..frames {
            primitive.tick();
        }
    }

    pub fn pointer_timestamp(&self) -> u32 {
        self.primitive.lock().pointer_timestamp()
    }

    /// Consecutive missed retrievals
    pub fn missed_frames(&self) -> u32 {
        self.missed.get()
    }

    pub fn reset_missed(&self) {
        self.missed.reset();
    }

    /// Consume the "packet arrived" mark left by ingest
    pub fn take_revived(&self) -> bool {
        self.revived.swap(false, Ordering::AcqRel)
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size as usize
    }

    pub fn pool(&self) -> &AudioDataPool {
        &self.pool
    }

    pub fn packets_ingested(&self) -> u64 {
        self.packets_ingested.load(Ordering::Relaxed)
    }

    pub fn packets_malformed(&self) -> u64 {
        self.packets_malformed.load(Ordering::Relaxed)
    }

    pub fn jitter_stats(&self) -> Option<JitterStats> {
        self.primitive.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::jitter::ReorderBuffer;
    use std::sync::Arc;

    const FRAME: usize = 480;

    fn adapter() -> JitterAdapter {
        JitterAdapter::new(
            Box::new(ReorderBuffer::new(FRAME as u32, 64)),
            Framing::Legacy { frame_size: FRAME },
            10 * FRAME as u32,
            AudioDataPool::new(128, 16),
        )
    }

    fn legacy_packet(tag: u8) -> Vec<u8> {
        vec![0x00, 0x02, tag, tag]
    }

    fn retrieved_tag(retrieved: Retrieved) -> Option<u8> {
        match retrieved {
            Retrieved::Packet(packet) => Some(packet[2]),
            Retrieved::Missing { .. } => None,
        }
    }

    #[test]
    fn test_ingest_then_retrieve() {
        let adapter = adapter();
        let parsed = adapter.ingest(&legacy_packet(7), 3).unwrap();
        assert_eq!(parsed.total_samples, FRAME);
        assert_eq!(adapter.available_count(), 1);
        assert!(adapter.take_revived());
        assert!(!adapter.take_revived());

        assert_eq!(retrieved_tag(adapter.retrieve()), Some(7));
        assert_eq!(adapter.pointer_timestamp(), 3 * FRAME as u32);
        assert_eq!(adapter.missed_frames(), 0);
    }

    #[test]
    fn test_malformed_is_counted_not_queued() {
        let adapter = adapter();
        assert!(adapter.ingest(&[0x00], 0).is_err());
        assert!(adapter.ingest(&[0x00, 0x09, 1], 0).is_err());
        assert_eq!(adapter.packets_malformed(), 2);
        assert_eq!(adapter.packets_ingested(), 0);
        assert_eq!(adapter.available_count(), 0);
    }

    #[test]
    fn test_misses_count_up_and_reset_on_hit() {
        let adapter = adapter();
        for expected in 1..=5 {
            match adapter.retrieve() {
                Retrieved::Missing { missed } => assert_eq!(missed, expected),
                Retrieved::Packet(_) => panic!("empty buffer returned a packet"),
            }
        }
        assert_eq!(adapter.missed_frames(), 5);

        adapter.ingest(&legacy_packet(1), 0).unwrap();
        assert!(retrieved_tag(adapter.retrieve()).is_some());
        assert_eq!(adapter.missed_frames(), 0);
    }

    #[test]
    fn test_out_of_order_ingest_retrieves_in_order() {
        let adapter = adapter();
        let start = 40u64;
        for offset in [3u64, 0, 4, 2, 1] {
            adapter.ingest(&legacy_packet(offset as u8), start + offset).unwrap();
        }

        for expected in 0..5u8 {
            assert_eq!(retrieved_tag(adapter.retrieve()), Some(expected));
            assert_eq!(
                adapter.pointer_timestamp(),
                (start as u32 + u32::from(expected)) * FRAME as u32
            );
            adapter.tick(1);
        }
    }

    #[test]
    fn test_concurrent_ingest_and_retrieve() {
        let adapter = Arc::new(adapter());
        let writer = {
            let adapter = Arc::clone(&adapter);
            std::thread::spawn(move || {
                for seq in 0..200u64 {
                    adapter.ingest(&legacy_packet(seq as u8), seq).unwrap();
                }
            })
        };

        let mut delivered = 0;
        for _ in 0..400 {
            if let Retrieved::Packet(_) = adapter.retrieve() {
                delivered += 1;
                adapter.tick(1);
            }
        }
        writer.join().unwrap();

        assert!(delivered <= 200);
        assert_eq!(adapter.packets_ingested(), 200);
        // Every buffer came back or is still queued
        assert!(adapter.pool().idle() <= 16);
    }
}
