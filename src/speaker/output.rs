//! Mixer-facing half of a speaker: decoding and PCM accumulation

use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::audio::buffer::PcmBuffer;
use crate::codec::VoiceDecoder;
use crate::error::Result;
use crate::speaker::adapter::{JitterAdapter, Retrieved};
use crate::speaker::frames::FrameQueue;
use crate::speaker::liveness::{self, Liveness, PullLiveness, SILENCE_MISS_LIMIT};
use crate::speaker::{CodecProfile, SpeakerId, SpeakerStats};

#[derive(Debug, Default, Clone, Copy)]
struct DecodeCounters {
    frames_decoded: u64,
    frames_concealed: u64,
    silence_frames: u64,
    decode_errors: u64,
    talk_spurts: u64,
}

/// Jitter retrieval, frame queue and decoder for one speaker
struct DecodeStage {
    profile: CodecProfile,
    decoder: Box<dyn VoiceDecoder>,
    adapter: Arc<JitterAdapter>,
    frames: FrameQueue,
    counters: DecodeCounters,
}

impl DecodeStage {
    /// Produce the next frame's worth of samples into `output`, which holds
    /// at least `max_frame_samples`. Returns samples written.
    fn decode_next(&mut self, output: &mut [f32], pull: &mut PullLiveness) -> usize {
        let frame_size = self.profile.frame_size;

        if self.frames.is_empty() {
            // Nothing queued and not yet starving: plain silence, pointer untouched
            if self.adapter.available_count() == 0 && self.adapter.missed_frames() < SILENCE_MISS_LIMIT {
                return self.silence(output);
            }

            match self.adapter.retrieve() {
                Retrieved::Packet(packet) => {
                    if let Err(e) = self.frames.load(packet, &self.profile.framing) {
                        debug!(error = %e, "Dropping undecodable jitter entry");
                    }
                }
                Retrieved::Missing { missed } => pull.record_miss(missed),
            }
        }

        let produced = match self.frames.pop() {
            Some(subframe) if subframe.is_empty() && self.profile.codec.is_legacy() => {
                output[..frame_size].fill(0.0);
                self.counters.silence_frames += 1;
                frame_size
            }
            Some(subframe) => {
                let target = if self.profile.codec.is_legacy() {
                    &mut output[..frame_size]
                } else {
                    &mut output[..self.profile.max_frame_samples]
                };
                match self.decoder.decode(Some(subframe), target) {
                    Ok(samples) if samples > 0 => {
                        self.counters.frames_decoded += 1;
                        trace!(bytes = subframe.len(), samples, "Subframe decoded");
                        samples.min(target.len())
                    }
                    Ok(_) => {
                        self.counters.decode_errors += 1;
                        debug!(bytes = subframe.len(), "Decoder produced no samples, concealing");
                        Self::conceal(&mut *self.decoder, &mut self.counters, output, frame_size)
                    }
                    Err(e) => {
                        self.counters.decode_errors += 1;
                        debug!(error = %e, bytes = subframe.len(), "Decode failed, concealing");
                        Self::conceal(&mut *self.decoder, &mut self.counters, output, frame_size)
                    }
                }
            }
            None => Self::conceal(&mut *self.decoder, &mut self.counters, output, frame_size),
        };

        self.frames.release_drained();
        if self.frames.is_empty() && self.frames.take_terminator() {
            self.end_talk_spurt();
        }
        self.adapter.tick(produced / frame_size);
        produced
    }

    /// Last frame of a talk spurt played: start the next one from a clean
    /// decoder state
    fn end_talk_spurt(&mut self) {
        self.counters.talk_spurts += 1;
        if let Err(e) = self.decoder.reset() {
            debug!(error = %e, "Decoder reset failed");
        }
        trace!(spurts = self.counters.talk_spurts, "Talk spurt ended");
    }

    /// Decode with no input; silence when the decoder cannot conceal either
    fn conceal(
        decoder: &mut dyn VoiceDecoder,
        counters: &mut DecodeCounters,
        output: &mut [f32],
        frame_size: usize,
    ) -> usize {
        let target = &mut output[..frame_size];
        match decoder.decode(None, target) {
            Ok(samples) if samples > 0 => {
                counters.frames_concealed += 1;
                samples.min(frame_size)
            }
            Ok(_) | Err(_) => {
                target.fill(0.0);
                counters.silence_frames += 1;
                frame_size
            }
        }
    }

    fn silence(&mut self, output: &mut [f32]) -> usize {
        let frame_size = self.profile.frame_size;
        output[..frame_size].fill(0.0);
        self.counters.silence_frames += 1;
        frame_size
    }
}

/// Pull side of a speaker.
///
/// Owned by the single mixer thread: `pull` takes `&mut self`, so the PCM
/// buffer and frame queue never need a lock. Only the jitter primitive is
/// shared with the network side.
pub struct SpeakerOutput {
    speaker: SpeakerId,
    stage: DecodeStage,
    pcm: PcmBuffer,
    liveness: Liveness,
}

impl SpeakerOutput {
    pub(crate) fn new(
        speaker: SpeakerId,
        profile: CodecProfile,
        decoder: Box<dyn VoiceDecoder>,
        adapter: Arc<JitterAdapter>,
    ) -> Self {
        Self {
            speaker,
            stage: DecodeStage {
                profile,
                decoder,
                adapter,
                frames: FrameQueue::new(),
                counters: DecodeCounters::default(),
            },
            pcm: PcmBuffer::new(),
            liveness: Liveness::new(),
        }
    }

    /// Make `n` samples available through [`samples`](Self::samples),
    /// decoding as many frames as needed.
    ///
    /// Returns whether the speaker was alive *before* this call; a talk
    /// spurt ending therefore shows up one pull late.
    pub fn pull(&mut self, n: usize) -> Result<bool> {
        if self.stage.adapter.take_revived() && !self.liveness.is_alive() {
            self.stage.adapter.reset_missed();
            self.liveness.revive();
            info!(speaker = %self.speaker, "Speaker resumed talking");
        }

        self.pcm.shift();
        self.pcm.set_consumed(n);

        if self.pcm.filled() >= n {
            return Ok(self.liveness.is_alive());
        }

        let mut pull = self.liveness.begin();
        let max_frame = self.stage.profile.max_frame_samples;

        while self.pcm.filled() < n {
            let region = match self.pcm.reserve_tail(max_frame) {
                Ok(region) => region,
                Err(e) => {
                    let filled = self.pcm.filled();
                    self.pcm.set_consumed(filled);
                    return Err(e);
                }
            };

            let produced = if pull.was_alive() {
                self.stage.decode_next(region, &mut pull)
            } else {
                // Silent speaker: skip the jitter buffer entirely
                self.stage.silence(region)
            };
            self.pcm.commit(produced);
        }

        let was_alive = self.liveness.finish(pull);
        if was_alive && !self.liveness.is_alive() {
            info!(
                speaker = %self.speaker,
                missed = self.stage.adapter.missed_frames(),
                "Speaker stopped talking"
            );
        }
        Ok(was_alive)
    }

    /// Samples handed out by the last pull
    pub fn samples(&self) -> &[f32] {
        self.pcm.consumed_samples()
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Whether the mixer should keep treating this speaker as streaming
    pub fn is_streaming(&self) -> bool {
        liveness::is_streaming(
            self.stage.adapter.missed_frames(),
            self.stage.profile.streaming_threshold,
        )
    }

    pub fn speaker(&self) -> SpeakerId {
        self.speaker
    }

    pub fn profile(&self) -> &CodecProfile {
        &self.stage.profile
    }

    /// Playback position of the jitter buffer, in samples
    pub fn pointer_timestamp(&self) -> u32 {
        self.stage.adapter.pointer_timestamp()
    }

    /// Samples decoded but not yet handed out
    pub fn buffered(&self) -> usize {
        self.pcm.unread()
    }

    /// Cursor snapshot `(consumed, filled, capacity)`
    pub fn cursors(&self) -> (usize, usize, usize) {
        (self.pcm.consumed(), self.pcm.filled(), self.pcm.capacity())
    }

    pub fn stats(&self) -> SpeakerStats {
        let adapter = &self.stage.adapter;
        let counters = self.stage.counters;
        SpeakerStats {
            packets_ingested: adapter.packets_ingested(),
            packets_malformed: adapter.packets_malformed(),
            frames_decoded: counters.frames_decoded,
            frames_concealed: counters.frames_concealed,
            silence_frames: counters.silence_frames,
            decode_errors: counters.decode_errors,
            talk_spurts: counters.talk_spurts,
            missed_frames: adapter.missed_frames(),
            alive: self.liveness.is_alive(),
            jitter: adapter.jitter_stats(),
            decoder: self.stage.decoder.stats(),
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        debug!(speaker = %self.speaker, "Releasing speaker decoder");
    }
}
