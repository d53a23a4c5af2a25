//! Per-speaker audio decode state
//!
//! A [`SpeakerAudio`] is created when a remote speaker starts transmitting
//! and dropped when it leaves; dropping releases the decoder and jitter
//! buffer and returns pooled payload buffers.
//!
//! ```text
//!  network thread                         mixer thread
//!  ──────────────                         ────────────
//!  SpeakerIngest::ingest                  SpeakerOutput::pull
//!        │                                      │
//!        ▼                                      ▼
//!   Framing::parse ──► JitterAdapter ◄── retrieve / tick
//!                     (fair lock)               │
//!                                               ▼
//!                                 FrameQueue ─► VoiceDecoder ─► PcmBuffer
//! ```

pub mod adapter;
pub mod frames;
pub mod liveness;
pub mod output;

pub use adapter::{JitterAdapter, Retrieved};
pub use frames::FrameQueue;
pub use liveness::{Liveness, MissCounter, MISSED_FRAMES_DEAD, SILENCE_MISS_LIMIT};
pub use output::SpeakerOutput;

use std::fmt;
use std::sync::Arc;

use crate::audio::jitter::{create_primitive, JitterPrimitive, JitterStats};
use crate::audio::pool::AudioDataPool;
use crate::codec::{create_decoder, DecoderStats, VoiceDecoder};
use crate::config::PlayoutConfig;
use crate::error::{FramingError, Result};
use crate::protocol::{Codec, Framing, ParsedPacket};

/// Session identifier of a remote speaker. The identity itself lives with
/// the session; audio state only refers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeakerId(pub u32);

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Codec-dependent constants, fixed when the speaker is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecProfile {
    pub codec: Codec,
    pub framing: Framing,
    /// Samples per base frame
    pub frame_size: usize,
    /// Largest single decode output
    pub max_frame_samples: usize,
    /// Missed frames below which the speaker counts as streaming
    pub streaming_threshold: u32,
}

impl CodecProfile {
    pub fn new(codec: Codec, config: &PlayoutConfig) -> Self {
        let frame_size = config.frame_size;
        let max_frame_samples = if codec.is_legacy() {
            frame_size
        } else {
            config.max_frame_samples()
        };
        let streaming_threshold = if codec.is_legacy() {
            MISSED_FRAMES_DEAD
        } else {
            // The buffer spans several frames per packet, so tolerate more
            (max_frame_samples / frame_size) as u32
        };

        Self {
            codec,
            framing: Framing::for_codec(codec, frame_size, config.sample_rate),
            frame_size,
            max_frame_samples,
            streaming_threshold,
        }
    }
}

/// Statistics snapshot for one speaker
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerStats {
    pub packets_ingested: u64,
    pub packets_malformed: u64,
    pub frames_decoded: u64,
    pub frames_concealed: u64,
    pub silence_frames: u64,
    pub decode_errors: u64,
    /// Terminator packets played out
    pub talk_spurts: u64,
    pub missed_frames: u32,
    pub alive: bool,
    pub jitter: Option<JitterStats>,
    pub decoder: Option<DecoderStats>,
}

/// Network-facing half of a speaker. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct SpeakerIngest {
    speaker: SpeakerId,
    profile: CodecProfile,
    adapter: Arc<JitterAdapter>,
}

impl SpeakerIngest {
    /// Queue a voice payload carrying `sequence`
    pub fn ingest(&self, payload: &[u8], sequence: u64) -> std::result::Result<ParsedPacket, FramingError> {
        self.adapter.ingest(payload, sequence)
    }

    pub fn speaker(&self) -> SpeakerId {
        self.speaker
    }

    pub fn codec(&self) -> Codec {
        self.profile.codec
    }

    pub fn is_streaming(&self) -> bool {
        liveness::is_streaming(self.adapter.missed_frames(), self.profile.streaming_threshold)
    }

    pub fn adapter(&self) -> &JitterAdapter {
        &self.adapter
    }
}

/// Complete audio state of one remote speaker
pub struct SpeakerAudio {
    ingest: SpeakerIngest,
    output: SpeakerOutput,
}

impl SpeakerAudio {
    /// Create the audio state for `speaker` with the decoder and jitter
    /// backend selected by `config`
    pub fn new(speaker: SpeakerId, codec: Codec, config: &PlayoutConfig) -> Result<Self> {
        config.validate()?;
        let decoder = create_decoder(codec, config)?;
        let primitive = create_primitive(config)?;
        Ok(Self::with_parts(speaker, codec, config, decoder, primitive))
    }

    /// Assemble a speaker from an explicit decoder and jitter primitive
    pub fn with_parts(
        speaker: SpeakerId,
        codec: Codec,
        config: &PlayoutConfig,
        decoder: Box<dyn VoiceDecoder>,
        primitive: Box<dyn JitterPrimitive>,
    ) -> Self {
        let profile = CodecProfile::new(codec, config);
        let pool = AudioDataPool::new(config.pool_slot_size, config.pool_capacity);
        let adapter = Arc::new(JitterAdapter::new(
            primitive,
            profile.framing,
            config.jitter_margin(),
            pool,
        ));

        tracing::info!(%speaker, ?codec, frame_size = profile.frame_size, "Speaker audio created");

        Self {
            ingest: SpeakerIngest {
                speaker,
                profile,
                adapter: Arc::clone(&adapter),
            },
            output: SpeakerOutput::new(speaker, profile, decoder, adapter),
        }
    }

    /// Separate the network and mixer halves so they can live on different
    /// threads
    pub fn split(self) -> (SpeakerIngest, SpeakerOutput) {
        (self.ingest, self.output)
    }

    pub fn ingest(&self, payload: &[u8], sequence: u64) -> std::result::Result<ParsedPacket, FramingError> {
        self.ingest.ingest(payload, sequence)
    }

    pub fn pull(&mut self, n: usize) -> Result<bool> {
        self.output.pull(n)
    }

    pub fn samples(&self) -> &[f32] {
        self.output.samples()
    }

    pub fn is_alive(&self) -> bool {
        self.output.is_alive()
    }

    pub fn is_streaming(&self) -> bool {
        self.output.is_streaming()
    }

    pub fn speaker(&self) -> SpeakerId {
        self.output.speaker()
    }

    pub fn codec(&self) -> Codec {
        self.ingest.codec()
    }

    pub fn output(&self) -> &SpeakerOutput {
        &self.output
    }

    pub fn stats(&self) -> SpeakerStats {
        self.output.stats()
    }
}
