//! # Voice Playout
//!
//! Receive-side voice pipeline for Mumble-style VoIP clients.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           NETWORK THREAD                             │
//! │   UDP voice packet ──► SpeakerRegistry::receive(speaker, codec, ..)  │
//! │                               │                                      │
//! │                               ▼                                      │
//! │        ┌──────────────────────────────────────────────┐              │
//! │        │  SpeakerIngest (one per remote speaker)      │              │
//! │        │   Framing::parse ─► pooled copy ─► put       │              │
//! │        └──────────────────────┬───────────────────────┘              │
//! └───────────────────────────────┼──────────────────────────────────────┘
//!                                 │ JitterAdapter (per-speaker fair lock)
//! ┌───────────────────────────────┼──────────────────────────────────────┐
//! │                           MIXER THREAD                               │
//! │        ┌──────────────────────┴───────────────────────┐              │
//! │        │  SpeakerOutput::pull(n)                      │              │
//! │        │   retrieve ─► FrameQueue ─► VoiceDecoder     │              │
//! │        │       │                         │            │              │
//! │        │       └── tick per frame ◄──────┤            │              │
//! │        │                                 ▼            │              │
//! │        │                     PcmBuffer ─► samples()   │              │
//! │        └──────────────────────────────────────────────┘              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod speaker;

pub use config::PlayoutConfig;
pub use error::{Error, Result};
pub use protocol::Codec;
pub use session::{SpeakerEvent, SpeakerRegistry};
pub use speaker::{SpeakerAudio, SpeakerId, SpeakerIngest, SpeakerOutput};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Samples per base frame (10 ms at 48 kHz)
    pub const DEFAULT_FRAME_SIZE: usize = 480;

    /// Reorder margin of the jitter buffer, in frames
    pub const DEFAULT_JITTER_MARGIN_FRAMES: u32 = 10;

    /// Entries held by the built-in reorder buffer
    pub const DEFAULT_JITTER_CAPACITY: usize = 200;

    /// Initial size of a pooled payload buffer
    pub const POOL_SLOT_SIZE: usize = 128;

    /// Idle payload buffers kept per speaker
    pub const POOL_CAPACITY: usize = 64;

    /// Largest Opus frame in base frames (120 ms)
    pub const MAX_FRAME_MULTIPLIER: usize = 12;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers
}
