//! Error types for the voice playout pipeline

use thiserror::Error;

use crate::protocol::Codec;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Jitter buffer error: {0}")]
    Jitter(#[from] JitterError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// PCM buffer growth failed; the speaker's buffer cannot be trusted after this
    #[error("Resource exhausted: could not grow PCM buffer to {requested} samples")]
    ResourceExhausted { requested: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed voice packet errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Read past end of packet at offset {offset} (needed {needed} bytes)")]
    Overrun { offset: usize, needed: usize },

    #[error("Nested varint negation at offset {offset}")]
    NestedNegation { offset: usize },

    #[error("Sample count {samples} is not a multiple of frame size {frame_size}")]
    UnalignedSamples { samples: usize, frame_size: usize },

    #[error("Opus packet introspection failed: {0}")]
    Introspection(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Codec {0:?} is not available in this build")]
    Unsupported(Codec),

    #[error("Output buffer too small: {got} samples, need {need}")]
    OutputTooSmall { got: usize, need: usize },
}

/// Jitter buffer primitive errors
#[derive(Error, Debug)]
pub enum JitterError {
    #[error("Jitter buffer initialization failed")]
    InitFailed,

    #[error("Jitter backend {0} is not available in this build")]
    BackendUnavailable(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
