//! Opus decoder wrapper
//!
//! Provides Opus decoding with packet loss concealment.

use opus::{Channels, Decoder};

use crate::codec::VoiceDecoder;
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: u32,
    channels: u16,
    /// Frames decoded
    frames_decoded: u64,
    /// Frames concealed (PLC used)
    frames_concealed: u64,
    /// Total samples produced
    samples_produced: u64,
    /// State resets at talk spurt ends
    resets: u64,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(CodecError::DecoderInit(
                format!("Unsupported channel count: {}", channels)
            )),
        };

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            sample_rate,
            channels,
            frames_decoded: 0,
            frames_concealed: 0,
            samples_produced: 0,
            resets: 0,
        })
    }

    /// Decode an Opus packet into `output`.
    /// Returns samples per channel written.
    pub fn decode_into(&mut self, data: &[u8], output: &mut [f32]) -> Result<usize, CodecError> {
        let samples = self.decoder
            .decode_float(data, output, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_decoded += 1;
        self.samples_produced += samples as u64;
        Ok(samples)
    }

    /// Generate packet loss concealment samples filling `output`
    pub fn conceal_into(&mut self, output: &mut [f32]) -> Result<usize, CodecError> {
        let samples = self.decoder
            .decode_float(&[], output, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_concealed += 1;
        self.samples_produced += samples as u64;
        Ok(samples)
    }

    /// Get sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

}

impl VoiceDecoder for OpusDecoder {
    fn decode(&mut self, data: Option<&[u8]>, output: &mut [f32]) -> Result<usize, CodecError> {
        match data {
            Some(data) => self.decode_into(data, output),
            None => self.conceal_into(output),
        }
    }

    fn reset(&mut self) -> Result<(), CodecError> {
        self.resets += 1;
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    fn stats(&self) -> Option<DecoderStats> {
        Some(DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_concealed: self.frames_concealed,
            samples_produced: self.samples_produced,
            resets: self.resets,
        })
    }
}

/// Decoder statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_concealed: u64,
    pub samples_produced: u64,
    pub resets: u64,
}
