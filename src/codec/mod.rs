//! Voice decoders
//!
//! Every speaker owns one decoder chosen from its codec at construction.
//! Decoders write mono `f32` PCM and conceal a lost frame when called
//! without input.

pub mod decoder;
#[cfg(feature = "celt")]
pub mod celt;

pub use decoder::{DecoderStats, OpusDecoder};

use crate::config::PlayoutConfig;
use crate::error::CodecError;
use crate::protocol::Codec;

/// Decoder for one speaker's voice stream
pub trait VoiceDecoder: Send {
    /// Decode one subframe into `output`, or synthesize a concealment frame
    /// when `data` is `None`. Returns the number of samples written.
    fn decode(&mut self, data: Option<&[u8]>, output: &mut [f32]) -> Result<usize, CodecError>;

    /// Drop inter-frame state at the end of a talk spurt
    fn reset(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn stats(&self) -> Option<DecoderStats> {
        None
    }
}

/// Create the decoder for `codec`
pub fn create_decoder(
    codec: Codec,
    config: &PlayoutConfig,
) -> Result<Box<dyn VoiceDecoder>, CodecError> {
    match codec {
        Codec::Opus => Ok(Box::new(OpusDecoder::new(config.sample_rate, 1)?)),
        #[cfg(feature = "celt")]
        Codec::CeltAlpha | Codec::CeltBeta => Ok(Box::new(celt::CeltDecoder::new(
            config.sample_rate,
            config.frame_size,
        )?)),
        #[cfg(not(feature = "celt"))]
        Codec::CeltAlpha | Codec::CeltBeta => Err(CodecError::Unsupported(codec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_always_available() {
        let config = PlayoutConfig::default();
        assert!(create_decoder(Codec::Opus, &config).is_ok());
    }

    #[cfg(not(feature = "celt"))]
    #[test]
    fn test_celt_requires_feature() {
        let config = PlayoutConfig::default();
        assert!(matches!(
            create_decoder(Codec::CeltAlpha, &config),
            Err(CodecError::Unsupported(Codec::CeltAlpha))
        ));
    }
}
