//! Voice packet protocol definitions
//!
//! Codec identifiers and the on-wire framing of voice payloads.

pub mod framer;
pub mod stream;

pub use framer::{Framing, ParsedPacket};
pub use stream::{put_varint, PacketReader};

use serde::{Deserialize, Serialize};

/// Codec negotiated for a speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// CELT 0.7 bitstream
    CeltAlpha,
    /// CELT 0.11 bitstream
    CeltBeta,
    /// Opus, variable frame durations
    Opus,
}

impl Codec {
    /// Map a UDP voice message type to its codec
    pub fn from_udp_type(message_type: u8) -> Option<Self> {
        match message_type {
            0 => Some(Codec::CeltAlpha),
            3 => Some(Codec::CeltBeta),
            4 => Some(Codec::Opus),
            _ => None,
        }
    }

    /// UDP voice message type carrying this codec
    pub fn udp_type(self) -> u8 {
        match self {
            Codec::CeltAlpha => 0,
            Codec::CeltBeta => 3,
            Codec::Opus => 4,
        }
    }

    /// Whether the codec uses the legacy fixed-frame framing
    pub fn is_legacy(self) -> bool {
        matches!(self, Codec::CeltAlpha | Codec::CeltBeta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_type_mapping() {
        for codec in [Codec::CeltAlpha, Codec::CeltBeta, Codec::Opus] {
            assert_eq!(Codec::from_udp_type(codec.udp_type()), Some(codec));
        }
        // Ping and Speex types are not decodable voice
        assert_eq!(Codec::from_udp_type(1), None);
        assert_eq!(Codec::from_udp_type(2), None);
    }

    #[test]
    fn test_codec_from_toml_name() {
        #[derive(Deserialize)]
        struct Wrapper {
            codec: Codec,
        }
        let w: Wrapper = toml::from_str("codec = \"celt_beta\"").unwrap();
        assert_eq!(w.codec, Codec::CeltBeta);
        assert!(w.codec.is_legacy());
    }
}
