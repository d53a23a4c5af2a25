//! Voice packet framing
//!
//! A voice payload starts with one flags byte followed by a run of
//! size-prefixed subframes. Two encodings exist:
//!
//! * **Legacy (CELT)**: one header byte per subframe. The low 7 bits hold the
//!   subframe length, the high bit says another header follows. Every header
//!   accounts for one frame of audio, including a bare `0x00` terminator.
//! * **Modern (Opus)**: a single variable-length integer. The low 13 bits
//!   hold the body length and bit 13 marks the end of a talk spurt. A zero
//!   length body is a terminator worth one frame of silence.

use std::ops::Range;

use crate::error::FramingError;
use crate::protocol::stream::PacketReader;
use crate::protocol::Codec;

const LEGACY_LENGTH_MASK: u8 = 0x7f;
const LEGACY_CONTINUATION: u8 = 0x80;
const MODERN_LENGTH_MASK: u64 = (1 << 13) - 1;
const MODERN_TERMINATOR: u64 = 1 << 13;

/// Result of parsing one voice payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    /// Leading flags byte (not interpreted here)
    pub flags: u8,
    /// Bytes of the payload consumed by the framing
    pub consumed: usize,
    /// Subframe positions within the payload, in decode order
    pub subframes: Vec<Range<usize>>,
    /// Decoded samples this packet represents
    pub total_samples: usize,
    /// End of talk spurt
    pub terminator: bool,
}

impl ParsedPacket {
    /// Iterate the subframe bodies of `payload`, which must be the buffer this
    /// packet was parsed from
    pub fn subframes_in<'a>(&'a self, payload: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.subframes.iter().map(move |range| &payload[range.clone()])
    }

    /// Number of frames represented, given the frame size used for parsing
    pub fn frames(&self, frame_size: usize) -> usize {
        self.total_samples / frame_size
    }
}

/// Framing rules selected once per speaker from its codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Legacy { frame_size: usize },
    Modern { frame_size: usize, sample_rate: u32 },
}

impl Framing {
    pub fn for_codec(codec: Codec, frame_size: usize, sample_rate: u32) -> Self {
        if codec.is_legacy() {
            Framing::Legacy { frame_size }
        } else {
            Framing::Modern {
                frame_size,
                sample_rate,
            }
        }
    }

    /// Samples per base frame
    pub fn frame_size(&self) -> usize {
        match *self {
            Framing::Legacy { frame_size } | Framing::Modern { frame_size, .. } => frame_size,
        }
    }

    /// Parse a voice payload
    pub fn parse(&self, payload: &[u8]) -> Result<ParsedPacket, FramingError> {
        if payload.len() < 2 {
            return Err(FramingError::TooShort(payload.len()));
        }

        let mut reader = PacketReader::new(payload);
        let flags = reader.next_byte()?;

        let mut packet = ParsedPacket {
            flags,
            consumed: 0,
            subframes: Vec::new(),
            total_samples: 0,
            terminator: false,
        };

        match *self {
            Framing::Legacy { frame_size } => parse_legacy(&mut reader, frame_size, &mut packet)?,
            Framing::Modern {
                frame_size,
                sample_rate,
            } => parse_modern(&mut reader, payload, frame_size, sample_rate, &mut packet)?,
        }

        packet.consumed = reader.offset();
        Ok(packet)
    }
}

fn parse_legacy(
    reader: &mut PacketReader<'_>,
    frame_size: usize,
    packet: &mut ParsedPacket,
) -> Result<(), FramingError> {
    loop {
        let header = reader.next_byte()?;
        packet.total_samples += frame_size;

        if header == 0 {
            packet.terminator = true;
        } else {
            let len = usize::from(header & LEGACY_LENGTH_MASK);
            packet.subframes.push(reader.block(len)?);
        }

        if header & LEGACY_CONTINUATION == 0 {
            return Ok(());
        }
    }
}

fn parse_modern(
    reader: &mut PacketReader<'_>,
    payload: &[u8],
    frame_size: usize,
    sample_rate: u32,
    packet: &mut ParsedPacket,
) -> Result<(), FramingError> {
    let header = reader.read_varint()?;
    let len = (header & MODERN_LENGTH_MASK) as usize;
    packet.terminator = header & MODERN_TERMINATOR != 0;

    if len == 0 {
        packet.total_samples = frame_size;
        packet.terminator = true;
        return Ok(());
    }

    let range = reader.block(len)?;
    let samples = opus_packet_samples(&payload[range.clone()], sample_rate)?;
    if samples == 0 || samples % frame_size != 0 {
        return Err(FramingError::UnalignedSamples {
            samples,
            frame_size,
        });
    }

    packet.total_samples = samples;
    packet.subframes.push(range);
    Ok(())
}

/// Decoded sample count of an Opus packet: frame count times samples per frame
fn opus_packet_samples(body: &[u8], sample_rate: u32) -> Result<usize, FramingError> {
    let frames = opus::packet::get_nb_frames(body)
        .map_err(|e| FramingError::Introspection(e.to_string()))?;
    let per_frame = opus::packet::get_samples_per_frame(body, sample_rate)
        .map_err(|e| FramingError::Introspection(e.to_string()))?;
    Ok(frames * per_frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FRAME: usize = 480;

    fn legacy() -> Framing {
        Framing::Legacy { frame_size: FRAME }
    }

    fn modern() -> Framing {
        Framing::Modern {
            frame_size: FRAME,
            sample_rate: 48_000,
        }
    }

    #[test]
    fn test_rejects_short_payload() {
        assert_eq!(legacy().parse(&[0x00]), Err(FramingError::TooShort(1)));
        assert_eq!(modern().parse(&[]), Err(FramingError::TooShort(0)));
    }

    #[test]
    fn test_legacy_single_subframe() {
        let mut payload = vec![0x00, 0x0a];
        payload.extend_from_slice(&[7u8; 10]);

        let packet = legacy().parse(&payload).unwrap();
        assert_eq!(packet.subframes, vec![2..12]);
        assert_eq!(packet.total_samples, FRAME);
        assert!(!packet.terminator);
        assert_eq!(packet.consumed, 12);
    }

    #[test]
    fn test_legacy_subframes_then_terminator() {
        let mut payload = vec![0x20, 0x83, 1, 2, 3, 0x82, 4, 5, 0x00];
        payload.extend_from_slice(b"trailing");

        let packet = legacy().parse(&payload).unwrap();
        assert_eq!(packet.flags, 0x20);
        let bodies: Vec<&[u8]> = packet.subframes_in(&payload).collect();
        assert_eq!(bodies, vec![&[1u8, 2, 3][..], &[4u8, 5][..]]);
        assert_eq!(packet.total_samples, 3 * FRAME);
        assert_eq!(packet.frames(FRAME), 3);
        assert!(packet.terminator);
        // Parsing stops at the terminator header
        assert_eq!(packet.consumed, 9);
    }

    #[test]
    fn test_legacy_overrun() {
        // Declares 10 bytes but carries 3
        let payload = [0x00, 0x0a, 1, 2, 3];
        assert!(matches!(
            legacy().parse(&payload),
            Err(FramingError::Overrun { .. })
        ));

        // Continuation bit set on the last header
        let payload = [0x00, 0x81, 9];
        assert!(matches!(
            legacy().parse(&payload),
            Err(FramingError::Overrun { .. })
        ));
    }

    #[test]
    fn test_modern_zero_length_is_terminator() {
        let packet = modern().parse(&[0x80, 0x00]).unwrap();
        assert!(packet.subframes.is_empty());
        assert_eq!(packet.total_samples, FRAME);
        assert!(packet.terminator);
    }

    #[test]
    fn test_modern_single_frame() {
        // TOC 0xF8: CELT fullband 20 ms, one frame
        let payload = [0x80, 0x03, 0xf8, 0xff, 0xfe];
        let packet = modern().parse(&payload).unwrap();
        assert_eq!(packet.subframes, vec![2..5]);
        assert_eq!(packet.total_samples, 960);
        assert!(!packet.terminator);
    }

    #[test]
    fn test_modern_terminator_bit_with_body() {
        // 0x2003 as a two-byte varint: terminator bit plus length 3
        let payload = [0x80, 0xa0, 0x03, 0xf8, 0xff, 0xfe];
        let packet = modern().parse(&payload).unwrap();
        assert!(packet.terminator);
        assert_eq!(packet.total_samples, 960);
    }

    #[test]
    fn test_modern_multi_frame_packet() {
        // Code 3 packet with two 20 ms frames
        let payload = [0x80, 0x02, 0xfb, 0x02];
        let packet = modern().parse(&payload).unwrap();
        assert_eq!(packet.total_samples, 1920);
    }

    #[test]
    fn test_modern_rejects_unaligned_duration() {
        // TOC 0xE0: CELT fullband 2.5 ms is 120 samples
        let payload = [0x80, 0x01, 0xe0];
        assert_eq!(
            modern().parse(&payload),
            Err(FramingError::UnalignedSamples {
                samples: 120,
                frame_size: FRAME
            })
        );
    }

    #[test]
    fn test_modern_header_negation_run_fails_fast() {
        let mut payload = vec![0x80];
        payload.resize(40_001, 0xf8);
        assert_eq!(
            modern().parse(&payload),
            Err(FramingError::NestedNegation { offset: 2 })
        );
    }

    #[test]
    fn test_modern_body_overrun() {
        let payload = [0x80, 0x05, 0xf8];
        assert!(matches!(
            modern().parse(&payload),
            Err(FramingError::Overrun { .. })
        ));
    }

    proptest! {
        #[test]
        fn legacy_samples_track_headers(lengths in prop::collection::vec(1u8..=0x7f, 1..8)) {
            let mut payload = vec![0u8];
            for (i, len) in lengths.iter().enumerate() {
                let more = if i + 1 < lengths.len() { LEGACY_CONTINUATION } else { 0 };
                payload.push(len | more);
                payload.extend(std::iter::repeat(0xaa).take(usize::from(*len)));
            }

            let packet = legacy().parse(&payload).unwrap();
            prop_assert_eq!(packet.total_samples, FRAME * lengths.len());
            prop_assert_eq!(packet.subframes.len(), lengths.len());
            prop_assert_eq!(packet.consumed, payload.len());
        }
    }
}
