//! Stream decoders for both wire formats.
//!
//! The stream header picks the decoder: legacy HD streams use the
//! fixed-word state machine in [`legacy`], HD Plus streams use the packet
//! decoder in [`plus`]. [`StreamDecoder`] wraps the choice so session code
//! can stay format-agnostic.
//!
//! Both decoders are incremental: they accept sequential buffers of
//! measurement data in any chunking and carry partial words/packets across
//! calls, so batch and real-time decode paths produce identical output.

mod legacy;
mod plus;

pub use legacy::LegacyDecoder;
pub use plus::{DEFAULT_CORRUPT_PACKET_LIMIT, PlusDecoder};

use crate::error::Result;
use crate::header::StreamHeader;
use crate::sink::StripeSink;

/// Decode counters reported in the stream summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Stripes written to the sink.
    pub stripes: u64,
    /// Trigger packets observed (Plus format only).
    pub trigger_packets: u64,
    /// Corrupt packets tolerated (Plus format only).
    pub corrupt_packets: u32,
    /// Bytes still buffered as a partial trailing word/packet.
    pub undecoded_bytes: usize,
}

/// Format-dispatching stream decoder.
pub enum StreamDecoder {
    Legacy(LegacyDecoder),
    Plus(PlusDecoder),
}

impl StreamDecoder {
    /// Build the decoder matching a parsed stream header.
    pub fn for_header(header: &StreamHeader, corrupt_limit: u32) -> Result<Self> {
        match header {
            StreamHeader::Legacy { .. } => Ok(StreamDecoder::Legacy(LegacyDecoder::new(header)?)),
            StreamHeader::Plus { .. } => {
                Ok(StreamDecoder::Plus(PlusDecoder::new(header, corrupt_limit)?))
            }
        }
    }

    /// Decode one buffer of measurement data into the sink.
    ///
    /// Returns the number of stripes emitted by this call.
    pub fn decode<S: StripeSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) -> Result<u64> {
        match self {
            StreamDecoder::Legacy(dec) => dec.decode(chunk, sink),
            StreamDecoder::Plus(dec) => dec.decode(chunk, sink),
        }
    }

    /// Current time cursor in microseconds.
    pub fn time_position_us(&self) -> u64 {
        match self {
            StreamDecoder::Legacy(dec) => dec.time_position_us(),
            StreamDecoder::Plus(dec) => dec.time_position_us(),
        }
    }

    /// Decode counters so far.
    pub fn stats(&self) -> DecodeStats {
        match self {
            StreamDecoder::Legacy(dec) => DecodeStats {
                stripes: dec.stripes_emitted(),
                trigger_packets: 0,
                corrupt_packets: 0,
                undecoded_bytes: dec.undecoded_bytes(),
            },
            StreamDecoder::Plus(dec) => DecodeStats {
                stripes: dec.stripes_emitted(),
                trigger_packets: dec.trigger_packets(),
                corrupt_packets: dec.corrupt_packets(),
                undecoded_bytes: dec.undecoded_bytes(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[test]
    fn header_selects_the_decoder_variant() {
        let legacy = StreamHeader::parse_legacy(&[1, 0, 0x0F, 0]).unwrap();
        assert!(matches!(
            StreamDecoder::for_header(&legacy, DEFAULT_CORRUPT_PACKET_LIMIT).unwrap(),
            StreamDecoder::Legacy(_)
        ));

        let mut block = vec![0u8; 19];
        block[0] = 2;
        block[10] = 1;
        block[12] = 4;
        let plus = StreamHeader::parse_plus(&block).unwrap();
        assert!(matches!(
            StreamDecoder::for_header(&plus, DEFAULT_CORRUPT_PACKET_LIMIT).unwrap(),
            StreamDecoder::Plus(_)
        ));
    }

    #[test]
    fn stats_start_at_zero() {
        let legacy = StreamHeader::parse_legacy(&[1, 0, 0x0F, 0]).unwrap();
        let mut dec = StreamDecoder::for_header(&legacy, DEFAULT_CORRUPT_PACKET_LIMIT).unwrap();
        assert_eq!(dec.stats(), DecodeStats::default());

        let mut sink = MemorySink::new();
        dec.decode(&[0x10], &mut sink).unwrap();
        assert_eq!(dec.stats().undecoded_bytes, 1);
    }
}
