//! Stream header structures and parsing
//!
//! The first block the instrument sends after `rec stream` is a header
//! describing the stream that follows. Two formats exist:
//!
//! 1. **Legacy HD** (fixed 4 bytes) - version, reserved byte, channel enable
//!    bitmask, averaging code. The rest of the first block is already
//!    measurement data.
//! 2. **HD Plus** (variable length, version-tagged) - a richer preamble with
//!    a string table, a hardware group count and a channel count. The Plus
//!    header fills the whole first block.
//!
//! The parsed header is what seeds the decode state machine and fixes the
//! output column set, so it is parsed exactly once per session and validated
//! up front.

use tracing::debug;

use crate::error::{Result, StreamError};
use crate::types::{AveragingRate, ChannelMask};

/// Size of the legacy fixed header in bytes.
pub const LEGACY_HEADER_LEN: usize = 4;

/// Minimum Plus header length needed to reach the averaging-rate field.
const PLUS_HEADER_MIN_LEN: usize = 19;

/// Parsed stream header, fixed per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamHeader {
    /// Legacy fixed 4-byte header.
    Legacy {
        version: u8,
        channels: ChannelMask,
        averaging: AveragingRate,
    },
    /// Variable-length Plus header.
    Plus {
        version: u8,
        /// Length of the embedded string table, carried for diagnostics.
        string_table_len: u16,
        channels: ChannelMask,
        averaging: AveragingRate,
    },
}

impl StreamHeader {
    /// Parse the legacy fixed header from the first data block.
    ///
    /// Only the first [`LEGACY_HEADER_LEN`] bytes belong to the header;
    /// everything after is measurement data the caller must keep.
    pub fn parse_legacy(block: &[u8]) -> Result<Self> {
        if block.len() < LEGACY_HEADER_LEN {
            return Err(StreamError::framing(format!(
                "legacy stream header needs {} bytes, got {}",
                LEGACY_HEADER_LEN,
                block.len()
            )));
        }

        let version = block[0];
        // block[1] is a reserved padding byte
        let channels = ChannelMask::from_bits(block[2]);
        let averaging = AveragingRate::from_code(block[3]);

        if channels.is_empty() {
            return Err(StreamError::configuration(
                "device header indicates that no channels are enabled for streaming",
            ));
        }

        debug!(
            version,
            channels = %channels,
            averaging_code = averaging.code(),
            "Parsed legacy stream header"
        );

        Ok(StreamHeader::Legacy { version, channels, averaging })
    }

    /// Parse the Plus header from the first data block.
    ///
    /// Version 1 predates the decodable layout and versions above 2 are
    /// unknown; both are fatal. Only a single hardware group with all four
    /// channels enabled is supported by the packet decoder.
    pub fn parse_plus(block: &[u8]) -> Result<Self> {
        let version = *block.first().ok_or_else(|| {
            StreamError::framing("Plus stream header block is empty")
        })?;

        match version {
            1 => return Err(StreamError::HeaderVersion { found: 1 }),
            2 => {}
            found => return Err(StreamError::HeaderVersion { found }),
        }

        if block.len() < PLUS_HEADER_MIN_LEN {
            return Err(StreamError::framing(format!(
                "Plus stream header needs {} bytes, got {}",
                PLUS_HEADER_MIN_LEN,
                block.len()
            )));
        }

        // Version word, then a fixed run of fields we do not interpret,
        // then the string table size.
        let string_table_len = u16::from_le_bytes([block[8], block[9]]);
        let group_count = block[10];
        let channel_count = u16::from_le_bytes([block[12], block[13]]);
        let averaging = AveragingRate::from_code(block[18]);

        if group_count > 1 {
            return Err(StreamError::configuration(format!(
                "more than one hardware stream group is not supported (got {group_count})"
            )));
        }
        if channel_count != 4 {
            return Err(StreamError::configuration(format!(
                "Plus decode is only supported with all four channels enabled (got {channel_count})"
            )));
        }

        debug!(
            version,
            string_table_len,
            averaging_code = averaging.code(),
            header_len = block.len(),
            "Parsed Plus stream header"
        );

        Ok(StreamHeader::Plus {
            version,
            string_table_len,
            channels: ChannelMask::ALL,
            averaging,
        })
    }

    /// Enabled channel mask.
    pub fn channels(&self) -> ChannelMask {
        match self {
            StreamHeader::Legacy { channels, .. } => *channels,
            StreamHeader::Plus { channels, .. } => *channels,
        }
    }

    /// Averaging rate from the header.
    pub fn averaging(&self) -> AveragingRate {
        match self {
            StreamHeader::Legacy { averaging, .. } => *averaging,
            StreamHeader::Plus { averaging, .. } => *averaging,
        }
    }

    /// Header format version byte.
    pub fn version(&self) -> u8 {
        match self {
            StreamHeader::Legacy { version, .. } => *version,
            StreamHeader::Plus { version, .. } => *version,
        }
    }
}
