//! Legacy fixed-format stream decoder.
//!
//! The original HD stream is a bare sequence of 16-bit little-endian words
//! with no packet structure: the channel-enable bitmask from the header
//! fixes a repeating channel order, and a four-state machine walks that
//! order word by word. Voltage channels occupy one word each; current
//! channels span two consecutive words (high half then low half). A stripe
//! is complete when the machine wraps back to (or past) its starting
//! channel.

use tracing::trace;

use crate::error::{Result, StreamError};
use crate::header::StreamHeader;
use crate::sink::StripeSink;
use crate::types::{ChannelMask, Stripe};

/// Measurement channels in wire order; the discriminant is the decode
/// state number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Channel {
    Volt5 = 0,
    Curr5 = 1,
    Volt12 = 2,
    Curr12 = 3,
}

impl Channel {
    fn from_index(index: i8) -> Option<Channel> {
        match index {
            0 => Some(Channel::Volt5),
            1 => Some(Channel::Curr5),
            2 => Some(Channel::Volt12),
            3 => Some(Channel::Curr12),
            _ => None,
        }
    }

    fn enabled_in(self, channels: ChannelMask) -> bool {
        match self {
            Channel::Volt5 => channels.volt_5v(),
            Channel::Curr5 => channels.curr_5v(),
            Channel::Volt12 => channels.volt_12v(),
            Channel::Curr12 => channels.curr_12v(),
        }
    }
}

/// Next-state table, one row per channel bitmask value, one entry per
/// current state. -1 marks a disabled channel. The bitmask column order is
/// 5V voltage / 5V current / 12V voltage / 12V current, matching the
/// header's enable bits.
const TRANSITIONS: [[i8; 4]; 16] = [
    [-1, -1, -1, -1], // 0 0 0 0
    [-1, -1, -1, 3],  // 0 0 0 1
    [-1, -1, 2, -1],  // 0 0 1 0
    [-1, -1, 3, 2],   // 0 0 1 1
    [-1, 1, -1, -1],  // 0 1 0 0
    [-1, 3, -1, 1],   // 0 1 0 1
    [-1, 2, 1, -1],   // 0 1 1 0
    [-1, 2, 3, 1],    // 0 1 1 1
    [0, -1, -1, -1],  // 1 0 0 0
    [3, -1, -1, 0],   // 1 0 0 1
    [2, -1, 0, -1],   // 1 0 1 0
    [2, -1, 3, 0],    // 1 0 1 1
    [1, 0, -1, -1],   // 1 1 0 0
    [1, 3, -1, 0],    // 1 1 0 1
    [1, 2, 0, -1],    // 1 1 1 0
    [1, 2, 3, 0],     // 1 1 1 1
];

/// Channel-walk state machine, validated against the transition table at
/// construction time.
#[derive(Debug, Clone)]
struct DecodeFsm {
    row: [i8; 4],
    state: Channel,
}

impl DecodeFsm {
    fn new(channels: ChannelMask) -> Result<Self> {
        if channels.is_empty() {
            return Err(StreamError::configuration(
                "device header indicates that no channels are enabled for streaming",
            ));
        }

        let row = TRANSITIONS[channels.bits() as usize];

        // Invariant the decode loop relies on: every enabled entry points
        // at another enabled state, every disabled entry is -1.
        for state in [Channel::Volt5, Channel::Curr5, Channel::Volt12, Channel::Curr12] {
            let entry = row[state as usize];
            if state.enabled_in(channels) {
                match Channel::from_index(entry) {
                    Some(next) if next.enabled_in(channels) => {}
                    _ => {
                        return Err(StreamError::configuration(format!(
                            "transition table entry {entry} invalid for channel mask {channels}"
                        )));
                    }
                }
            } else if entry != -1 {
                return Err(StreamError::configuration(format!(
                    "transition table marks disabled channel {state:?} as reachable"
                )));
            }
        }

        // Start on the first enabled channel in wire order.
        let state = [Channel::Volt5, Channel::Curr5, Channel::Volt12, Channel::Curr12]
            .into_iter()
            .find(|c| c.enabled_in(channels))
            .expect("non-empty mask has an enabled channel");

        Ok(DecodeFsm { row, state })
    }

    /// Step to the next enabled channel, returning the state just left.
    fn advance(&mut self) -> Channel {
        let prev = self.state;
        self.state = Channel::from_index(self.row[prev as usize])
            .expect("transition table validated at construction");
        prev
    }
}

/// Decoder for the legacy fixed word format.
///
/// Incremental: feed sequential buffers of measurement data (header and
/// transport bytes already stripped) in any chunking; word splits across
/// chunk boundaries are carried over.
pub struct LegacyDecoder {
    fsm: DecodeFsm,
    channels: ChannelMask,
    step_us: u64,
    time_us: u64,
    stripes: u64,

    // Split-word carry state
    byte_carry: Option<u8>,
    word_low_pending: bool,
    word_high: u32,

    // Latest per-channel values; disabled channels stay None
    volt_5v: Option<i32>,
    curr_5v: Option<i32>,
    volt_12v: Option<i32>,
    curr_12v: Option<i32>,
}

impl LegacyDecoder {
    pub fn new(header: &StreamHeader) -> Result<Self> {
        let channels = header.channels();
        Ok(LegacyDecoder {
            fsm: DecodeFsm::new(channels)?,
            channels,
            step_us: header.averaging().stripe_step_us(),
            time_us: 0,
            stripes: 0,
            byte_carry: None,
            word_low_pending: false,
            word_high: 0,
            volt_5v: None,
            curr_5v: None,
            volt_12v: None,
            curr_12v: None,
        })
    }

    /// Decode one buffer of measurement words into the sink.
    ///
    /// Returns the number of stripes emitted by this call.
    pub fn decode<S: StripeSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) -> Result<u64> {
        let before = self.stripes;
        let mut i = 0;

        if let Some(low_byte) = self.byte_carry.take() {
            match chunk.first() {
                Some(&high_byte) => {
                    i = 1;
                    self.process_word(u16::from_le_bytes([low_byte, high_byte]), sink)?;
                }
                None => {
                    self.byte_carry = Some(low_byte);
                    return Ok(0);
                }
            }
        }

        while i + 2 <= chunk.len() {
            let word = u16::from_le_bytes([chunk[i], chunk[i + 1]]);
            i += 2;
            self.process_word(word, sink)?;
        }

        if i < chunk.len() {
            self.byte_carry = Some(chunk[i]);
        }

        Ok(self.stripes - before)
    }

    /// Total stripes emitted so far.
    pub fn stripes_emitted(&self) -> u64 {
        self.stripes
    }

    /// Current time cursor in microseconds.
    pub fn time_position_us(&self) -> u64 {
        self.time_us
    }

    /// Bytes held back waiting for more input (at most one).
    pub fn undecoded_bytes(&self) -> usize {
        self.byte_carry.is_some() as usize
    }

    fn process_word<S: StripeSink + ?Sized>(&mut self, word: u16, sink: &mut S) -> Result<()> {
        let value = (word & 0x3FFF) as u32;
        let mut complete = false;

        match self.fsm.state {
            Channel::Volt5 => {
                self.volt_5v = Some(value as i32);
                complete = true;
            }
            Channel::Curr5 => {
                if self.word_low_pending {
                    self.word_low_pending = false;
                    self.curr_5v = Some((self.word_high * 4096 + value) as i32);
                    complete = true;
                } else {
                    self.word_high = value;
                    self.word_low_pending = true;
                }
            }
            Channel::Volt12 => {
                self.volt_12v = Some(value as i32);
                complete = true;
            }
            Channel::Curr12 => {
                if self.word_low_pending {
                    self.word_low_pending = false;
                    self.curr_12v = Some((self.word_high * 4096 + value) as i32);
                    complete = true;
                } else {
                    self.word_high = value;
                    self.word_low_pending = true;
                }
            }
        }

        // The state only moves once a full measurement word has been
        // consumed; a current channel mid-word holds its state.
        if !self.word_low_pending {
            let prev = self.fsm.advance();
            // Wrapping back to (or past) the previous state means one full
            // pass over the enabled channels: emit the stripe.
            if complete && self.fsm.state <= prev {
                self.emit(sink)?;
            }
        }

        Ok(())
    }

    fn emit<S: StripeSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        let stripe = Stripe {
            time_us: self.time_us,
            volt_5v: self.volt_5v,
            curr_5v: self.curr_5v,
            volt_12v: self.volt_12v,
            curr_12v: self.curr_12v,
        };
        trace!(time_us = stripe.time_us, "Emitting stripe");
        sink.write_stripe(&stripe)?;
        self.time_us += self.step_us;
        self.stripes += 1;
        Ok(())
    }
}
