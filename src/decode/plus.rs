//! HD Plus packet-based stream decoder.
//!
//! The Plus stream packs heterogeneous packets into a byte stream whose
//! 16-bit words arrive byte-swapped. Five packet types exist:
//!
//! | ID | Packet   | Size          | Effect                                  |
//! |----|----------|---------------|-----------------------------------------|
//! | 4  | absolute | 12 bytes      | full reading, one stripe, refreshes cache |
//! | 8  | blank    | 2 + length    | skip, no stripe                         |
//! | 10 | trigger  | 2 bytes       | trigger marker, no stripe               |
//! | 12 | delta    | 8 bytes       | signed deltas on the cached reading     |
//! | 14 | repeat   | 3 bytes       | replay the cached reading N times       |
//!
//! Delta and repeat packets depend on the last absolute/delta values; the
//! cache is owned exclusively by the decoder and is only valid after the
//! first absolute packet. Unknown packet IDs are treated as corruption and
//! tolerated up to a configurable threshold.

use tracing::{debug, warn};

use crate::error::{Result, StreamError};
use crate::header::StreamHeader;
use crate::sink::StripeSink;
use crate::types::Stripe;

/// Default number of corrupt packets tolerated before the decode aborts.
pub const DEFAULT_CORRUPT_PACKET_LIMIT: u32 = 3;

const PACKET_ID_ABSOLUTE: u8 = 4;
const PACKET_ID_BLANK: u8 = 8;
const PACKET_ID_TRIGGER: u8 = 10;
const PACKET_ID_DELTA: u8 = 12;
const PACKET_ID_REPEAT: u8 = 14;

/// Last decoded reading, the reference for delta and repeat packets.
///
/// Written only by absolute and delta decode; read by delta and repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LastReading {
    volt_5v: i32,
    curr_5v: i32,
    volt_12v: i32,
    curr_12v: i32,
}

impl LastReading {
    fn apply(&mut self, delta: DeltaReading) {
        self.volt_5v += delta.volt_5v;
        self.curr_5v += delta.curr_5v;
        self.volt_12v += delta.volt_12v;
        self.curr_12v += delta.curr_12v;
    }
}

#[derive(Debug, Clone, Copy)]
struct DeltaReading {
    volt_5v: i32,
    curr_5v: i32,
    volt_12v: i32,
    curr_12v: i32,
}

/// Accumulates raw stream bytes and normalizes the pairwise byte swap.
///
/// The wire stores each 16-bit word with its bytes exchanged (index XOR 1).
/// Normalizing on ingest keeps the packet parser a plain sequential reader
/// and makes decode independent of how the stream was chunked: a dangling
/// byte is held until its partner arrives, preserving pair parity across
/// arbitrary chunk boundaries.
#[derive(Debug, Default)]
struct SwapBuffer {
    normalized: Vec<u8>,
    held: Option<u8>,
    /// Stream offset of `normalized[0]`, for diagnostics.
    base_offset: usize,
}

impl SwapBuffer {
    fn feed(&mut self, chunk: &[u8]) {
        self.normalized.reserve(chunk.len() + 1);
        for &byte in chunk {
            match self.held.take() {
                None => self.held = Some(byte),
                Some(first) => {
                    // Pair (first, byte) arrives as (byte, first) in word order
                    self.normalized.push(byte);
                    self.normalized.push(first);
                }
            }
        }
    }

    fn consume(&mut self, count: usize) {
        self.normalized.drain(..count);
        self.base_offset += count;
    }

    fn pending(&self) -> usize {
        self.normalized.len() + self.held.is_some() as usize
    }
}

/// Decoder for the Plus packet format.
///
/// Incremental: feed sequential buffers of measurement data (header and
/// transport bytes already stripped) in any chunking; packets split across
/// chunk boundaries are held until complete.
pub struct PlusDecoder {
    buf: SwapBuffer,
    step_us: u64,
    time_us: u64,
    stripes: u64,
    last: Option<LastReading>,
    trigger_packets: u64,
    corrupt_packets: u32,
    corrupt_limit: u32,
}

impl PlusDecoder {
    pub fn new(header: &StreamHeader, corrupt_limit: u32) -> Result<Self> {
        if !matches!(header, StreamHeader::Plus { .. }) {
            return Err(StreamError::configuration(
                "Plus decoder requires a Plus stream header",
            ));
        }
        Ok(PlusDecoder {
            buf: SwapBuffer::default(),
            step_us: header.averaging().stripe_step_us(),
            time_us: 0,
            stripes: 0,
            last: None,
            trigger_packets: 0,
            corrupt_packets: 0,
            corrupt_limit,
        })
    }

    /// Decode one buffer of packet data into the sink.
    ///
    /// Returns the number of stripes emitted by this call.
    pub fn decode<S: StripeSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) -> Result<u64> {
        self.buf.feed(chunk);
        let before = self.stripes;

        let mut pos = 0;
        loop {
            let available = self.buf.normalized.len() - pos;
            if available == 0 {
                break;
            }

            let packet_id = self.buf.normalized[pos];
            match packet_id {
                PACKET_ID_ABSOLUTE => {
                    if available < 12 {
                        break;
                    }
                    let mut bytes = [0u8; 12];
                    bytes.copy_from_slice(&self.buf.normalized[pos..pos + 12]);
                    pos += 12;

                    let reading = parse_absolute(&bytes);
                    self.last = Some(reading);
                    self.emit(sink, reading, 1)?;
                }
                PACKET_ID_BLANK => {
                    if available < 2 {
                        break;
                    }
                    let skip = self.buf.normalized[pos + 1] as usize + 2;
                    if available < skip {
                        break;
                    }
                    pos += skip;
                }
                PACKET_ID_TRIGGER => {
                    if available < 2 {
                        break;
                    }
                    pos += 2;
                    self.trigger_packets += 1;
                    debug!(offset = self.buf.base_offset + pos - 2, "Trigger packet");
                }
                PACKET_ID_DELTA => {
                    if available < 8 {
                        break;
                    }
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&self.buf.normalized[pos..pos + 8]);
                    let delta = parse_delta(&bytes)?;
                    pos += 8;

                    // Deltas before the first absolute reading have no
                    // reference point: drop them, no stripe, no time advance.
                    if let Some(mut last) = self.last {
                        last.apply(delta);
                        self.last = Some(last);
                        self.emit(sink, last, 1)?;
                    }
                }
                PACKET_ID_REPEAT => {
                    if available < 3 {
                        break;
                    }
                    let count = self.buf.normalized[pos + 2] as u64;
                    pos += 3;

                    if let Some(last) = self.last {
                        self.emit(sink, last, count)?;
                    }
                }
                bad_id => {
                    let offset = self.buf.base_offset + pos;
                    self.corrupt_packets += 1;
                    warn!(
                        packet_id = bad_id,
                        offset,
                        buffer_len = self.buf.normalized.len(),
                        occurrence = self.corrupt_packets,
                        "Corrupt stream packet"
                    );
                    warn!(
                        "Offending data:\n{}",
                        hex_dump(&self.buf.normalized[pos..(pos + 64).min(self.buf.normalized.len())])
                    );

                    if self.corrupt_packets > self.corrupt_limit {
                        return Err(StreamError::corrupt(
                            offset,
                            format!("invalid packet ID {bad_id} in stream, data is corrupt"),
                        ));
                    }
                    // Resynchronize one word forward and try again
                    pos = (pos + 2).min(self.buf.normalized.len());
                }
            }
        }

        self.buf.consume(pos);
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

    /// Trigger packets observed.
    pub fn trigger_packets(&self) -> u64 {
        self.trigger_packets
    }

    /// Corrupt packets tolerated so far.
    pub fn corrupt_packets(&self) -> u32 {
        self.corrupt_packets
    }

    /// Bytes buffered but not yet decodable (partial trailing packet).
    pub fn undecoded_bytes(&self) -> usize {
        self.buf.pending()
    }

    /// Emit `count` stripes from the given reading.
    fn emit<S: StripeSink + ?Sized>(
        &mut self,
        sink: &mut S,
        last: LastReading,
        count: u64,
    ) -> Result<()> {
        for _ in 0..count {
            let stripe = Stripe {
                time_us: self.time_us,
                volt_5v: Some(last.volt_5v),
                curr_5v: Some(last.curr_5v),
                volt_12v: Some(last.volt_12v),
                curr_12v: Some(last.curr_12v),
            };
            sink.write_stripe(&stripe)?;
            self.time_us += self.step_us;
            self.stripes += 1;
        }
        Ok(())
    }
}

/// Absolute packet: 15-bit signed voltage and 25-bit signed current per
/// rail, packed so each current's top bit rides in the preceding voltage's
/// low byte.
fn parse_absolute(b: &[u8; 12]) -> LastReading {
    let word_5v = ((b[2] as u32) << 8) | b[3] as u32;
    let volt_5v = sign_extend(word_5v >> 1, 15);
    let curr_5v = sign_extend(
        ((b[3] as u32 & 0x01) << 24) | ((b[4] as u32) << 16) | ((b[5] as u32) << 8) | b[6] as u32,
        25,
    );

    let word_12v = ((b[7] as u32) << 8) | b[8] as u32;
    let volt_12v = sign_extend(word_12v >> 1, 15);
    let curr_12v = sign_extend(
        ((b[8] as u32 & 0x01) << 24) | ((b[9] as u32) << 16) | ((b[10] as u32) << 8) | b[11] as u32,
        25,
    );

    LastReading { volt_5v, curr_5v, volt_12v, curr_12v }
}

/// Delta packet: four 10-bit signed deltas behind a length nibble that must
/// always read 10.
fn parse_delta(b: &[u8; 8]) -> Result<DeltaReading> {
    let length_nibble = (b[2] & 0xF0) >> 4;
    if length_nibble != 10 {
        return Err(StreamError::decode(
            "delta packet",
            format!("invalid length nibble {length_nibble}, expected 10"),
        ));
    }

    let volt_5v = sign_extend((((b[2] & 0x0F) as u32) << 6) | (b[3] >> 2) as u32, 10);
    let curr_5v = sign_extend((((b[3] & 0x03) as u32) << 8) | b[4] as u32, 10);
    let volt_12v = sign_extend(((b[5] as u32) << 2) | ((b[6] >> 6) & 0x03) as u32, 10);
    // The 12V current field packs as a 6-bit high part plus a 4-bit tail
    let curr_12v = sign_extend((((b[6] & 0x3F) as u32) << 2) + ((b[7] >> 4) & 0x0F) as u32, 10);

    Ok(DeltaReading { volt_5v, curr_5v, volt_12v, curr_12v })
}

/// Sign-extend a `bits`-wide two's-complement value.
fn sign_extend(value: u32, bits: u32) -> i32 {
    let sign = 1u32 << (bits - 1);
    if value & sign != 0 {
        (value as i64 - (1i64 << bits)) as i32
    } else {
        value as i32
    }
}

/// Format a byte window as hex rows of 16, byte order reversed per row to
/// match how the raw capture reads.
fn hex_dump(window: &[u8]) -> String {
    let mut out = String::new();
    for row in window.chunks(16) {
        let line: Vec<String> = row.iter().rev().map(|b| format!("{b:02x}")).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}
