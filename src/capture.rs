//! Raw block capture for offline protocol debugging.
//!
//! When enabled, every received block is mirrored to a `.dat` file exactly
//! as it came off the socket, so decode problems can be replayed without
//! the instrument. The format is a fixed two-byte preamble, then per block:
//! an 8-byte reserved timestamp (zeroed for now), a 4-byte big-endian
//! length, and the raw bytes.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, StreamError};

/// Fixed preamble identifying the capture format.
const CAPTURE_PREAMBLE: [u8; 2] = [0x00, 0x02];

/// Reserved per-block timestamp field, unused for now.
const RESERVED_TIMESTAMP: [u8; 8] = [0u8; 8];

/// Writer mirroring received blocks to a raw capture.
pub struct BlockCapture<W: Write + Send> {
    out: W,
}

impl BlockCapture<File> {
    /// Create a capture file at `path`, writing the format preamble.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(|e| StreamError::Io {
            context: format!("creating capture file {}", path.as_ref().display()),
            source: e,
        })?;
        Self::from_writer(file)
    }
}

impl<W: Write + Send> BlockCapture<W> {
    /// Wrap an arbitrary writer, writing the format preamble.
    pub fn from_writer(mut out: W) -> Result<Self> {
        out.write_all(&CAPTURE_PREAMBLE).map_err(capture_io)?;
        Ok(BlockCapture { out })
    }

    /// Append one received block.
    pub fn record_block(&mut self, block: &[u8]) -> Result<()> {
        self.out.write_all(&RESERVED_TIMESTAMP).map_err(capture_io)?;
        self.out.write_all(&(block.len() as u32).to_be_bytes()).map_err(capture_io)?;
        self.out.write_all(block).map_err(capture_io)?;
        Ok(())
    }

    /// Flush the capture so no trailing blocks are lost on failure paths.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(capture_io)
    }
}

fn capture_io(source: std::io::Error) -> StreamError {
    StreamError::Io { context: "writing raw capture".to_string(), source }
}
