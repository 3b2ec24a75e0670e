//! Length-prefixed block framing and flow control.
//!
//! The instrument streams data as blocks, each preceded by a 2-byte
//! little-endian length. The full block must be read before the next length
//! prefix; there is no pipelining. An odd block length signals a trailing
//! out-of-band status byte:
//!
//! | Value | Meaning                                            |
//! |-------|----------------------------------------------------|
//! | 0..=2 | stream complete (distinct termination codes)       |
//! | 3     | no data yet                                        |
//! | 7     | sync request; reply with [`SYNC_ACK`] to continue  |
//!
//! Unrecognized status values are reported to the caller to log and ignore.
//! After every block a [`STUB_ACK`] is sent to force a TCP acknowledgment,
//! which keeps throughput up on devices with little TCP buffer RAM.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Result, StreamError};

/// Stub packet sent after every block to force a TCP acknowledgment.
pub const STUB_ACK: [u8; 4] = [0x02, 0x00, 0xFF, 0xFF];

/// Reply to a sync request, releasing the next run of blocks.
pub const SYNC_ACK: [u8; 4] = [0x02, 0x00, 0xFF, 0x01];

/// Decoded meaning of a block's trailing status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusByte {
    /// Stream complete; the code distinguishes termination reasons.
    End(u8),
    /// The instrument has no data buffered yet.
    NoData,
    /// The instrument requires a sync acknowledgment before sending more.
    SyncRequest,
    /// Undocumented status value; log and ignore.
    Unknown(u8),
}

/// Classify a raw status byte.
pub fn classify_status(byte: u8) -> StatusByte {
    match byte {
        0..=2 => StatusByte::End(byte),
        3 => StatusByte::NoData,
        7 => StatusByte::SyncRequest,
        other => StatusByte::Unknown(other),
    }
}

/// One received block, raw bytes plus the classified status byte if the
/// block length was odd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Full block as received, including any trailing status byte.
    pub data: Vec<u8>,
    /// Classified status byte for odd-length blocks.
    pub status: Option<StatusByte>,
}

impl Block {
    /// Measurement payload with the status byte stripped.
    pub fn payload(&self) -> &[u8] {
        match self.status {
            Some(_) => &self.data[..self.data.len() - 1],
            None => &self.data,
        }
    }
}

/// Framed socket wrapper owning the streaming connection.
pub struct BlockLink<S> {
    io: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> BlockLink<S> {
    pub fn new(io: S) -> Self {
        BlockLink { io }
    }

    /// Read the next length-prefixed block.
    ///
    /// Blocks until the declared number of bytes has arrived. A socket
    /// close mid-prefix or mid-block is a framing error; there is no
    /// partial-read recovery once the cursor is out of step.
    pub async fn read_block(&mut self) -> Result<Block> {
        let mut len_bytes = [0u8; 2];
        self.io
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| StreamError::framing_io("unable to read data block length", e))?;
        let len = u16::from_le_bytes(len_bytes) as usize;

        let mut data = vec![0u8; len];
        self.io.read_exact(&mut data).await.map_err(|e| {
            StreamError::framing_io(format!("short read inside a {len} byte data block"), e)
        })?;

        let status = if len % 2 == 1 { Some(classify_status(data[len - 1])) } else { None };
        trace!(len, ?status, "Received block");

        Ok(Block { data, status })
    }

    /// Send the stub packet that forces a TCP acknowledgment.
    pub async fn send_stub_ack(&mut self) -> Result<()> {
        self.io
            .write_all(&STUB_ACK)
            .await
            .map_err(|e| StreamError::framing_io("sending stub acknowledgment", e))
    }

    /// Acknowledge a sync request, allowing streaming to continue.
    pub async fn send_sync_ack(&mut self) -> Result<()> {
        self.io
            .write_all(&SYNC_ACK)
            .await
            .map_err(|e| StreamError::framing_io("sending sync acknowledgment", e))
    }

    /// Give back the underlying socket.
    pub fn into_inner(self) -> S {
        self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tokio::io::AsyncWriteExt;

    /// Length-prefix a payload the way the instrument does.
    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 2);
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn even_block_has_no_status_byte() -> Result<()> {
        let (mut server, client) = tokio::io::duplex(256);
        let mut link = BlockLink::new(client);

        server.write_all(&frame(&[1, 2, 3, 4])).await?;
        let block = link.read_block().await?;
        assert_eq!(block.status, None);
        assert_eq!(block.payload(), &[1, 2, 3, 4]);
        Ok(())
    }

    #[tokio::test]
    async fn odd_block_strips_classified_status_byte() -> Result<()> {
        let (mut server, client) = tokio::io::duplex(256);
        let mut link = BlockLink::new(client);

        server.write_all(&frame(&[1, 2, 7])).await?;
        let block = link.read_block().await?;
        assert_eq!(block.status, Some(StatusByte::SyncRequest));
        assert_eq!(block.payload(), &[1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn status_classification_covers_all_codes() {
        assert_eq!(classify_status(0), StatusByte::End(0));
        assert_eq!(classify_status(1), StatusByte::End(1));
        assert_eq!(classify_status(2), StatusByte::End(2));
        assert_eq!(classify_status(3), StatusByte::NoData);
        assert_eq!(classify_status(7), StatusByte::SyncRequest);
        assert_eq!(classify_status(9), StatusByte::Unknown(9));
    }

    #[tokio::test]
    async fn short_read_on_block_body_is_a_framing_error() -> Result<()> {
        let (mut server, client) = tokio::io::duplex(256);
        let mut link = BlockLink::new(client);

        // Declare 10 bytes but close after 3
        server.write_all(&(10u16).to_le_bytes()).await?;
        server.write_all(&[1, 2, 3]).await?;
        drop(server);

        let err = link.read_block().await.unwrap_err();
        assert!(matches!(err, StreamError::Framing { .. }));
        assert!(err.is_retryable());
        Ok(())
    }

    #[tokio::test]
    async fn acks_reach_the_peer() -> Result<()> {
        let (mut server, client) = tokio::io::duplex(256);
        let mut link = BlockLink::new(client);

        link.send_stub_ack().await?;
        link.send_sync_ack().await?;

        let mut received = [0u8; 8];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut received).await?;
        assert_eq!(&received[..4], &STUB_ACK);
        assert_eq!(&received[4..], &SYNC_ACK);
        Ok(())
    }

    #[tokio::test]
    async fn zero_length_block_is_empty() -> Result<()> {
        let (mut server, client) = tokio::io::duplex(256);
        let mut link = BlockLink::new(client);

        server.write_all(&frame(&[])).await?;
        let block = link.read_block().await?;
        assert_eq!(block.status, None);
        assert!(block.payload().is_empty());
        Ok(())
    }
}
