//! Async recorder and decoder for HD power analyzer streaming telemetry.
//!
//! `hdstream` drives an HD power module over its textual control channel,
//! receives the proprietary length-prefixed measurement stream off a raw
//! socket, decodes it into time-ordered voltage/current/power stripes and
//! writes them to CSV or an in-memory sink.
//!
//! # Features
//!
//! - **Both wire formats**: the legacy fixed-word HD stream and the
//!   packet-based HD Plus stream (absolute/delta/repeat encoding)
//! - **Decoupled decode**: socket reads never wait on the sink; decode runs
//!   after the stream (post-process) or on a background worker (real-time)
//! - **Cooperative stop**: duration expiry and cancellation ride the
//!   instrument's sync handshake instead of severing the socket
//! - **Offline diagnostics**: optional raw `.dat` capture of every block,
//!   and corrupt-packet logging with offsets and hex context
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hdstream::{ControlPort, CsvSink, SaveMode, StreamConfig, StreamSession};
//!
//! struct VendorPort; // wraps the vendor command transport
//!
//! #[async_trait::async_trait]
//! impl ControlPort for VendorPort {
//!     async fn send_command(&mut self, command: &str) -> hdstream::Result<String> {
//!         todo!("send over USB/Serial/LAN and return the response text")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> hdstream::Result<()> {
//!     // Any AsyncRead + AsyncWrite works as the data socket
//!     let (socket, _instrument) = tokio::io::duplex(64 * 1024);
//!
//!     let config = StreamConfig {
//!         duration: std::time::Duration::from_secs(30),
//!         save_mode: SaveMode::RealTime,
//!         ..StreamConfig::default()
//!     };
//!
//!     let session = StreamSession::connect(VendorPort, socket, config).await?;
//!     let sink = CsvSink::create("power.csv")?;
//!     let (_sink, summary) = session.record(sink).await?;
//!
//!     println!("{} stripes in {:?}", summary.stats.stripes, summary.elapsed);
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod types;

// Stream pipeline
pub mod capture;
pub mod control;
pub mod decode;
pub mod framing;
pub mod header;
pub mod session;
pub mod sink;

// Core exports
pub use error::{Result, StreamError};
pub use types::{AveragingRate, ChannelMask, Stripe};

// Pipeline exports
pub use control::{ControlPort, ModuleFamily};
pub use decode::{DecodeStats, StreamDecoder};
pub use header::StreamHeader;
pub use session::{SaveMode, StreamConfig, StreamSession, StreamSummary};
pub use sink::{CsvSink, MemorySink, StripeSink};
