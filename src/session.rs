//! Stream session orchestration.
//!
//! A [`StreamSession`] ties together the control channel, the framed data
//! socket, the format-specific decoder and the output sink for one
//! recording. Lifecycle: construct with [`StreamSession::connect`] (which
//! verifies the module family), then [`StreamSession::record`] runs the
//! whole stream to completion and tears the session down.
//!
//! ## Receive/decode decoupling
//!
//! Decode never runs inline with the receive loop, so a slow sink cannot
//! stall socket reads. In `PostProcess` mode all raw bytes accumulate in
//! one growable buffer and are decoded after the stream ends. In `RealTime`
//! mode completed chunks are handed to a single background worker through
//! an unbounded single-producer/single-consumer channel; the channel is the
//! synchronization boundary, so the forward-only hand-off is a checked
//! contract rather than a shared-counter convention.
//!
//! ## Cooperative stop
//!
//! A duration expiry or a [`CancellationToken`] trigger only marks a stop
//! request. The request is honored on the instrument's next sync handshake
//! by sending `rec stop` before acknowledging, so shutdown latency is
//! bounded by the sync cadence rather than being instantaneous. The
//! instrument then finishes with an end-of-stream status byte.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::capture::BlockCapture;
use crate::control::{self, ControlPort, ModuleFamily};
use crate::decode::{DEFAULT_CORRUPT_PACKET_LIMIT, DecodeStats, StreamDecoder};
use crate::error::{Result, StreamError};
use crate::framing::{BlockLink, StatusByte};
use crate::header::{LEGACY_HEADER_LEN, StreamHeader};
use crate::sink::StripeSink;

/// Extra receive-buffer capacity reserved beyond the expected stream size.
const BUFFER_HEADROOM: f64 = 1.05;

/// When to decode the received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Buffer everything, decode once the stream has ended.
    PostProcess,
    /// Decode incrementally on a background worker while receiving.
    RealTime,
}

/// Recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// How long to record before requesting a stop.
    pub duration: Duration,
    /// When to decode the received bytes.
    pub save_mode: SaveMode,
    /// Corrupt packets tolerated before the decode aborts (Plus format).
    pub corrupt_packet_limit: u32,
    /// Optional raw `.dat` capture of every received block.
    pub capture_path: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            duration: Duration::from_secs(10),
            save_mode: SaveMode::PostProcess,
            corrupt_packet_limit: DEFAULT_CORRUPT_PACKET_LIMIT,
            capture_path: None,
        }
    }
}

/// Outcome of a completed recording.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    /// Raw end-of-stream status code from the instrument (0..=2).
    pub termination_code: u8,
    /// Total bytes received, length prefixes included.
    pub bytes_received: u64,
    /// Decode counters.
    pub stats: DecodeStats,
    /// Wall-clock receive time.
    pub elapsed: Duration,
}

/// One instrument connection recording one stream.
pub struct StreamSession<C, S> {
    control: C,
    link: BlockLink<S>,
    family: ModuleFamily,
    config: StreamConfig,
    cancel: CancellationToken,
}

/// Where decoded output is routed during the receive loop.
enum DecodePath<W: StripeSink> {
    /// Header not seen yet; the sink waits here.
    Waiting(W),
    /// Post-process mode: raw bytes accumulate for a decode after the end.
    Buffered {
        mega: Vec<u8>,
        decoder: StreamDecoder,
        sink: W,
    },
    /// Real-time mode: chunks stream to the decode worker.
    Live {
        tx: mpsc::UnboundedSender<Vec<u8>>,
        handle: JoinHandle<Result<(W, StreamDecoder)>>,
    },
}

impl<C, S> StreamSession<C, S>
where
    C: ControlPort,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Connect to the instrument, verifying it is a supported HD module and
    /// detecting the stream format family.
    pub async fn connect(mut control: C, socket: S, config: StreamConfig) -> Result<Self> {
        let family = control::probe_module(&mut control).await?;
        Ok(StreamSession {
            control,
            link: BlockLink::new(socket),
            family,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Detected module family.
    pub fn family(&self) -> ModuleFamily {
        self.family
    }

    /// Token for requesting an early stop.
    ///
    /// Cancellation is cooperative: the stop command goes out on the next
    /// sync handshake, not immediately.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Record one stream to completion, writing stripes into `sink`.
    ///
    /// Returns the sink together with a summary of the recording. The
    /// session is consumed; a new stream needs a new session.
    pub async fn record<W>(mut self, sink: W) -> Result<(W, StreamSummary)>
    where
        W: StripeSink + 'static,
    {
        // Size the receive buffer from the configured channel enables and
        // averaging rate before the stream starts.
        let bytes_per_stripe = control::query_bytes_per_stripe(&mut self.control).await?;
        let stripes_per_second = control::query_stripes_per_second(&mut self.control).await?;
        let estimated_bytes = (self.config.duration.as_secs_f64()
            * stripes_per_second
            * bytes_per_stripe as f64
            * BUFFER_HEADROOM) as usize;
        info!(
            bytes_per_stripe,
            stripes_per_second, estimated_bytes, "Sized receive buffer for the recording"
        );

        let mut capture = match &self.config.capture_path {
            Some(path) => Some(BlockCapture::create(path)?),
            None => None,
        };

        // Unlock streaming and start the recording
        self.control.send_command("conf stream enable on").await?;
        self.control.send_command("rec stream").await?;
        info!(family = ?self.family, "Stream started");

        let started = tokio::time::Instant::now();
        let mut path = DecodePath::Waiting(sink);
        let mut header: Option<StreamHeader> = None;
        let mut bytes_received = 0u64;
        let mut termination: Option<u8> = None;
        let mut request_stop = false;
        let mut stop_ordered = false;
        let mut sync_pending = false;
        let mut worker_failed = false;

        while termination.is_none() && !worker_failed {
            if !request_stop
                && (started.elapsed() >= self.config.duration || self.cancel.is_cancelled())
            {
                debug!("Stream time complete, halting");
                request_stop = true;
            }

            let block = self.link.read_block().await?;
            bytes_received += block.data.len() as u64 + 2;

            if let Some(capture) = capture.as_mut() {
                capture.record_block(&block.data)?;
            }

            // Stub packet forces a TCP ack, speeding up flow on devices
            // with little TCP buffer RAM
            self.link.send_stub_ack().await?;

            match block.status {
                Some(StatusByte::End(code)) => {
                    debug!(code, "Stream download from module complete");
                    termination = Some(code);
                }
                Some(StatusByte::NoData) => trace!("Status byte: no data yet"),
                Some(StatusByte::SyncRequest) => sync_pending = true,
                Some(StatusByte::Unknown(byte)) => warn!(byte, "Unexpected status byte"),
                None => {}
            }

            let mut payload = block.payload();

            // The first non-empty payload is the stream header: parse it,
            // fix the column set and wire up the decode path.
            if header.is_none() && !payload.is_empty() {
                let parsed = match self.family {
                    ModuleFamily::Hd => {
                        let parsed = StreamHeader::parse_legacy(payload)?;
                        payload = &payload[LEGACY_HEADER_LEN..];
                        parsed
                    }
                    ModuleFamily::HdPlus => {
                        // The Plus header fills its whole block
                        let parsed = StreamHeader::parse_plus(payload)?;
                        payload = &[];
                        parsed
                    }
                };
                let decoder =
                    StreamDecoder::for_header(&parsed, self.config.corrupt_packet_limit)?;

                path = match path {
                    DecodePath::Waiting(mut sink) => {
                        sink.write_columns(parsed.channels())?;
                        match self.config.save_mode {
                            SaveMode::PostProcess => DecodePath::Buffered {
                                mega: Vec::with_capacity(estimated_bytes),
                                decoder,
                                sink,
                            },
                            SaveMode::RealTime => {
                                let (tx, rx) = mpsc::unbounded_channel();
                                let handle = tokio::spawn(decode_worker(rx, decoder, sink));
                                DecodePath::Live { tx, handle }
                            }
                        }
                    }
                    other => other,
                };
                header = Some(parsed);
            }

            if !payload.is_empty() {
                match &mut path {
                    DecodePath::Waiting(_) => {}
                    DecodePath::Buffered { mega, .. } => mega.extend_from_slice(payload),
                    DecodePath::Live { tx, .. } => {
                        if tx.send(payload.to_vec()).is_err() {
                            warn!("Real-time decode worker stopped accepting data");
                            worker_failed = true;
                        }
                    }
                }
            }

            // Perform the ack sequence required by the current status. A
            // pending stop request rides ahead of the sync ack so the
            // instrument winds the stream down instead of continuing.
            if sync_pending {
                if request_stop {
                    self.control.send_command("rec stop").await?;
                    if !stop_ordered {
                        stop_ordered = true;
                        info!("Stopping stream, recording time is complete");
                    }
                }
                self.link.send_sync_ack().await?;
                sync_pending = false;
            }
        }

        let elapsed = started.elapsed();
        if let Some(capture) = capture.as_mut() {
            capture.flush()?;
        }

        // Drain the chosen decode path into the final sink + stats
        let (sink, stats) = match path {
            DecodePath::Waiting(sink) => {
                warn!("Stream ended before a stream header was received");
                (sink, DecodeStats::default())
            }
            DecodePath::Buffered { mega, mut decoder, mut sink } => {
                info!(buffered_bytes = mega.len(), "Post-processing stream data");
                decoder.decode(&mega, &mut sink)?;
                sink.flush()?;
                let stats = decoder.stats();
                if stats.undecoded_bytes > 0 {
                    warn!(bytes = stats.undecoded_bytes, "Trailing bytes could not be decoded");
                }
                (sink, stats)
            }
            DecodePath::Live { tx, handle } => {
                // Closing the channel lets the worker drain and finish
                drop(tx);
                info!("Waiting for real-time decode worker to complete");
                let (sink, decoder) = handle.await.map_err(|e| {
                    StreamError::decode("real-time decode worker", e.to_string())
                })??;
                let stats = decoder.stats();
                if stats.undecoded_bytes > 0 {
                    warn!(bytes = stats.undecoded_bytes, "Trailing bytes could not be decoded");
                }
                (sink, stats)
            }
        };

        let termination_code = match termination {
            Some(code) => code,
            None => {
                return Err(StreamError::decode(
                    "real-time decode worker",
                    "worker stopped before the stream completed",
                ));
            }
        };

        info!(
            termination_code,
            bytes_received,
            stripes = stats.stripes,
            ?elapsed,
            "Stream session complete"
        );

        Ok((sink, StreamSummary { termination_code, bytes_received, stats, elapsed }))
    }
}

/// Background worker for real-time decode.
///
/// Single consumer of the chunk channel; owns the decoder and the sink for
/// the whole stream, so no decode state is ever shared across threads.
async fn decode_worker<W: StripeSink>(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut decoder: StreamDecoder,
    mut sink: W,
) -> Result<(W, StreamDecoder)> {
    debug!("Real-time decode worker started");
    while let Some(chunk) = rx.recv().await {
        decoder.decode(&chunk, &mut sink)?;
    }
    sink.flush()?;
    debug!(stripes = decoder.stats().stripes, "Real-time decode worker finished");
    Ok((sink, decoder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use anyhow::Result as TestResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;

    /// Canned control port recording every command it receives.
    struct FakePort {
        responses: HashMap<&'static str, &'static str>,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ControlPort for FakePort {
        async fn send_command(&mut self, command: &str) -> crate::Result<String> {
            self.log.lock().unwrap().push(command.to_string());
            Ok(self.responses.get(command).copied().unwrap_or("OK").to_string())
        }
    }

    fn fake_port(hello: &'static str) -> (FakePort, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let port = FakePort {
            responses: HashMap::from([
                ("*serial?", "QTL1944-02-035"),
                ("hello?", hello),
                ("rec:5v:volt:enable?", "ON"),
                ("rec:12v:volt:enable?", "ON"),
                ("rec:5v:current:enable?", "ON"),
                ("rec:12v:current:enable?", "ON"),
                ("rec:ave?", "16k"),
            ]),
            log: Arc::clone(&log),
        };
        (port, log)
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 2);
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Legacy words for one full all-channels cycle.
    fn legacy_cycle(v5: u16, i5: u32, v12: u16, i12: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        for word in [v5, (i5 / 4096) as u16, (i5 % 4096) as u16, v12, (i12 / 4096) as u16,
            (i12 % 4096) as u16]
        {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    fn config(save_mode: SaveMode) -> StreamConfig {
        StreamConfig { duration: Duration::from_secs(30), save_mode, ..StreamConfig::default() }
    }

    #[tokio::test]
    async fn legacy_stream_records_post_process() -> TestResult<()> {
        let (port, log) = fake_port("HD Programmable Power Module");
        let (mut server, client) = tokio::io::duplex(4096);

        // Header block, one data block, end-of-stream block
        server.write_all(&frame(&[1, 0, 0x0F, 2])).await?;
        server.write_all(&frame(&legacy_cycle(1000, 500, 12_000, 200))).await?;
        server.write_all(&frame(&[0])).await?;

        let session =
            StreamSession::connect(port, client, config(SaveMode::PostProcess)).await?;
        assert_eq!(session.family(), ModuleFamily::Hd);

        let (sink, summary) = session.record(MemorySink::new()).await?;
        assert_eq!(summary.termination_code, 0);
        assert_eq!(summary.stats.stripes, 1);
        assert_eq!(sink.columns(), Some(crate::ChannelMask::ALL));
        assert_eq!(sink.stripes()[0].volt_5v, Some(1000));
        assert_eq!(sink.stripes()[0].curr_12v, Some(200));

        let log = log.lock().unwrap();
        assert!(log.contains(&"conf stream enable on".to_string()));
        assert!(log.contains(&"rec stream".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn legacy_header_and_data_share_the_first_block() -> TestResult<()> {
        let (port, _) = fake_port("HD Programmable Power Module");
        let (mut server, client) = tokio::io::duplex(4096);

        // Header plus a full cycle in one block, then end
        let mut first = vec![1, 0, 0x0F, 0];
        first.extend(legacy_cycle(900, 450, 11_900, 180));
        server.write_all(&frame(&first)).await?;
        server.write_all(&frame(&[0])).await?;

        let session =
            StreamSession::connect(port, client, config(SaveMode::PostProcess)).await?;
        let (sink, summary) = session.record(MemorySink::new()).await?;
        assert_eq!(summary.stats.stripes, 1);
        assert_eq!(sink.stripes()[0].volt_5v, Some(900));
        Ok(())
    }

    #[tokio::test]
    async fn stream_ending_without_header_is_benign() -> TestResult<()> {
        let (port, _) = fake_port("HD Programmable Power Module");
        let (mut server, client) = tokio::io::duplex(4096);

        server.write_all(&frame(&[2])).await?; // immediate end, code 2

        let session =
            StreamSession::connect(port, client, config(SaveMode::PostProcess)).await?;
        let (sink, summary) = session.record(MemorySink::new()).await?;
        assert_eq!(summary.termination_code, 2);
        assert_eq!(summary.stats, DecodeStats::default());
        assert_eq!(sink.columns(), None);
        Ok(())
    }

    #[tokio::test]
    async fn stop_request_rides_the_sync_handshake() -> TestResult<()> {
        let (port, log) = fake_port("HD Programmable Power Module");
        let (mut server, client) = tokio::io::duplex(4096);

        let mut session =
            StreamSession::connect(port, client, config(SaveMode::PostProcess)).await?;
        // Expire the recording window immediately
        session.config.duration = Duration::ZERO;

        let server_task = tokio::spawn(async move {
            // Header, then a sync request the client must answer, then end
            server.write_all(&frame(&[1, 0, 0x0F, 0])).await.unwrap();
            server.write_all(&frame(&[7])).await.unwrap();

            // Expect stub acks for two blocks plus one sync ack
            let mut acks = [0u8; 12];
            tokio::io::AsyncReadExt::read_exact(&mut server, &mut acks).await.unwrap();
            assert_eq!(&acks[8..], &crate::framing::SYNC_ACK);

            server.write_all(&frame(&[1])).await.unwrap();
            server
        });

        let (_, summary) = session.record(MemorySink::new()).await?;
        assert_eq!(summary.termination_code, 1);
        server_task.await?;

        // The stop command must have gone out before the recording ended
        let log = log.lock().unwrap();
        assert!(log.contains(&"rec stop".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_token_requests_a_stop() -> TestResult<()> {
        let (port, log) = fake_port("HD Programmable Power Module");
        let (mut server, client) = tokio::io::duplex(4096);

        let session =
            StreamSession::connect(port, client, config(SaveMode::PostProcess)).await?;
        session.cancel_token().cancel();

        let server_task = tokio::spawn(async move {
            server.write_all(&frame(&[1, 0, 0x0F, 0])).await.unwrap();
            server.write_all(&frame(&[7])).await.unwrap();

            // Two stub acks plus the sync ack, then the stream may end
            let mut acks = [0u8; 12];
            tokio::io::AsyncReadExt::read_exact(&mut server, &mut acks).await.unwrap();
            server.write_all(&frame(&[0])).await.unwrap();
            server
        });

        let (_, summary) = session.record(MemorySink::new()).await?;
        assert_eq!(summary.termination_code, 0);
        server_task.await?;

        assert!(log.lock().unwrap().contains(&"rec stop".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn real_time_mode_decodes_on_the_worker() -> TestResult<()> {
        let (port, _) = fake_port("HD Programmable Power Module");
        let (mut server, client) = tokio::io::duplex(4096);

        server.write_all(&frame(&[1, 0, 0x0F, 0])).await?;
        for i in 0..5u16 {
            server
                .write_all(&frame(&legacy_cycle(1000 + i, 500, 12_000, 200)))
                .await?;
        }
        server.write_all(&frame(&[0])).await?;

        let session = StreamSession::connect(port, client, config(SaveMode::RealTime)).await?;
        let (sink, summary) = session.record(MemorySink::new()).await?;

        assert_eq!(summary.stats.stripes, 5);
        assert_eq!(sink.stripes().len(), 5);
        for (i, stripe) in sink.stripes().iter().enumerate() {
            assert_eq!(stripe.volt_5v, Some(1000 + i as i32));
            assert_eq!(stripe.time_us, i as u64 * 4);
        }
        Ok(())
    }

    #[tokio::test]
    async fn capture_mirrors_every_block() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let capture_path = dir.path().join("stream.dat");

        let (port, _) = fake_port("HD Programmable Power Module");
        let (mut server, client) = tokio::io::duplex(4096);

        server.write_all(&frame(&[1, 0, 0x0F, 0])).await?;
        server.write_all(&frame(&[0])).await?;

        let mut cfg = config(SaveMode::PostProcess);
        cfg.capture_path = Some(capture_path.clone());
        let session = StreamSession::connect(port, client, cfg).await?;
        session.record(MemorySink::new()).await?;

        let bytes = std::fs::read(&capture_path)?;
        // Preamble + (8 + 4 + 4) header block + (8 + 4 + 1) end block
        assert_eq!(bytes.len(), 2 + 16 + 13);
        assert_eq!(&bytes[..2], &[0x00, 0x02]);
        assert_eq!(&bytes[10..14], &4u32.to_be_bytes());
        assert_eq!(&bytes[14..18], &[1, 0, 0x0F, 0]);
        Ok(())
    }
}
