//! Output sinks for decoded stripes.
//!
//! The decode path pushes stripes into a [`StripeSink`] as they are
//! produced. Two implementations ship with the crate: [`CsvSink`] writes the
//! classic CSV layout (header row naming the enabled channels plus derived
//! power columns, one row per stripe, raw instrument units), and
//! [`MemorySink`] accumulates stripes for programmatic use.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::{Result, StreamError};
use crate::types::{ChannelMask, Stripe};

/// Destination for decoded stripes.
///
/// `write_columns` is called exactly once, after the stream header has been
/// parsed and the enabled channels are known; `write_stripe` follows once
/// per decoded stripe, in time order.
pub trait StripeSink: Send {
    /// Fix the column set for this stream and emit any header output.
    fn write_columns(&mut self, channels: ChannelMask) -> Result<()>;

    /// Append one stripe.
    fn write_stripe(&mut self, stripe: &Stripe) -> Result<()>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// CSV sink writing one row per stripe.
pub struct CsvSink<W: Write + Send> {
    writer: csv::Writer<W>,
    columns: Option<ChannelMask>,
}

impl CsvSink<File> {
    /// Create a CSV sink writing to a new file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(|e| StreamError::Io {
            context: format!("creating CSV file {}", path.as_ref().display()),
            source: e,
        })?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write + Send> CsvSink<W> {
    /// Create a CSV sink over an arbitrary writer.
    pub fn from_writer(writer: W) -> Self {
        CsvSink { writer: csv::Writer::from_writer(writer), columns: None }
    }

    /// Finish writing and return the inner writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| StreamError::Io {
            context: "finalizing CSV output".to_string(),
            source: e.into_error(),
        })
    }

    fn columns(&self) -> Result<ChannelMask> {
        self.columns.ok_or_else(|| StreamError::Sink {
            context: "stripe written before the CSV header row".to_string(),
            source: None,
        })
    }
}

impl<W: Write + Send> StripeSink for CsvSink<W> {
    fn write_columns(&mut self, channels: ChannelMask) -> Result<()> {
        let mut names = vec!["Time us"];
        if channels.volt_5v() {
            names.push("5V voltage mV");
        }
        if channels.curr_5v() {
            names.push("5V current uA");
        }
        if channels.volt_12v() {
            names.push("12V voltage mV");
        }
        if channels.curr_12v() {
            names.push("12V current uA");
        }
        if channels.rail_5v_power() {
            names.push("5V power uW");
        }
        if channels.rail_12v_power() {
            names.push("12V power uW");
        }
        if channels.total_power() {
            names.push("Total power uW");
        }

        info!(channels = %channels, columns = names.len(), "Preparing CSV column headers");
        self.writer.write_record(&names)?;
        self.columns = Some(channels);
        Ok(())
    }

    fn write_stripe(&mut self, stripe: &Stripe) -> Result<()> {
        let channels = self.columns()?;

        let mut fields = Vec::with_capacity(8);
        fields.push(stripe.time_us.to_string());
        if channels.volt_5v() {
            fields.push(stripe.volt_5v.unwrap_or_default().to_string());
        }
        if channels.curr_5v() {
            fields.push(stripe.curr_5v.unwrap_or_default().to_string());
        }
        if channels.volt_12v() {
            fields.push(stripe.volt_12v.unwrap_or_default().to_string());
        }
        if channels.curr_12v() {
            fields.push(stripe.curr_12v.unwrap_or_default().to_string());
        }
        if channels.rail_5v_power() {
            fields.push(stripe.power_5v_uw().unwrap_or_default().to_string());
        }
        if channels.rail_12v_power() {
            fields.push(stripe.power_12v_uw().unwrap_or_default().to_string());
        }
        if channels.total_power() {
            fields.push(stripe.total_power_uw().unwrap_or_default().to_string());
        }

        self.writer.write_record(&fields)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| StreamError::Io {
            context: "flushing CSV output".to_string(),
            source: e,
        })
    }
}

/// In-memory sink accumulating decoded stripes.
#[derive(Debug, Default)]
pub struct MemorySink {
    columns: Option<ChannelMask>,
    stripes: Vec<Stripe>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column set fixed by the stream header, if seen.
    pub fn columns(&self) -> Option<ChannelMask> {
        self.columns
    }

    /// Decoded stripes in time order.
    pub fn stripes(&self) -> &[Stripe] {
        &self.stripes
    }

    /// Consume the sink, returning the stripes.
    pub fn into_stripes(self) -> Vec<Stripe> {
        self.stripes
    }
}

impl StripeSink for MemorySink {
    fn write_columns(&mut self, channels: ChannelMask) -> Result<()> {
        self.columns = Some(channels);
        Ok(())
    }

    fn write_stripe(&mut self, stripe: &Stripe) -> Result<()> {
        self.stripes.push(*stripe);
        Ok(())
    }
}
