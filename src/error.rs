//! Error types for stream recording and decode.
//!
//! All errors implement the `std::error::Error` trait and carry structured
//! context (command text, buffer offsets, raw hex where useful) so that a
//! failed capture can be diagnosed offline from the log alone.
//!
//! ## Error Categories
//!
//! - **Device Errors**: the attached module is not a supported HD unit
//! - **Header Errors**: unsupported stream header version or configuration
//! - **Framing Errors**: short reads or socket failures mid-block
//! - **Decode Errors**: corrupt packet data past the tolerance threshold
//! - **Command Errors**: failures on the textual control channel
//! - **Sink Errors**: CSV/capture output failures
//!
//! ## Fatal vs. recoverable
//!
//! Most decode-side errors are terminal for the session: once the byte
//! cursor is out of step with the instrument there is nothing to resume.
//! [`StreamError::is_retryable`] distinguishes the transient transport
//! conditions where reconnecting and starting a fresh session can help.

use thiserror::Error;

/// Result type alias for stream operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for stream recording and decode operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Attached device not supported: {reason}")]
    UnsupportedDevice { reason: String },

    #[error("Unsupported stream header version {found}")]
    HeaderVersion { found: u8 },

    #[error("Unsupported stream configuration: {reason}")]
    Configuration { reason: String },

    #[error("Stream framing error: {context}")]
    Framing {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Corrupt stream data at offset {offset}: {details}")]
    Corrupt { offset: usize, details: String },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Control command failed: {command}")]
    Command {
        command: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Output sink error: {context}")]
    Sink {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// Returns whether a fresh session against the same instrument could
    /// plausibly succeed after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Framing { .. } => true,
            StreamError::Command { .. } => true,
            StreamError::Io { .. } => true,
            StreamError::UnsupportedDevice { .. } => false,
            StreamError::HeaderVersion { .. } => false,
            StreamError::Configuration { .. } => false,
            StreamError::Corrupt { .. } => false,
            StreamError::Decode { .. } => false,
            StreamError::Sink { .. } => false,
        }
    }

    /// Helper constructor for unsupported-device errors.
    pub fn unsupported_device(reason: impl Into<String>) -> Self {
        StreamError::UnsupportedDevice { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn configuration(reason: impl Into<String>) -> Self {
        StreamError::Configuration { reason: reason.into() }
    }

    /// Helper constructor for framing errors without an I/O source.
    pub fn framing(context: impl Into<String>) -> Self {
        StreamError::Framing { context: context.into(), source: None }
    }

    /// Helper constructor for framing errors wrapping a socket failure.
    pub fn framing_io(context: impl Into<String>, source: std::io::Error) -> Self {
        StreamError::Framing { context: context.into(), source: Some(source) }
    }

    /// Helper constructor for corrupt-data errors.
    pub fn corrupt(offset: usize, details: impl Into<String>) -> Self {
        StreamError::Corrupt { offset, details: details.into() }
    }

    /// Helper constructor for decode errors.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for command failures.
    pub fn command_failed(command: impl Into<String>) -> Self {
        StreamError::Command { command: command.into(), source: None }
    }

    /// Helper constructor for sink errors wrapping an output failure.
    pub fn sink(
        context: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Sink { context: context.into(), source: Some(source) }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io { context: "stream I/O".to_string(), source: err }
    }
}

impl From<csv::Error> for StreamError {
    fn from(err: csv::Error) -> Self {
        StreamError::Sink { context: "CSV output".to_string(), source: Some(Box::new(err)) }
    }
}
