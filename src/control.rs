//! Textual control channel to the instrument.
//!
//! The vendor transport (USB/Serial/LAN) is out of scope; the session only
//! needs the ability to send a command string and get a response string
//! back. [`ControlPort`] is that seam, and this module carries the handful
//! of query helpers the recording flow needs: identifying the module
//! family, and sizing the receive buffer from the channel-enable and
//! averaging-rate state.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Result, StreamError};
use crate::types::stripes_per_second;

/// Command/response channel to the instrument.
#[async_trait]
pub trait ControlPort: Send {
    /// Send one textual command and return the instrument's response.
    async fn send_command(&mut self, command: &str) -> Result<String>;
}

/// Stream-capable module families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFamily {
    /// Original HD module, fixed-word stream format.
    Hd,
    /// HD Plus module, packet-based stream format.
    HdPlus,
}

/// Verify the attached module is a supported HD unit and detect its family.
///
/// Only QTL1944-based HD power modules speak the stream protocol; anything
/// else fails construction outright. Modules announcing "HD PLUS" use the
/// packet-based encoding.
pub async fn probe_module<C: ControlPort + ?Sized>(port: &mut C) -> Result<ModuleFamily> {
    let serial = port.send_command("*serial?").await?;
    if !serial.contains("1944") {
        return Err(StreamError::unsupported_device(
            "this code only supports HD power modules (QTL1999 / QTL1995)",
        ));
    }

    let hello = port.send_command("hello?").await?;
    let family = if hello.to_uppercase().contains("HD PLUS") {
        ModuleFamily::HdPlus
    } else {
        ModuleFamily::Hd
    };
    info!(serial = %serial.trim(), ?family, "Identified power module");
    Ok(family)
}

/// Work out how many bytes one stripe occupies on the wire, from the
/// per-channel enable state. Voltage channels are one word, current
/// channels two.
pub async fn query_bytes_per_stripe<C: ControlPort + ?Sized>(port: &mut C) -> Result<usize> {
    let mut bytes_per_stripe = 0;
    if port.send_command("rec:5v:volt:enable?").await?.contains("ON") {
        bytes_per_stripe += 2;
    }
    if port.send_command("rec:12v:volt:enable?").await?.contains("ON") {
        bytes_per_stripe += 2;
    }
    if port.send_command("rec:5v:current:enable?").await?.contains("ON") {
        bytes_per_stripe += 4;
    }
    if port.send_command("rec:12v:current:enable?").await?.contains("ON") {
        bytes_per_stripe += 4;
    }
    debug!(bytes_per_stripe, "Queried channel enables");
    Ok(bytes_per_stripe)
}

/// Query the configured averaging rate and map it to stripes/second.
pub async fn query_stripes_per_second<C: ControlPort + ?Sized>(port: &mut C) -> Result<f64> {
    let response = port.send_command("rec:ave?").await?;
    stripes_per_second(&response)
}
