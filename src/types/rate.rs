//! Averaging rate handling.
//!
//! The instrument averages its fixed 4 us base sample period down by a
//! power-of-two divisor. Two representations exist on the wire: the stream
//! header carries the raw averaging code byte, while the `rec:ave?` control
//! command answers with a textual code ("16k" etc.). Both are handled here.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Fixed base sample period of the hardware, in microseconds.
const BASE_SAMPLE_PERIOD_US: u64 = 4;

/// Averaging rate as carried in the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AveragingRate {
    code: u8,
}

impl AveragingRate {
    /// Wrap the raw averaging code byte from the stream header.
    pub fn from_code(code: u8) -> Self {
        AveragingRate { code }
    }

    /// Raw averaging code byte.
    pub fn code(self) -> u8 {
        self.code
    }

    /// Time advance per stripe in microseconds.
    ///
    /// The step is the squared averaging code scaled by the 4 us base
    /// period. Code 0 means no averaging, where the step collapses to the
    /// base period itself.
    pub fn stripe_step_us(self) -> u64 {
        let step = (self.code as u64).pow(2) * BASE_SAMPLE_PERIOD_US;
        if step == 0 { BASE_SAMPLE_PERIOD_US } else { step }
    }
}

/// Map a `rec:ave?` command response to the expected stripe rate in
/// stripes/second.
///
/// The instrument answers with a short code, optionally followed by a
/// colon-separated description; only the code before the colon matters.
/// Unknown codes are a hard error so that buffer sizing never silently
/// defaults.
pub fn stripes_per_second(response: &str) -> Result<f64> {
    let code = response.split(':').next().unwrap_or("").trim();
    let rate = match code {
        "0" => 250_000.0,
        "2" => 125_000.0,
        "4" => 62_500.0,
        "8" => 31_250.0,
        "16" => 15_625.0,
        "32" => 7_812.5,
        "64" => 3_906.25,
        "128" => 1_953.125,
        "256" => 976.562_5,
        "1k" => 488.281_25,
        "2k" => 244.140_62,
        "4k" => 122.070_31,
        "8k" => 61.035_15,
        "16k" => 30.517_58,
        "32k" => 15.258_79,
        _ => {
            return Err(StreamError::configuration(format!(
                "Unknown averaging rate response: {response}"
            )));
        }
    };
    Ok(rate)
}
