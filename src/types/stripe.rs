//! Measurement stripe type.

/// One time-ordered measurement tuple.
///
/// Voltage fields are in mV, current fields in uA. Channels that the
/// instrument is not streaming stay `None`. Derived power values are in uW
/// and only available when both channels of a rail carry data.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stripe {
    /// Time position of this stripe in microseconds from stream start.
    pub time_us: u64,
    /// 5V rail voltage in mV.
    pub volt_5v: Option<i32>,
    /// 5V rail current in uA.
    pub curr_5v: Option<i32>,
    /// 12V rail voltage in mV.
    pub volt_12v: Option<i32>,
    /// 12V rail current in uA.
    pub curr_12v: Option<i32>,
}

impl Stripe {
    /// 5V rail power in uW, when both 5V channels carry data.
    pub fn power_5v_uw(&self) -> Option<f64> {
        Some(self.volt_5v? as f64 * self.curr_5v? as f64 / 1000.0)
    }

    /// 12V rail power in uW, when both 12V channels carry data.
    pub fn power_12v_uw(&self) -> Option<f64> {
        Some(self.volt_12v? as f64 * self.curr_12v? as f64 / 1000.0)
    }

    /// Total power in uW, when all four channels carry data.
    pub fn total_power_uw(&self) -> Option<f64> {
        Some(self.power_5v_uw()? + self.power_12v_uw()?)
    }
}
