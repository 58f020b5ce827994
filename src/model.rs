//! Supported device models and their limit tables.

use core::str::FromStr;

use crate::frame::Field;

/// FNIRSI power supply variants driven by this crate.
///
/// Both speak the same command set and fixed-point scales; they differ in
/// the banner emitted when the link opens and in the ranges the hardware
/// accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceModel {
    /// DC6006L bench supply, 60 V / 6 A / 360 W.
    #[default]
    Dc6006l,
    /// DC-580 buck module, 50 V / 5 A.
    Dc580,
}

impl DeviceModel {
    /// Two-byte banner the device sends when the serial link first opens.
    pub const fn greeting(self) -> &'static [u8] {
        match self {
            DeviceModel::Dc6006l => b"KB",
            DeviceModel::Dc580 => b"MB",
        }
    }

    /// Accepted setting ranges for this model.
    pub const fn limits(self) -> DeviceLimits {
        match self {
            DeviceModel::Dc6006l => DeviceLimits {
                max_voltage_mv: 60_000,
                max_current_ma: 6_000,
                max_power_mw: 360_000,
            },
            DeviceModel::Dc580 => DeviceLimits {
                max_voltage_mv: 50_000,
                max_current_ma: 5_000,
                max_power_mw: 250_000,
            },
        }
    }
}

impl core::fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceModel::Dc6006l => write!(f, "DC6006L"),
            DeviceModel::Dc580 => write!(f, "DC-580"),
        }
    }
}

impl FromStr for DeviceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dc6006l" => Ok(DeviceModel::Dc6006l),
            "dc580" | "dc-580" => Ok(DeviceModel::Dc580),
            other => Err(format!("unknown model '{other}' (expected dc6006l or dc580)")),
        }
    }
}

/// Inclusive per-field bounds in milli-units (seconds for the over-time
/// limit). Maxima stay below 9999 raw counts so every in-range value fits
/// its four-digit frame field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_voltage_mv: u32,
    pub max_current_ma: u32,
    pub max_power_mw: u32,
}

impl DeviceLimits {
    /// Longest over-time limit encodable as `H99 M59 S59`.
    pub const MAX_HOLD_SECS: u32 = 99 * 3600 + 59 * 60 + 59;

    /// Inclusive accepted range for `field`.
    pub const fn range(&self, field: Field) -> (u32, u32) {
        match field {
            Field::Voltage | Field::OverVoltage => (0, self.max_voltage_mv),
            Field::Current | Field::OverCurrent => (0, self.max_current_ma),
            Field::OverPower => (0, self.max_power_mw),
            Field::HoldTime => (0, Self::MAX_HOLD_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn model_from_str() {
        assert_eq!("dc6006l".parse::<DeviceModel>().unwrap(), DeviceModel::Dc6006l);
        assert_eq!("DC580".parse::<DeviceModel>().unwrap(), DeviceModel::Dc580);
        assert!("dc9999".parse::<DeviceModel>().is_err());
    }

    #[test]
    fn every_field_has_a_range() {
        for model in [DeviceModel::Dc6006l, DeviceModel::Dc580] {
            let limits = model.limits();
            for field in Field::iter() {
                let (min, max) = limits.range(field);
                assert_eq!(min, 0);
                assert!(max > 0);
            }
        }
    }

    #[test]
    fn raw_counts_fit_four_digits() {
        // Voltage scales at x100 and power at x10 on the wire; the limit
        // tables must keep both under the 9999 field ceiling.
        for model in [DeviceModel::Dc6006l, DeviceModel::Dc580] {
            let limits = model.limits();
            assert!(limits.max_voltage_mv / 10 <= 9999);
            assert!(limits.max_current_ma <= 9999);
            assert!(limits.max_power_mw / 100 <= 9999);
        }
    }

    #[test]
    fn greetings_differ_per_model() {
        assert_eq!(DeviceModel::Dc6006l.greeting(), b"KB");
        assert_eq!(DeviceModel::Dc580.greeting(), b"MB");
    }
}
