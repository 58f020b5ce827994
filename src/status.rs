//! Decoded device status and the status/trace reporter.

use core::fmt;
use std::time::Duration;

use serde::Serialize;
use strum_macros::EnumIter;

use crate::frame::Fragment;

/// Constant-voltage / constant-current regulation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputMode {
    #[serde(rename = "CV")]
    ConstantVoltage,
    #[serde(rename = "CC")]
    ConstantCurrent,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::ConstantVoltage => write!(f, "CV"),
            OutputMode::ConstantCurrent => write!(f, "CC"),
        }
    }
}

/// Which protection tripped, as reported on the meter fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumIter)]
pub enum TripCause {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "OVP")]
    OverVoltage,
    #[serde(rename = "OCP")]
    OverCurrent,
    #[serde(rename = "OPP")]
    OverPower,
    #[serde(rename = "OTP")]
    OverTemperature,
    #[serde(rename = "OHP")]
    OverTime,
}

impl TripCause {
    /// Decode the wire code; codes outside the defined set are corrupt.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(TripCause::None),
            1 => Some(TripCause::OverVoltage),
            2 => Some(TripCause::OverCurrent),
            3 => Some(TripCause::OverPower),
            4 => Some(TripCause::OverTemperature),
            5 => Some(TripCause::OverTime),
            _ => None,
        }
    }

    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for TripCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TripCause::None => "none",
            TripCause::OverVoltage => "OVP",
            TripCause::OverCurrent => "OCP",
            TripCause::OverPower => "OPP",
            TripCause::OverTemperature => "OTP",
            TripCause::OverTime => "OHP",
        };
        write!(f, "{name}")
    }
}

/// One decoded snapshot of device state.
///
/// The device reports through partial fragments, so every field is
/// optional; [`StatusRecord::absorb`] folds fragments into the merged
/// snapshot `stat` reports, with newer values winning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage_mv: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ma: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_mw: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<OutputMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip: Option<TripCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_voltage_mv: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_current_ma: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_power_mw: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_enabled: Option<bool>,
    /// Elapsed output time, serialised as whole seconds.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "elapsed_secs"
    )]
    pub elapsed: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_voltage_mv: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_current_ma: Option<u32>,
}

impl StatusRecord {
    /// Merge one fragment into this snapshot.
    pub fn absorb(&mut self, fragment: &Fragment) {
        match *fragment {
            Fragment::Meter {
                voltage_mv,
                current_ma,
                power_mw,
                temperature_c,
                mode,
                trip,
                output_on,
            } => {
                self.voltage_mv = Some(voltage_mv);
                self.current_ma = Some(current_ma);
                self.power_mw = Some(power_mw);
                self.temperature_c = Some(temperature_c);
                self.mode = Some(mode);
                self.trip = Some(trip);
                self.output_on = Some(output_on);
            }
            Fragment::Limits {
                over_voltage_mv,
                over_current_ma,
                over_power_mw,
                timer_enabled,
                elapsed,
            } => {
                self.over_voltage_mv = Some(over_voltage_mv);
                self.over_current_ma = Some(over_current_ma);
                self.over_power_mw = Some(over_power_mw);
                self.timer_enabled = Some(timer_enabled);
                self.elapsed = Some(elapsed);
            }
            Fragment::Target {
                voltage_mv,
                current_ma,
            } => {
                self.target_voltage_mv = Some(voltage_mv);
                self.target_current_ma = Some(current_ma);
            }
        }
    }

    pub fn from_fragment(fragment: &Fragment) -> Self {
        let mut record = StatusRecord::default();
        record.absorb(fragment);
        record
    }
}

/// The human-readable report line: output state first, then whichever
/// measurements, set-points and limits the snapshot holds.
impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.output_on {
            Some(true) => "on",
            Some(false) => "off",
            None => "-",
        };
        write!(f, "out={state}")?;
        if let Some(mv) = self.voltage_mv {
            write!(f, " {:.3}V", f64::from(mv) / 1000.0)?;
        }
        if let Some(ma) = self.current_ma {
            write!(f, " {:.3}A", f64::from(ma) / 1000.0)?;
        }
        if let Some(mw) = self.power_mw {
            write!(f, " {:.2}W", f64::from(mw) / 1000.0)?;
        }
        if let Some(t) = self.temperature_c {
            write!(f, " {t}C")?;
        }
        if let Some(mode) = self.mode {
            write!(f, " {mode}")?;
        }
        if let Some(elapsed) = self.elapsed {
            let secs = elapsed.as_secs();
            write!(f, " t={:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)?;
        }
        if let (Some(mv), Some(ma)) = (self.target_voltage_mv, self.target_current_ma) {
            write!(
                f,
                " set={:.3}V/{:.3}A",
                f64::from(mv) / 1000.0,
                f64::from(ma) / 1000.0
            )?;
        }
        if let Some(mv) = self.over_voltage_mv {
            write!(f, " ovp={:.2}V", f64::from(mv) / 1000.0)?;
        }
        if let Some(ma) = self.over_current_ma {
            write!(f, " ocp={:.3}A", f64::from(ma) / 1000.0)?;
        }
        if let Some(mw) = self.over_power_mw {
            write!(f, " opp={:.1}W", f64::from(mw) / 1000.0)?;
        }
        match self.trip {
            Some(TripCause::None) | None => {}
            Some(cause) => write!(f, " trip={cause}")?,
        }
        Ok(())
    }
}

fn elapsed_secs<S>(elapsed: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match elapsed {
        Some(d) => serializer.serialize_some(&d.as_secs()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn meter() -> Fragment {
        Fragment::Meter {
            voltage_mv: 1498,
            current_ma: 100,
            power_mw: 150,
            temperature_c: 25,
            mode: OutputMode::ConstantVoltage,
            trip: TripCause::None,
            output_on: true,
        }
    }

    #[test]
    fn trip_cause_codes_round_trip() {
        for cause in TripCause::iter() {
            assert_eq!(TripCause::from_code(cause.code()), Some(cause));
        }
        assert_eq!(TripCause::from_code(6), None);
    }

    #[test]
    fn absorb_merges_across_fragment_types() {
        let mut record = StatusRecord::default();
        record.absorb(&meter());
        record.absorb(&Fragment::Target {
            voltage_mv: 1500,
            current_ma: 100,
        });
        assert_eq!(record.voltage_mv, Some(1498));
        assert_eq!(record.target_voltage_mv, Some(1500));
        assert_eq!(record.output_on, Some(true));

        // A later meter reading overwrites, targets survive untouched.
        record.absorb(&Fragment::Meter {
            voltage_mv: 1502,
            current_ma: 100,
            power_mw: 150,
            temperature_c: 25,
            mode: OutputMode::ConstantVoltage,
            trip: TripCause::None,
            output_on: true,
        });
        assert_eq!(record.voltage_mv, Some(1502));
        assert_eq!(record.target_voltage_mv, Some(1500));
    }

    #[test]
    fn display_reports_present_fields_only() {
        let record = StatusRecord::from_fragment(&meter());
        assert_eq!(record.to_string(), "out=on 1.498V 0.100A 0.15W 25C CV");

        let sparse = StatusRecord::from_fragment(&Fragment::Target {
            voltage_mv: 5000,
            current_ma: 250,
        });
        assert_eq!(sparse.to_string(), "out=- set=5.000V/0.250A");
    }

    #[test]
    fn display_shows_trip_and_elapsed() {
        let mut record = StatusRecord::from_fragment(&meter());
        record.trip = Some(TripCause::OverCurrent);
        record.elapsed = Some(Duration::from_secs(3 * 3600 + 2 * 60 + 1));
        assert_eq!(
            record.to_string(),
            "out=on 1.498V 0.100A 0.15W 25C CV t=03:02:01 trip=OCP"
        );
    }

    #[test]
    fn json_omits_absent_fields() {
        let record = StatusRecord::from_fragment(&Fragment::Limits {
            over_voltage_mv: 12_000,
            over_current_ma: 3000,
            over_power_mw: 50_000,
            timer_enabled: false,
            elapsed: Duration::from_secs(42),
        });
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            "{\"over_voltage_mv\":12000,\"over_current_ma\":3000,\
             \"over_power_mw\":50000,\"timer_enabled\":false,\"elapsed\":42}"
        );
    }

    #[test]
    fn json_renders_mode_and_trip_codes() {
        let record = StatusRecord::from_fragment(&meter());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"mode\":\"CV\""));
        assert!(json.contains("\"trip\":\"none\""));
    }
}
