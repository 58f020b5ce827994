//! Frame codec for the FNIRSI serial protocol.
//!
//! Outbound commands are fixed-format ASCII frames: one opcode letter, an
//! optional zero-padded decimal argument at that field's fixed-point scale,
//! then `\r\n`. Responses arrive as `A`-separated fixed-width decimal
//! fragments (see [`Fragment`]).
//!
//! The protocol carries no checksum, so the codec can only reject frames
//! whose shape is wrong; a corrupted frame that still parses is
//! indistinguishable from a valid one. Read-back verification is the
//! caller's job, not the codec's.

use std::time::Duration;

use strum_macros::EnumIter;
use thiserror::Error;

use crate::model::DeviceLimits;
use crate::status::{OutputMode, TripCause};

/// Terminator for outbound command frames.
pub const TERMINATOR: &[u8] = b"\r\n";
/// Field separator in response fragments.
pub const SEPARATOR: u8 = b'A';
/// Longest outbound frame: opcode, four digits, CRLF. Frame builders below
/// never exceed this, which keeps the buffer pushes infallible.
pub const MAX_FRAME: usize = 8;

/// One encoded command frame.
pub type FrameBuf = heapless::Vec<u8, MAX_FRAME>;

/// Settable fields, named in validation and verification errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Field {
    Voltage,
    Current,
    OverVoltage,
    OverCurrent,
    OverPower,
    HoldTime,
}

impl Field {
    /// Milli-unit suffix for messages (seconds for the over-time limit).
    pub const fn unit(&self) -> &'static str {
        match self {
            Field::Voltage | Field::OverVoltage => "mV",
            Field::Current | Field::OverCurrent => "mA",
            Field::OverPower => "mW",
            Field::HoldTime => "s",
        }
    }

    /// One raw wire count expressed in milli-units; the read-back comparison
    /// tolerance, since encoding truncates below this resolution.
    pub const fn tolerance(&self) -> u32 {
        match self {
            Field::Voltage | Field::OverVoltage => 10,
            Field::Current | Field::OverCurrent => 1,
            Field::OverPower => 100,
            Field::HoldTime => 1,
        }
    }
}

impl core::fmt::Display for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Field::Voltage => "voltage",
            Field::Current => "current",
            Field::OverVoltage => "over-voltage limit",
            Field::OverCurrent => "over-current limit",
            Field::OverPower => "over-power limit",
            Field::HoldTime => "over-time limit",
        };
        write!(f, "{name}")
    }
}

/// Errors raised by the codec itself. Out-of-range arguments surface as
/// [`Error::Validation`](crate::error::Error::Validation); everything else
/// as [`Error::MalformedFrame`](crate::error::Error::MalformedFrame).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("{field} {value} {unit} outside device range {min}..={max} {unit}", unit = .field.unit())]
    OutOfRange {
        field: Field,
        value: u32,
        min: u32,
        max: u32,
    },
    /// Response length matches no known fragment shape.
    #[error("response length {0} matches no known frame")]
    Length(usize),
    /// Right length, but a field holds something other than decimal digits
    /// or a code outside its defined set.
    #[error("corrupt field in {0}-byte response frame")]
    Corrupt(usize),
}

/// Single-letter command frames with no argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Action {
    /// Enable the output.
    PowerOn,
    /// Disable the output.
    PowerOff,
    /// Start the status log stream.
    LogOn,
    /// Stop the status log stream.
    LogOff,
    /// Disable all protections.
    NoProtect,
    /// Arm the over-time limit.
    HoldEnable,
    /// Disarm the over-time limit.
    HoldDisable,
    /// Recall memory preset m1.
    RecallM1,
    /// Recall memory preset m2.
    RecallM2,
}

impl Action {
    pub const fn opcode(self) -> u8 {
        match self {
            Action::PowerOn => b'N',
            Action::PowerOff => b'F',
            Action::LogOn => b'Q',
            Action::LogOff => b'W',
            Action::NoProtect => b'Z',
            Action::HoldEnable => b'X',
            Action::HoldDisable => b'Y',
            Action::RecallM1 => b'O',
            Action::RecallM2 => b'P',
        }
    }
}

/// Device memory presets reachable over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySlot {
    M1,
    M2,
}

/// Four-digit setting frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Setting {
    /// `V` - target voltage, volts x100.
    Voltage,
    /// `I` - target current, amps x1000.
    Current,
    /// `B` - over-voltage limit, volts x100.
    OverVoltage,
    /// `D` - over-current limit, amps x1000.
    OverCurrent,
    /// `E` - over-power limit, watts x10.
    OverPower,
}

impl Setting {
    pub const fn opcode(self) -> u8 {
        match self {
            Setting::Voltage => b'V',
            Setting::Current => b'I',
            Setting::OverVoltage => b'B',
            Setting::OverCurrent => b'D',
            Setting::OverPower => b'E',
        }
    }

    /// Milli-units per raw wire count.
    pub const fn divisor(self) -> u32 {
        match self {
            Setting::Voltage | Setting::OverVoltage => 10,
            Setting::Current | Setting::OverCurrent => 1,
            Setting::OverPower => 100,
        }
    }

    pub const fn field(self) -> Field {
        match self {
            Setting::Voltage => Field::Voltage,
            Setting::Current => Field::Current,
            Setting::OverVoltage => Field::OverVoltage,
            Setting::OverCurrent => Field::OverCurrent,
            Setting::OverPower => Field::OverPower,
        }
    }
}

/// Encode a single-letter action frame.
pub fn action_frame(action: Action) -> FrameBuf {
    let mut buf = FrameBuf::new();
    let _ = buf.push(action.opcode());
    let _ = buf.extend_from_slice(TERMINATOR);
    buf
}

/// Encode a setting frame, validating `milli` against the model limits
/// before any bytes exist. Values inside range always fit the four-digit
/// field because the limit tables cap raw counts at 9999.
pub fn setting_frame(
    setting: Setting,
    milli: u32,
    limits: &DeviceLimits,
) -> Result<FrameBuf, FrameError> {
    let field = setting.field();
    let (min, max) = limits.range(field);
    if milli < min || milli > max {
        return Err(FrameError::OutOfRange {
            field,
            value: milli,
            min,
            max,
        });
    }
    let raw = milli / setting.divisor();
    let mut buf = FrameBuf::new();
    let _ = buf.push(setting.opcode());
    push_decimal(&mut buf, raw, 4);
    let _ = buf.extend_from_slice(TERMINATOR);
    Ok(buf)
}

/// Encode the over-time limit as its `H`/`M`/`S` frame trio. Arming and
/// disarming the timer are separate [`Action`] frames.
pub fn hold_frames(secs: u32, limits: &DeviceLimits) -> Result<[FrameBuf; 3], FrameError> {
    let (min, max) = limits.range(Field::HoldTime);
    if secs < min || secs > max {
        return Err(FrameError::OutOfRange {
            field: Field::HoldTime,
            value: secs,
            min,
            max,
        });
    }
    Ok([
        two_digit_frame(b'H', secs / 3600),
        two_digit_frame(b'M', secs % 3600 / 60),
        two_digit_frame(b'S', secs % 60),
    ])
}

fn two_digit_frame(opcode: u8, value: u32) -> FrameBuf {
    let mut buf = FrameBuf::new();
    let _ = buf.push(opcode);
    push_decimal(&mut buf, value, 2);
    let _ = buf.extend_from_slice(TERMINATOR);
    buf
}

fn push_decimal(buf: &mut FrameBuf, value: u32, width: u32) {
    for position in (0..width).rev() {
        let digit = value / 10u32.pow(position) % 10;
        let _ = buf.push(b'0' + digit as u8);
    }
}

/// One decoded response fragment.
///
/// The device interleaves three fragment shapes on its log stream; the
/// shape (field widths and separator positions) acts as the response
/// opcode. All numeric fields are returned in milli-units, the inverse of
/// the encoding scales.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Live measurements plus output state.
    Meter {
        voltage_mv: u32,
        current_ma: u32,
        power_mw: u32,
        temperature_c: u16,
        mode: OutputMode,
        trip: TripCause,
        output_on: bool,
    },
    /// Protection limits, timer arming and elapsed output time.
    Limits {
        over_voltage_mv: u32,
        over_current_ma: u32,
        over_power_mw: u32,
        timer_enabled: bool,
        elapsed: Duration,
    },
    /// Target set-points; the read-back source for double-check mode.
    Target { voltage_mv: u32, current_ma: u32 },
}

impl Fragment {
    const METER_WIDTHS: [usize; 8] = [4, 4, 4, 1, 3, 1, 1, 1];
    const LIMITS_WIDTHS: [usize; 7] = [4, 4, 4, 1, 2, 2, 2];
    // The over-power field grows to five digits past 999.9 W.
    const LIMITS_WIDE_WIDTHS: [usize; 7] = [4, 4, 5, 1, 2, 2, 2];
    const TARGET_WIDTHS: [usize; 2] = [4, 4];

    pub const METER_LEN: usize = 27;
    pub const LIMITS_LEN: usize = 26;
    pub const TARGET_LEN: usize = 10;

    /// Strict decode of one complete response frame.
    ///
    /// A frame matching no known shape is malformed; with no checksum in
    /// the protocol this is the only integrity check available, so it is
    /// surfaced rather than skipped.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if let Some(f) = fields(frame, &Self::METER_WIDTHS) {
            return Self::meter(&f);
        }
        if let Some(f) = fields(frame, &Self::LIMITS_WIDTHS) {
            return Ok(Self::limits(&f));
        }
        if let Some(f) = fields(frame, &Self::LIMITS_WIDE_WIDTHS) {
            return Ok(Self::limits(&f));
        }
        if let Some(f) = fields(frame, &Self::TARGET_WIDTHS) {
            return Ok(Self::target(&f));
        }
        match frame.len() {
            Self::METER_LEN | Self::LIMITS_LEN | Self::TARGET_LEN => {
                Err(FrameError::Corrupt(frame.len()))
            }
            len => Err(FrameError::Length(len)),
        }
    }

    /// Extract the first complete fragment from a read buffer, returning it
    /// with the number of bytes consumed.
    ///
    /// The device prefixes its first transmission with a banner and
    /// occasionally puts garbage ahead of a meter fragment; the scanner
    /// resynchronises on the first position that parses. A ten-byte prefix
    /// that could still grow into a limits fragment is held back until the
    /// following bytes settle which shape it is. Returns `None` while the
    /// buffer holds no complete fragment.
    pub fn scan(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() >= Self::METER_LEN {
            if let Some(f) = fields(&buf[..Self::METER_LEN], &Self::METER_WIDTHS) {
                if let Ok(fragment) = Self::meter(&f) {
                    return Some((fragment, Self::METER_LEN));
                }
            }
            if let Some(f) = fields(&buf[..Self::METER_LEN], &Self::LIMITS_WIDE_WIDTHS) {
                return Some((Self::limits(&f), Self::METER_LEN));
            }
        }
        if buf.len() >= Self::LIMITS_LEN {
            if let Some(f) = fields(&buf[..Self::LIMITS_LEN], &Self::LIMITS_WIDTHS) {
                return Some((Self::limits(&f), Self::LIMITS_LEN));
            }
        }
        if buf.len() >= Self::TARGET_LEN {
            if let Some(f) = fields(&buf[..Self::TARGET_LEN], &Self::TARGET_WIDTHS) {
                // The same ten bytes also open both limits shapes; take the
                // target reading only once the tail rules those out.
                let still_limits = prefix_matches(buf, &Self::LIMITS_WIDTHS)
                    || prefix_matches(buf, &Self::LIMITS_WIDE_WIDTHS);
                if !still_limits {
                    return Some((Self::target(&f), Self::TARGET_LEN));
                }
            }
        }
        if buf.len() > Self::METER_LEN {
            for start in 1..=buf.len() - Self::METER_LEN {
                if let Some(f) = fields(&buf[start..start + Self::METER_LEN], &Self::METER_WIDTHS)
                {
                    if let Ok(fragment) = Self::meter(&f) {
                        tracing::debug!(skipped = start, "resynchronised on meter fragment");
                        return Some((fragment, start + Self::METER_LEN));
                    }
                }
            }
        }
        None
    }

    fn meter(f: &[u32; 8]) -> Result<Self, FrameError> {
        let trip = TripCause::from_code(f[6]).ok_or(FrameError::Corrupt(Self::METER_LEN))?;
        Ok(Fragment::Meter {
            voltage_mv: f[0] * 10,
            current_ma: f[1],
            power_mw: f[2] * 100,
            temperature_c: f[4] as u16,
            mode: if f[5] == 0 {
                OutputMode::ConstantVoltage
            } else {
                OutputMode::ConstantCurrent
            },
            trip,
            output_on: f[7] != 0,
        })
    }

    fn limits(f: &[u32; 7]) -> Self {
        Fragment::Limits {
            over_voltage_mv: f[0] * 10,
            over_current_ma: f[1],
            over_power_mw: f[2] * 100,
            timer_enabled: f[3] != 0,
            elapsed: Duration::from_secs(u64::from(f[4] * 3600 + f[5] * 60 + f[6])),
        }
    }

    fn target(f: &[u32; 2]) -> Self {
        Fragment::Target {
            voltage_mv: f[0] * 10,
            current_ma: f[1],
        }
    }
}

/// Check `frame` against one shape: runs of decimal digits, each followed
/// by the separator, nothing else. Returns the field values on an exact
/// match.
fn fields<const N: usize>(frame: &[u8], widths: &[usize; N]) -> Option<[u32; N]> {
    let expected: usize = widths.iter().sum::<usize>() + N;
    if frame.len() != expected {
        return None;
    }
    let mut values = [0u32; N];
    let mut pos = 0;
    for (slot, &width) in values.iter_mut().zip(widths) {
        let mut value = 0u32;
        for &byte in &frame[pos..pos + width] {
            if !byte.is_ascii_digit() {
                return None;
            }
            value = value * 10 + u32::from(byte - b'0');
        }
        if frame[pos + width] != SEPARATOR {
            return None;
        }
        *slot = value;
        pos += width + 1;
    }
    Some(values)
}

/// Like [`fields`] but accepts a truncated buffer: reports whether `buf`
/// could still be (a prefix of) the given shape.
fn prefix_matches(buf: &[u8], widths: &[usize]) -> bool {
    let mut pos = 0;
    for &width in widths {
        for offset in 0..width {
            match buf.get(pos + offset) {
                None => return true,
                Some(b) if b.is_ascii_digit() => {}
                Some(_) => return false,
            }
        }
        match buf.get(pos + width) {
            None => return true,
            Some(&SEPARATOR) => {}
            Some(_) => return false,
        }
        pos += width + 1;
    }
    true
}
