//! Command processor for FNIRSI DC power supplies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use embedded_io::{Error as _, ErrorKind};

use crate::error::{Error, Result};
use crate::frame::{self, Action, FrameBuf, Fragment, MemorySlot, Setting};
use crate::model::DeviceModel;
use crate::status::StatusRecord;

/// Pause ahead of every outbound frame; the device drops bytes when
/// commands arrive back to back.
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(500);
/// Window for one complete response fragment to arrive.
pub const DEFAULT_FRAGMENT_TIMEOUT: Duration = Duration::from_millis(1500);
/// Sleep between polls while the device is quiet.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Fragments merged into one `stat` snapshot.
const STAT_SAMPLES: usize = 3;
/// Fragments inspected per read-back before giving up on the field.
const VERIFY_SAMPLES: usize = 10;
/// Resends of the same setting frame before verification fails.
const VERIFY_RETRIES: usize = 3;
/// Drain rounds in `flush` before concluding the device keeps talking.
const FLUSH_ATTEMPTS: usize = 3;

/// You can drive a FnirsiPsu over any interface which implements
/// [embedded_io::Read] & [embedded_io::Write].
///
/// Setters take milli-units (mV, mA, mW); the wire scales live in the frame
/// codec. The instance exclusively owns the session for its lifetime and
/// the port closes when it drops, including on the cancellation path out of
/// an unbounded trace capture.
pub struct FnirsiPsu<S: embedded_io::Read + embedded_io::Write, const L: usize = 256> {
    pub(crate) interface: S,
    model: DeviceModel,
    frame_delay: Duration,
    fragment_timeout: Duration,
    check_mode: bool,
    /// Unconsumed response bytes between fragment extractions.
    buffer: heapless::Vec<u8, L>,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> FnirsiPsu<S, L> {
    /// Create a new FnirsiPsu instance over the given interface.
    pub fn new(interface: S, model: DeviceModel) -> Self {
        Self {
            interface,
            model,
            frame_delay: DEFAULT_FRAME_DELAY,
            fragment_timeout: DEFAULT_FRAGMENT_TIMEOUT,
            check_mode: false,
            buffer: heapless::Vec::new(),
        }
    }

    /// Override the inter-frame pacing delay.
    pub fn set_frame_delay(&mut self, delay: Duration) {
        self.frame_delay = delay;
    }

    /// Override the per-fragment read window.
    pub fn set_fragment_timeout(&mut self, timeout: Duration) {
        self.fragment_timeout = timeout;
    }

    /// Enable or disable double-check mode for subsequent setters.
    ///
    /// The protocol has no checksum, so a frame the device mangles in
    /// transit is applied silently; a dropped digit turns 1.5 V into 15 V.
    /// In check mode every verifiable setting is read back and resent on
    /// mismatch. The read-back of a live output can legitimately differ
    /// from a just-set target while the device settles, so this is only
    /// trustworthy while the output is off.
    pub fn set_check_mode(&mut self, enabled: bool) {
        self.check_mode = enabled;
    }

    /// Set the target output voltage. Value supplied in millivolts.
    pub fn set_voltage_mv(&mut self, voltage_mv: u32) -> Result<(), S::Error> {
        let frame = self.send_setting(Setting::Voltage, voltage_mv)?;
        self.verify(Setting::Voltage, voltage_mv, &frame)
    }

    /// Set the target output current. Value supplied in milliamps.
    pub fn set_current_ma(&mut self, current_ma: u32) -> Result<(), S::Error> {
        let frame = self.send_setting(Setting::Current, current_ma)?;
        self.verify(Setting::Current, current_ma, &frame)
    }

    /// Set the over-voltage protection limit. Value supplied in millivolts.
    pub fn set_over_voltage_mv(&mut self, voltage_mv: u32) -> Result<(), S::Error> {
        let frame = self.send_setting(Setting::OverVoltage, voltage_mv)?;
        self.verify(Setting::OverVoltage, voltage_mv, &frame)
    }

    /// Set the over-current protection limit. Value supplied in milliamps.
    pub fn set_over_current_ma(&mut self, current_ma: u32) -> Result<(), S::Error> {
        let frame = self.send_setting(Setting::OverCurrent, current_ma)?;
        self.verify(Setting::OverCurrent, current_ma, &frame)
    }

    /// Set the over-power protection limit. Value supplied in milliwatts.
    pub fn set_over_power_mw(&mut self, power_mw: u32) -> Result<(), S::Error> {
        let frame = self.send_setting(Setting::OverPower, power_mw)?;
        self.verify(Setting::OverPower, power_mw, &frame)
    }

    /// Configure the over-time (OHP) limit in seconds; `0` disarms the
    /// timer. There is no read-back field for this limit, so double-check
    /// mode does not cover it.
    pub fn set_hold_limit_secs(&mut self, secs: u32) -> Result<(), S::Error> {
        if secs == 0 {
            return self.action(Action::HoldDisable);
        }
        let frames = frame::hold_frames(secs, &self.model.limits())?;
        for f in &frames {
            self.send(f)?;
        }
        self.action(Action::HoldEnable)
    }

    /// Enable or disable the output.
    pub fn set_output(&mut self, on: bool) -> Result<(), S::Error> {
        self.action(if on { Action::PowerOn } else { Action::PowerOff })
    }

    /// Start or stop the device's status log stream.
    pub fn set_logging(&mut self, on: bool) -> Result<(), S::Error> {
        self.action(if on { Action::LogOn } else { Action::LogOff })
    }

    /// Disable all protections.
    pub fn disable_protection(&mut self) -> Result<(), S::Error> {
        self.action(Action::NoProtect)
    }

    /// Recall one of the device's memory presets.
    pub fn recall_memory(&mut self, slot: MemorySlot) -> Result<(), S::Error> {
        self.action(match slot {
            MemorySlot::M1 => Action::RecallM1,
            MemorySlot::M2 => Action::RecallM2,
        })
    }

    /// Low-level escape hatch: send an arbitrary command body, framed.
    pub fn send_raw(&mut self, body: &str) -> Result<(), S::Error> {
        let mut frame = Vec::with_capacity(body.len() + frame::TERMINATOR.len());
        frame.extend_from_slice(body.as_bytes());
        frame.extend_from_slice(frame::TERMINATOR);
        self.send(&frame)
    }

    /// Stop the log stream and discard whatever the device is still
    /// sending, in a few bounded rounds.
    pub fn flush(&mut self) -> Result<(), S::Error> {
        self.action(Action::LogOff)?;
        self.buffer.clear();
        for _ in 0..FLUSH_ATTEMPTS {
            if self.drain()? == 0 {
                return Ok(());
            }
            thread::sleep(self.frame_delay);
        }
        tracing::warn!("device still streaming after flush");
        Ok(())
    }

    /// Snapshot device state: restart logging and merge a few fragments.
    pub fn stat(&mut self) -> Result<StatusRecord, S::Error> {
        self.flush()?;
        self.action(Action::LogOn)?;
        let mut record = StatusRecord::default();
        for _ in 0..STAT_SAMPLES {
            let fragment = self.read_fragment()?;
            record.absorb(&fragment);
        }
        Ok(record)
    }

    /// Begin a trace capture of `count` samples; `None` streams until
    /// cancelled. Each call starts a fresh capture.
    pub fn trace(&mut self, count: Option<usize>) -> Result<Trace<'_, S, L>, S::Error> {
        self.action(Action::LogOn)?;
        Ok(Trace {
            psu: self,
            remaining: count,
            cancel: None,
        })
    }

    fn action(&mut self, action: Action) -> Result<(), S::Error> {
        let frame = frame::action_frame(action);
        self.send(&frame)
    }

    fn send_setting(&mut self, setting: Setting, milli: u32) -> Result<FrameBuf, S::Error> {
        let frame = frame::setting_frame(setting, milli, &self.model.limits())?;
        self.send(&frame)?;
        Ok(frame)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), S::Error> {
        thread::sleep(self.frame_delay);
        tracing::debug!(frame = %String::from_utf8_lossy(frame).trim_end(), "send");
        self.interface.write_all(frame).map_err(Error::Io)
    }

    /// Read-back verification for double-check mode.
    fn verify(&mut self, setting: Setting, sent: u32, frame: &FrameBuf) -> Result<(), S::Error> {
        if !self.check_mode {
            return Ok(());
        }
        let field = setting.field();
        let mut last_read = None;
        for attempt in 0..=VERIFY_RETRIES {
            if attempt > 0 {
                tracing::debug!(%field, attempt, "read-back mismatch, resending");
                self.send(frame)?;
            }
            match self.read_back(setting) {
                Ok(Some(milli)) => {
                    last_read = Some(milli);
                    if milli.abs_diff(sent) <= field.tolerance() {
                        tracing::debug!(%field, milli, "verified");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                // A silent device counts as a failed read here; the frame
                // may never have arrived, so resending is the right move.
                Err(Error::Timeout) => {
                    tracing::debug!(%field, "no read-back before timeout");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::VerificationFailed {
            field,
            sent,
            read: last_read,
        })
    }

    /// Restart logging and scan fragments until one carries `setting`.
    fn read_back(&mut self, setting: Setting) -> Result<Option<u32>, S::Error> {
        self.action(Action::LogOff)?;
        self.action(Action::LogOn)?;
        for _ in 0..VERIFY_SAMPLES {
            let fragment = self.read_fragment()?;
            if let Some(milli) = field_value(&fragment, setting) {
                return Ok(Some(milli));
            }
        }
        Ok(None)
    }

    fn read_fragment(&mut self) -> Result<Fragment, S::Error> {
        let deadline = Instant::now() + self.fragment_timeout;
        loop {
            let mut quiet = false;
            let mut chunk = [0u8; 64];
            match self.interface.read(&mut chunk) {
                Ok(0) => quiet = true,
                Ok(n) => {
                    if self.buffer.extend_from_slice(&chunk[..n]).is_err() {
                        // A full buffer with nothing parseable is junk; drop
                        // the oldest half and keep scanning.
                        let half = self.buffer.len() / 2;
                        self.consume(half);
                        let _ = self.buffer.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Other) => {
                    quiet = true;
                }
                Err(e) => return Err(Error::Io(e)),
            }
            if self.buffer.starts_with(self.model.greeting()) {
                self.consume(self.model.greeting().len());
            }
            if let Some((fragment, consumed)) = Fragment::scan(&self.buffer) {
                self.consume(consumed);
                tracing::trace!(?fragment, "fragment");
                return Ok(fragment);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            if quiet {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Read and discard pending bytes; returns how many were dropped.
    fn drain(&mut self) -> Result<usize, S::Error> {
        let mut total = 0;
        let mut chunk = [0u8; 64];
        loop {
            match self.interface.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Other) => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(total)
    }

    fn consume(&mut self, count: usize) {
        let len = self.buffer.len();
        let count = count.min(len);
        self.buffer.copy_within(count..len, 0);
        self.buffer.truncate(len - count);
    }
}

fn field_value(fragment: &Fragment, setting: Setting) -> Option<u32> {
    match (setting, fragment) {
        (Setting::Voltage, Fragment::Target { voltage_mv, .. }) => Some(*voltage_mv),
        (Setting::Current, Fragment::Target { current_ma, .. }) => Some(*current_ma),
        (Setting::OverVoltage, Fragment::Limits { over_voltage_mv, .. }) => Some(*over_voltage_mv),
        (Setting::OverCurrent, Fragment::Limits { over_current_ma, .. }) => Some(*over_current_ma),
        (Setting::OverPower, Fragment::Limits { over_power_mw, .. }) => Some(*over_power_mw),
        _ => None,
    }
}

/// A running trace capture: an iterator of status samples, one per device
/// reporting interval.
///
/// Finite captures stop on their own after the requested sample count;
/// unbounded captures run until the cancel flag flips, which keeps the
/// session's close-on-drop guarantee intact on the way out.
pub struct Trace<'a, S: embedded_io::Read + embedded_io::Write, const L: usize> {
    psu: &'a mut FnirsiPsu<S, L>,
    remaining: Option<usize>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, S: embedded_io::Read + embedded_io::Write, const L: usize> Trace<'a, S, L> {
    /// Stop iterating once `flag` becomes true; wire this to ctrl-c for
    /// unbounded captures.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }
}

impl<'a, S: embedded_io::Read + embedded_io::Write, const L: usize> Iterator for Trace<'a, S, L> {
    type Item = Result<StatusRecord, S::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                tracing::debug!("trace capture cancelled");
                return None;
            }
        }
        match self.remaining.as_mut() {
            Some(0) => return None,
            Some(n) => *n -= 1,
            None => {}
        }
        Some(
            self.psu
                .read_fragment()
                .map(|fragment| StatusRecord::from_fragment(&fragment)),
        )
    }
}
