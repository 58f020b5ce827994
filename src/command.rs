//! CLI command tokens and the sequential runner.
//!
//! Tokens execute strictly in the order given; that ordering is the
//! contract users script ramp-up / hold / ramp-down experiments against.
//! The first failure aborts the rest of the sequence; already-executed
//! commands stay applied, the device has no undo.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use thiserror::Error;

use crate::error::Error;
use crate::frame::MemorySlot;
use crate::psu::FnirsiPsu;
use crate::status::StatusRecord;

/// One resolved CLI token.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    PowerOn,
    PowerOff,
    /// Millivolts.
    SetVoltage(u32),
    /// Milliamps.
    SetCurrent(u32),
    SetOverVoltage(u32),
    SetOverCurrent(u32),
    /// Milliwatts.
    SetOverPower(u32),
    /// Seconds; `0` disarms the timer.
    SetHoldLimit(u32),
    NoProtect,
    Stat,
    /// `None` streams until cancelled.
    Trace(Option<usize>),
    Flush,
    Echo(String),
    Separator,
    Sleep(Duration),
    Check,
    Recall(MemorySlot),
    Raw(String),
}

/// A failed run, naming the token that caused it.
#[derive(Error, Debug)]
pub enum RunError<I: embedded_io::Error> {
    #[error("'{token}': {reason}")]
    Token { token: String, reason: String },
    #[error("'{token}': {source}")]
    Device {
        token: String,
        #[source]
        source: Error<I>,
    },
    #[error("output error: {0}")]
    Output(#[from] io::Error),
}

/// Resolve one whitespace-separated CLI token.
///
/// Unknown tokens are errors: with a fail-fast sequence a silently skipped
/// typo would throw the rest of the experiment off.
pub fn parse_token(token: &str) -> Result<CliCommand, String> {
    let (name, value) = match token.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (token, None),
    };
    match (name, value) {
        ("on", None) => Ok(CliCommand::PowerOn),
        ("off", None) => Ok(CliCommand::PowerOff),
        ("noprotect", None) => Ok(CliCommand::NoProtect),
        ("stat", None) => Ok(CliCommand::Stat),
        ("flush", None) => Ok(CliCommand::Flush),
        ("sep", None) => Ok(CliCommand::Separator),
        ("check", None) => Ok(CliCommand::Check),
        ("v", Some(value)) => parse_milli(value).map(CliCommand::SetVoltage),
        ("c", Some(value)) => parse_milli(value).map(CliCommand::SetCurrent),
        ("ovp", Some(value)) => parse_milli(value).map(CliCommand::SetOverVoltage),
        ("ocp", Some(value)) => parse_milli(value).map(CliCommand::SetOverCurrent),
        ("opp", Some(value)) => parse_milli(value).map(CliCommand::SetOverPower),
        ("ohp", Some(value)) => value
            .parse::<u32>()
            .map(CliCommand::SetHoldLimit)
            .map_err(|e| format!("bad whole-second count: {e}")),
        ("trace", Some(value)) => {
            let count: i64 = value
                .parse()
                .map_err(|e| format!("bad sample count: {e}"))?;
            match count {
                -1 => Ok(CliCommand::Trace(None)),
                n if n >= 0 => Ok(CliCommand::Trace(Some(n as usize))),
                _ => Err("sample count must be >= 0, or -1 for unbounded".to_string()),
            }
        }
        ("sleep", Some(value)) => {
            let secs: f64 = value.parse().map_err(|e| format!("bad duration: {e}"))?;
            if !secs.is_finite() || secs < 0.0 {
                return Err("duration must be a non-negative number".to_string());
            }
            Ok(CliCommand::Sleep(Duration::from_secs_f64(secs)))
        }
        ("echo", Some(value)) => Ok(CliCommand::Echo(value.to_string())),
        ("mem", Some("m1")) => Ok(CliCommand::Recall(MemorySlot::M1)),
        ("mem", Some("m2")) => Ok(CliCommand::Recall(MemorySlot::M2)),
        ("mem", Some(other)) => Err(format!("unknown memory slot '{other}'")),
        ("cmd", Some(value)) => Ok(CliCommand::Raw(value.to_string())),
        _ => Err("unknown command".to_string()),
    }
}

/// Parse a decimal quantity into milli-units (`1.5` -> `1500`).
fn parse_milli(value: &str) -> Result<u32, String> {
    let parsed: f64 = value.parse().map_err(|e| format!("bad value: {e}"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err("value must be a non-negative number".to_string());
    }
    Ok((parsed * 1000.0).round() as u32)
}

/// Execute `tokens` in order against the power supply, stopping at the
/// first failure. Tokens are resolved lazily one at a time, so commands
/// ahead of a bad token still run.
pub fn run<S, W, const L: usize>(
    psu: &mut FnirsiPsu<S, L>,
    tokens: &[String],
    out: &mut W,
    json: bool,
    cancel: &Arc<AtomicBool>,
) -> Result<(), RunError<S::Error>>
where
    S: embedded_io::Read + embedded_io::Write,
    W: Write,
{
    for token in tokens {
        let command = parse_token(token).map_err(|reason| RunError::Token {
            token: token.clone(),
            reason,
        })?;
        tracing::debug!(%token, "execute");
        execute(psu, command, out, json, cancel).map_err(|step| match step {
            StepError::Device(source) => RunError::Device {
                token: token.clone(),
                source,
            },
            StepError::Output(e) => RunError::Output(e),
        })?;
    }
    Ok(())
}

enum StepError<I: embedded_io::Error> {
    Device(Error<I>),
    Output(io::Error),
}

impl<I: embedded_io::Error> From<Error<I>> for StepError<I> {
    fn from(err: Error<I>) -> Self {
        StepError::Device(err)
    }
}

impl<I: embedded_io::Error> From<io::Error> for StepError<I> {
    fn from(err: io::Error) -> Self {
        StepError::Output(err)
    }
}

fn execute<S, W, const L: usize>(
    psu: &mut FnirsiPsu<S, L>,
    command: CliCommand,
    out: &mut W,
    json: bool,
    cancel: &Arc<AtomicBool>,
) -> Result<(), StepError<S::Error>>
where
    S: embedded_io::Read + embedded_io::Write,
    W: Write,
{
    match command {
        CliCommand::PowerOn => psu.set_output(true)?,
        CliCommand::PowerOff => psu.set_output(false)?,
        CliCommand::SetVoltage(mv) => psu.set_voltage_mv(mv)?,
        CliCommand::SetCurrent(ma) => psu.set_current_ma(ma)?,
        CliCommand::SetOverVoltage(mv) => psu.set_over_voltage_mv(mv)?,
        CliCommand::SetOverCurrent(ma) => psu.set_over_current_ma(ma)?,
        CliCommand::SetOverPower(mw) => psu.set_over_power_mw(mw)?,
        CliCommand::SetHoldLimit(secs) => psu.set_hold_limit_secs(secs)?,
        CliCommand::NoProtect => psu.disable_protection()?,
        CliCommand::Check => psu.set_check_mode(true),
        CliCommand::Recall(slot) => psu.recall_memory(slot)?,
        CliCommand::Raw(body) => psu.send_raw(&body)?,
        CliCommand::Flush => psu.flush()?,
        CliCommand::Stat => {
            let record = psu.stat()?;
            report(out, &record, json)?;
        }
        CliCommand::Trace(count) => {
            let trace = psu.trace(count)?.with_cancel(cancel.clone());
            for sample in trace {
                let record = sample?;
                report(out, &record, json)?;
            }
        }
        CliCommand::Echo(text) => writeln!(out, "{text}")?,
        CliCommand::Separator => writeln!(out, "#{}", "-".repeat(60))?,
        CliCommand::Sleep(duration) => std::thread::sleep(duration),
    }
    Ok(())
}

fn report<W: Write>(out: &mut W, record: &StatusRecord, json: bool) -> Result<(), io::Error> {
    if json {
        let line = serde_json::to_string(record).map_err(io::Error::other)?;
        writeln!(out, "{line}")
    } else {
        writeln!(out, "{record}")
    }
}
