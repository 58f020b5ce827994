//! Error types for FNIRSI power supply communications.

use thiserror::Error;

use crate::frame::{Field, FrameError};

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Custom error type for FNIRSI DC PSU communications, generic over the
/// serial interface's own error type.
///
/// Every variant aborts the current command and the remaining command
/// sequence; nothing here is retried or swallowed above the protocol-level
/// verification loop.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    /// The serial port could not be opened.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(#[from] serialport::Error),
    #[error("Serial communication error")]
    Io(I),
    /// The device stayed silent past the read window. Expected when the log
    /// stream is off; surfaced as a value, never a panic.
    #[error("Communication timeout")]
    Timeout,
    /// A response matched no known frame shape. With no checksum on the
    /// wire this is the only integrity signal there is, so it is reported
    /// rather than skipped.
    #[error("Malformed response frame: {0}")]
    MalformedFrame(FrameError),
    /// An argument was rejected before any bytes were sent.
    #[error("Invalid argument: {0}")]
    Validation(FrameError),
    /// Double-check mode exhausted its resend budget.
    #[error(
        "Verification failed for {field}: sent {sent} {unit}, device reports {shown}",
        unit = .field.unit(),
        shown = read_display(.read, .field)
    )]
    VerificationFailed {
        field: Field,
        /// Value sent, milli-units.
        sent: u32,
        /// Last value read back, if the field appeared at all.
        read: Option<u32>,
    },
}

impl<I: embedded_io::Error> From<FrameError> for Error<I> {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::OutOfRange { .. } => Error::Validation(err),
            FrameError::Length(_) | FrameError::Corrupt(_) => Error::MalformedFrame(err),
        }
    }
}

fn read_display(read: &Option<u32>, field: &Field) -> String {
    match read {
        Some(value) => format!("{value} {}", field.unit()),
        None => "nothing".to_string(),
    }
}
