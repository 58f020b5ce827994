//! Serial transport session.
//!
//! Owns the open port and moves raw bytes in both directions. Framing,
//! timeouts-per-fragment and retries all live above this layer.

use std::io;
use std::time::Duration;

use serialport::SerialPort;

use crate::error::Error;

/// The devices talk 115200 8N1 with software (XON/XOFF) flow control.
pub const BAUD_RATE: u32 = 115_200;
/// Per-call port timeout. The command processor loops short reads up to its
/// own fragment window, so this only bounds a single syscall.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// An exclusively owned serial connection to the power supply.
///
/// Dropping the session closes the port; that covers normal exit and the
/// cancellation path out of an unbounded trace capture alike.
pub struct SerialSession(Box<dyn SerialPort>);

impl core::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SerialSession").finish_non_exhaustive()
    }
}

/// Open `port` at the protocol's fixed line parameters.
pub fn open(port: &str) -> Result<SerialSession, Error<IoError>> {
    let port = serialport::new(port, BAUD_RATE)
        .flow_control(serialport::FlowControl::Software)
        .timeout(PORT_TIMEOUT)
        .open()?;
    tracing::debug!(port = port.name().as_deref().unwrap_or("?"), "port open");
    Ok(SerialSession(port))
}

/// Adapter error carrying the underlying `std::io` failure.
#[derive(Debug)]
pub struct IoError(pub io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                embedded_io::ErrorKind::TimedOut
            }
            io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for SerialSession {
    type Error = IoError;
}

impl embedded_io::Read for SerialSession {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for SerialSession {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        io::Write::flush(&mut self.0).map_err(IoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::Error as _;

    #[test]
    fn io_error_kinds_map_through() {
        let timed_out = IoError(io::Error::new(io::ErrorKind::TimedOut, "t"));
        assert_eq!(timed_out.kind(), embedded_io::ErrorKind::TimedOut);

        let broken = IoError(io::Error::new(io::ErrorKind::BrokenPipe, "b"));
        assert_eq!(broken.kind(), embedded_io::ErrorKind::BrokenPipe);

        let other = IoError(io::Error::other("x"));
        assert_eq!(other.kind(), embedded_io::ErrorKind::Other);
    }

    #[test]
    fn missing_port_is_device_unavailable() {
        let err = open("/definitely/not/a/port").unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }
}
