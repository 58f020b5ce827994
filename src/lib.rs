//! This crate provides an interface for communicating with and controlling
//! FNIRSI programmable DC power supplies over their USB-serial link.
//!
//! Supported models:
//! * DC6006L
//! * DC-580 (same command set, different banner and ranges)
//!
//! The devices speak a proprietary framed protocol: ASCII command frames of
//! one opcode letter plus a fixed-width fixed-point argument, and a log
//! stream of fixed-shape status fragments. There is no checksum anywhere,
//! and the hardware is known to drop bytes: a mangled `V0150` (1.5 V) can
//! be applied as `V1500` (15 V) without any error. The optional double-check
//! mode on [`psu::FnirsiPsu`] compensates by reading every verifiable
//! setting back and resending on mismatch.
//!
//! The protocol core is generic over any interface implementing
//! [embedded_io::Read] & [embedded_io::Write]; [`transport`] adapts a real
//! serial port into that seam for the `fnirsi-ps` binary.
//!
//! The serial port should be configured like so:
//! * Baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//! * Flow control: software (XON/XOFF)

pub mod command;
pub mod error;
pub mod frame;
pub mod model;
pub mod psu;
pub mod status;
pub mod transport;

#[cfg(test)]
mod mock_serial;
