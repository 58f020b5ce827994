//! We use this mocking module in unit tests to emulate a serial port.

use std::collections::VecDeque;

/// Our mock type used to emulate a serial port.
///
/// Reads are scripted as a queue of chunks; a [`MockSerial::push_quiet`]
/// marker makes the next read report "no data yet", which is how the real
/// port behaves between device reporting intervals.
pub struct MockSerial {
    /// Everything written to the mock port, in order.
    write_buffer: heapless::Vec<u8, 1024>,
    /// Scripted read results, consumed front to back.
    reads: VecDeque<ReadStep>,
    /// Flag to simulate write errors.
    should_error_on_write: bool,
    /// Flag to simulate read errors.
    should_error_on_read: bool,
}

enum ReadStep {
    Chunk(Vec<u8>),
    Quiet,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// No data available right now.
    WouldBlock,
    /// Simulated hard I/O failure.
    Broken,
    /// Simulated buffer overflow.
    BufferOverflow,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MockSerialError::WouldBlock => write!(f, "no data available"),
            MockSerialError::Broken => write!(f, "simulated I/O failure"),
            MockSerialError::BufferOverflow => write!(f, "buffer overflow"),
        }
    }
}

impl std::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::WouldBlock => embedded_io::ErrorKind::TimedOut,
            MockSerialError::Broken => embedded_io::ErrorKind::BrokenPipe,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::Broken);
        }
        if self
            .write_buffer
            .extend_from_slice(buf)
            .is_err()
        {
            return Err(MockSerialError::BufferOverflow);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::Broken);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::Broken);
        }
        match self.reads.pop_front() {
            None | Some(ReadStep::Quiet) => Err(MockSerialError::WouldBlock),
            Some(ReadStep::Chunk(mut data)) => {
                let count = data.len().min(buf.len());
                buf[..count].copy_from_slice(&data[..count]);
                // Hand back anything the caller's buffer couldn't take.
                if count < data.len() {
                    data.drain(..count);
                    self.reads.push_front(ReadStep::Chunk(data));
                }
                Ok(count)
            }
        }
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with an empty script.
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            reads: VecDeque::new(),
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Queue one chunk of response data for a future read.
    pub fn push_chunk(&mut self, data: &[u8]) {
        self.reads.push_back(ReadStep::Chunk(data.to_vec()));
    }

    /// Queue one "no data yet" read between chunks.
    pub fn push_quiet(&mut self) {
        self.reads.push_back(ReadStep::Quiet);
    }

    /// Everything written to this mock port so far.
    pub fn written(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Configure whether write operations fail.
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations fail.
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    #[test]
    fn writes_accumulate_in_order() {
        let mut mock = MockSerial::new();
        mock.write(b"V0150\r\n").unwrap();
        mock.write(b"N\r\n").unwrap();
        assert_eq!(mock.written(), b"V0150\r\nN\r\n");
    }

    #[test]
    fn reads_follow_the_script() {
        let mut mock = MockSerial::new();
        mock.push_chunk(b"abc");
        mock.push_quiet();
        mock.push_chunk(b"def");

        let mut buf = [0u8; 8];
        assert_eq!(mock.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert!(matches!(
            mock.read(&mut buf),
            Err(MockSerialError::WouldBlock)
        ));
        assert_eq!(mock.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"def");
        assert!(matches!(
            mock.read(&mut buf),
            Err(MockSerialError::WouldBlock)
        ));
    }

    #[test]
    fn oversized_chunks_split_across_reads() {
        let mut mock = MockSerial::new();
        mock.push_chunk(b"0123456789");

        let mut buf = [0u8; 4];
        assert_eq!(mock.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(mock.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"4567");
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
    }

    #[test]
    fn error_injection() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        assert!(matches!(mock.write(b"N"), Err(MockSerialError::Broken)));

        let mut mock = MockSerial::new();
        mock.push_chunk(b"data");
        mock.set_read_error(true);
        let mut buf = [0u8; 4];
        assert!(matches!(mock.read(&mut buf), Err(MockSerialError::Broken)));
    }
}
