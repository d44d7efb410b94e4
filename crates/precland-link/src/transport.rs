//! Byte transports under the telemetry link.

use std::io::{self, Read, Write};
use std::time::Duration;

/// A bidirectional byte link to the flight controller.
pub trait Transport: Send {
    /// Read whatever is available into `buf`. Returns `Ok(0)` when nothing
    /// arrived within the transport's read timeout.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bytes already received and readable without waiting.
    fn bytes_pending(&mut self) -> io::Result<usize>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Human-readable endpoint for logs.
    fn describe(&self) -> String;
}

/// Serial port (UART or USB CDC) transport.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    path: String,
    baud_rate: u32,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`; reads give up after `read_timeout`.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> serialport::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(read_timeout)
            .open()?;
        Ok(Self {
            port,
            path: path.to_string(),
            baud_rate,
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn bytes_pending(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}
