//! Byte sources a [`PortReader`](super::PortReader) can read from
//!
//! A [`Connector`] opens a fresh [`ByteSource`] each time a reader connects.
//! Serial devices go through [`SerialConnector`]; the in-memory loopback pair
//! feeds readers without hardware.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serialport::SerialPort;
use std::io::{self, Read};

use super::{serial::open_port, StreamError};

/// A readable byte stream that can report how much data is waiting
pub trait ByteSource: Read + Send {
    /// Number of bytes that can be read right now without blocking
    fn bytes_to_read(&mut self) -> io::Result<usize>;
}

/// Opens byte sources for a named port
pub trait Connector: Send + Sync {
    /// Open `port` at `baud_rate`
    fn connect(&self, port: &str, baud_rate: u32) -> Result<Box<dyn ByteSource>, StreamError>;
}

impl<F> Connector for F
where
    F: Fn(&str, u32) -> Result<Box<dyn ByteSource>, StreamError> + Send + Sync,
{
    fn connect(&self, port: &str, baud_rate: u32) -> Result<Box<dyn ByteSource>, StreamError> {
        self(port, baud_rate)
    }
}

/// Serial port wrapper implementing ByteSource
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl ByteSource for SerialChannel {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::other)
    }
}

/// Connector that opens real serial devices
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn connect(&self, port: &str, baud_rate: u32) -> Result<Box<dyn ByteSource>, StreamError> {
        let handle = open_port(port, Some(baud_rate))?;
        Ok(Box::new(SerialChannel::new(handle)))
    }
}

/// Create an in-memory byte pipe.
///
/// Bytes written through the [`LoopbackWriter`] become readable from every
/// [`LoopbackChannel`] the connector opens. Dropping all writers makes the
/// channel report `BrokenPipe` once drained, like an unplugged device.
pub fn loopback() -> (LoopbackWriter, LoopbackConnector) {
    let (tx, rx) = unbounded();
    (LoopbackWriter { tx }, LoopbackConnector { rx })
}

/// Write half of a loopback pipe
#[derive(Debug, Clone)]
pub struct LoopbackWriter {
    tx: Sender<Vec<u8>>,
}

impl LoopbackWriter {
    /// Queue `bytes` for the reader. Returns false once every reader is gone.
    pub fn write(&self, bytes: impl AsRef<[u8]>) -> bool {
        self.tx.send(bytes.as_ref().to_vec()).is_ok()
    }
}

/// Connector half of a loopback pipe
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    rx: Receiver<Vec<u8>>,
}

impl Connector for LoopbackConnector {
    fn connect(&self, _port: &str, _baud_rate: u32) -> Result<Box<dyn ByteSource>, StreamError> {
        Ok(Box::new(LoopbackChannel {
            rx: self.rx.clone(),
            pending: Vec::new(),
        }))
    }
}

/// Read half of a loopback pipe
pub struct LoopbackChannel {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl LoopbackChannel {
    fn fill(&mut self) -> io::Result<()> {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    if self.pending.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "loopback writer closed",
                        ));
                    }
                    return Ok(());
                }
            }
        }
    }
}

impl Read for LoopbackChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill()?;
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl ByteSource for LoopbackChannel {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.fill()?;
        Ok(self.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_reads_in_order() {
        let (writer, connector) = loopback();
        let mut source = connector.connect("loop", 9600).unwrap();

        writer.write(b"12,");
        writer.write("34\n");

        assert_eq!(source.bytes_to_read().unwrap(), 6);
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"12,3");
        assert_eq!(source.bytes_to_read().unwrap(), 2);
    }

    #[test]
    fn test_loopback_reports_closed_writer_after_drain() {
        let (writer, connector) = loopback();
        let mut source = connector.connect("loop", 9600).unwrap();

        writer.write(b"x");
        drop(writer);

        assert_eq!(source.bytes_to_read().unwrap(), 1);
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 1);

        let err = source.bytes_to_read().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_closure_connector() {
        let failing = |port: &str, _baud: u32| -> Result<Box<dyn ByteSource>, StreamError> {
            Err(StreamError::PortNotFound(port.to_string()))
        };
        let err = failing.connect("/dev/ttyNOPE", 115200).err().unwrap();
        assert!(matches!(err, StreamError::PortNotFound(p) if p == "/dev/ttyNOPE"));
    }
}
