//! Simple pull-style port handle

use std::time::Duration;

use super::{Line, PortReader, StreamError};

/// A started port reader with file-like `read_line` / `close`
pub struct PortHandle {
    reader: PortReader,
    closed: bool,
}

/// Open a serial port and start reading it in the background
pub fn open(port: &str, baud_rate: u32) -> Result<PortHandle, StreamError> {
    PortHandle::start(PortReader::new(port, baud_rate))
}

impl PortHandle {
    /// Start `reader` and wrap it
    pub fn start(reader: PortReader) -> Result<Self, StreamError> {
        reader.start_reading()?;
        Ok(Self {
            reader,
            closed: false,
        })
    }

    /// Next parsed line, or `None` if nothing arrived within `timeout`.
    ///
    /// `None` as the timeout blocks until a line arrives or the reader stops.
    pub fn read_line(&self, timeout: Option<Duration>) -> Result<Option<Line>, StreamError> {
        if self.closed {
            return Err(StreamError::Closed(self.reader.name().to_string()));
        }
        Ok(self.reader.read_line(timeout))
    }

    /// Stop reading and close the port. Safe to call more than once.
    pub fn close(&mut self) {
        if !self.closed {
            self.reader.stop_reading();
            self.closed = true;
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The underlying reader, for callbacks and stats
    pub fn reader(&self) -> &PortReader {
        &self.reader
    }
}

impl Drop for PortHandle {
    fn drop(&mut self) {
        self.close();
    }
}
