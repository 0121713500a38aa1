//! Serial Telemetry Streams
//!
//! Turns raw bytes from serial-like devices into parsed [`Line`]s.
//!
//! Each [`PortReader`] owns one connection and one background thread. Lines are
//! fanned out to callbacks and buffered in a bounded queue that drops the oldest
//! entry when a consumer falls behind.

pub mod channel;
mod error;
mod framer;
mod handle;
mod line;
mod parser;
mod reader;
pub mod serial;

pub use channel::{
    loopback, ByteSource, Connector, LoopbackChannel, LoopbackConnector, LoopbackWriter,
    SerialChannel, SerialConnector,
};
pub use error::{ParseError, StreamError};
pub use framer::LineFramer;
pub use handle::{open, PortHandle};
pub use line::Line;
pub use parser::{LastValues, LineParser};
pub(crate) use reader::{panic_message, read_lock};
pub use reader::{PortReader, PortSettings, PortStats};
pub use serial::{list_ports, open_port, PortInfo};

/// Default baud rate for MCU telemetry
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default capacity of a reader's line queue
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// How long `stop_reading` waits for the reader thread before force-closing
pub const JOIN_TIMEOUT_MS: u64 = 2000;

/// Idle delay between polls when no bytes are waiting
pub const READ_POLL_INTERVAL_MS: u64 = 10;

/// Field delimiter on the wire
pub const DEFAULT_DELIMITER: char = ',';
