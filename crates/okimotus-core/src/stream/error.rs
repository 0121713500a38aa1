//! Stream errors

use thiserror::Error;

/// Errors that can occur while talking to a telemetry port
///
/// These are the only failures that cross from the reader thread to consumers,
/// through error callbacks or the return value of `connect`.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The device could not be opened
    #[error("Failed to open {port}: {message}")]
    Connection {
        /// Device name
        port: String,
        /// Reason reported by the driver
        message: String,
    },

    /// A hard I/O error ended the read loop
    #[error("Lost connection to {port}: {source}")]
    ConnectionLost {
        /// Device name
        port: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No such device
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Operation needs an open connection
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// The handle was closed
    #[error("Port {0} is closed")]
    Closed(String),

    /// Other I/O failure, such as spawning the reader thread
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Build a connection error for `port`
    pub fn connection(port: impl Into<String>, message: impl ToString) -> Self {
        StreamError::Connection {
            port: port.into(),
            message: message.to_string(),
        }
    }
}

/// Line-level parse failures. Counted and logged, never surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Nothing but whitespace between terminators
    #[error("Line is empty")]
    EmptyLine,
}
