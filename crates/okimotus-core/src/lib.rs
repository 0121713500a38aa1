//! # Okimotus Core Library
//!
//! Core functionality for the Okimotus serial telemetry monitor.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Line framing and parsing of delimited telemetry from serial-like byte streams
//! - Background port readers with bounded, drop-oldest queues and callbacks
//! - Multi-port coordination with a cooperative polling loop
//! - Declarative field configuration (several display fields per source column)
//! - Typed coercion, arithmetic transformation chains and sandboxed script conversion
//!
//! ## Example
//!
//! ```rust,ignore
//! use okimotus_core::stream::open;
//! use std::time::Duration;
//!
//! let mut port = open("/dev/ttyUSB0", 115200)?;
//! if let Some(line) = port.read_line(Some(Duration::from_millis(150)))? {
//!     println!("counts: {:?}", line.get(1));
//! }
//! port.close();
//! ```

pub mod coordinator;
pub mod demo;
pub mod display;
pub mod fields;
pub mod stream;
pub mod transform;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::coordinator::{run, serve, PortCoordinator, Snapshot, StopSignal};
    pub use crate::display::{render_rows, HeadlessSink, OutputRow, OutputSink};
    pub use crate::fields::{FieldConfig, FieldRegistry, TransformStep, ValueType};
    pub use crate::stream::{open, Line, PortHandle, PortReader, PortStats, StreamError};
    pub use crate::transform::{TransformEngine, PLACEHOLDER};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
