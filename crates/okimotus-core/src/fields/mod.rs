//! Field Configuration
//!
//! Declarative description of what each position in a port's lines means:
//! label, type, format, unit, transformation chain and optional script.
//!
//! Two shapes are accepted per port. A map from position to one field, either
//! under `values` or as numeric keys directly in the port object:
//!
//! ```json
//! { "ports": { "/dev/ttyUSB0": { "baudrate": 115200, "0": "Time", "1": {"label": "Volts"} } } }
//! ```
//!
//! Or a list under `values` whose entries carry an explicit `index`, which
//! allows several fields per position:
//!
//! ```json
//! { "ports": { "COM3": { "values": [ {"index": 1, "label": "V"}, {"index": 1, "label": "mV"} ] } } }
//! ```

mod error;
mod registry;
mod types;

pub use error::ConfigError;
pub use registry::{FieldRegistry, MonitorSettings, PortConfig};
pub use types::{FieldConfig, Operation, TransformStep, ValueType};
