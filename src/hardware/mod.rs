//! Hardware layer
//!
//! Capability traits plus the concrete device variants selected by `registry`.

pub mod capabilities;
pub mod mock;
pub mod registry;
pub mod scpi;
pub mod simulated;

pub use capabilities::{ExcitationSource, MeasurementSource};
pub use registry::DeviceSet;
