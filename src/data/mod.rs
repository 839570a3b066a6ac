//! Result persistence.
pub mod export;

pub use export::{ExportPaths, RunExporter, RunManifest};
