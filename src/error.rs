//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the sweep engine and its
//! collaborators. Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the kinds of errors that can occur during a gate sweep, from configuration issues to
//! instrument communication failures.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches in the
//!   layered configuration.
//! - **`Configuration`**: Semantic errors in values that parsed correctly but cannot be used
//!   (e.g. a drive step larger than the drive range).
//! - **`Instrument`**: Any failure talking to an excitation or measurement device. These are fatal
//!   to a run: the controller de-energizes the outputs and returns this variant.
//! - **`Io`**, **`Csv`**, **`Image`**, **`Serialization`**: Persistence failures at the end of a
//!   run.
//! - **`FeatureNotEnabled`**: Functionality compiled out via feature flags.
//!
//! Instrument drivers use `anyhow::Result` internally; the controller converts those errors into
//! `DaqError::Instrument` at the capability boundary.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Layered configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds unusable values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Communication with an instrument failed.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer failure.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// PNG encoder failure.
    #[cfg(feature = "storage_png")]
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Manifest serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Functionality compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// The native measurement window failed.
    #[error("GUI error: {0}")]
    Gui(String),

    /// A background task panicked or was aborted.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Wrap a driver-level error raised while talking to `device`.
    pub fn instrument(device: &str, err: &anyhow::Error) -> Self {
        DaqError::Instrument(format!("{device}: {err:#}"))
    }

    /// Whether this error aborted a run while instruments were energized.
    pub fn is_instrument_failure(&self) -> bool {
        matches!(self, DaqError::Instrument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_error_carries_device_and_cause() {
        let cause = anyhow::anyhow!("connection reset").context("query ':READ?' failed");
        let err = DaqError::instrument("meter", &cause);
        let text = err.to_string();
        assert!(text.contains("meter"));
        assert!(text.contains("connection reset"));
        assert!(err.is_instrument_failure());
    }

    #[test]
    fn configuration_error_is_not_instrument_failure() {
        let err = DaqError::Configuration("drive_step must be positive".into());
        assert!(!err.is_instrument_failure());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: drive_step must be positive"
        );
    }
}
