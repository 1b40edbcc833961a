//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors a trigger rig can hit, from configuration mistakes to
//! GPIO and instrument failures.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidArgument`**: A precondition failure on pure inputs, e.g. channel tables of
//!   unequal length handed to the sequencer.
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine (duplicate
//!   device names, a pin used twice, ...). Caught during validation.
//! - **`Io`**: Wraps `std::io::Error`.
//! - **`Gpio`**: Failures reported by a GPIO backend (unconfigured pin, driver error).
//! - **`Instrument`**: Anything originating from a device driver.
//! - **`FeatureNotEnabled`**: Functionality that was not compiled in.
//!
//! Device drivers themselves return `anyhow::Result` and attach context at each I/O call
//! site; `DaqError` values convert into `anyhow::Error` transparently through `?`.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the rig outside device drivers.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Bad input to a pure function.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Figment could not load or extract the configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reported by a GPIO backend.
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// Reported by a device driver.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Serial I/O attempted before `connect`.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// No complete response line within the timeout.
    #[error("Serial read timeout after {0:?}")]
    SerialTimeout(std::time::Duration),

    /// Cargo feature needed for this operation is off.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// One or more resources failed to release.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Instrument("psu not responding".to_string());
        assert_eq!(err.to_string(), "Instrument error: psu not responding");
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = DaqError::InvalidArgument(
            "channel arrays must have equal length".to_string(),
        );
        assert_eq!(
            err.to_string(),
            "invalid argument: channel arrays must have equal length"
        );
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::Instrument("psu timeout".into()),
            DaqError::Gpio("pin 21 not configured".into()),
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
    }
}
