//! Custom error types for the rig.
//!
//! This module defines the primary error type, `RigError`, used by every part of the
//! harness. Using the `thiserror` crate, it gives the session front-end one place to
//! decide how a failure is reported and which exit status the process ends with.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidCycleCount`**: the requested number of cycles is outside `1..=max`. Reported
//!   to the operator before any signal is touched.
//! - **`HardwareConfiguration`**: a pin could not be claimed or set up. Fatal, raised before
//!   the countdown, and always followed by cleanup of whatever was already claimed.
//! - **`OperatorAbort`**: the operator answered "no" at the start confirmation.
//! - **`Interrupted`**: the emergency stop flag was tripped (Ctrl-C or a termination signal) while running.
//! - **`Gpio`**: a read, write or release failed after configuration succeeded.
//! - **`Configuration`** / **`ConfigLoad`**: semantic and parse errors in the configuration.
//! - **`FeatureNotEnabled`**: the hardware backend was not compiled in.
//! - **`Io`**: run log and prompt I/O.
//!
//! The ADC sampler does not use this type for out-of-range channels; it
//! returns a numeric sentinel instead (see [`crate::adc`]).

use thiserror::Error;

use crate::hardware::{PinId, SignalRole};

/// Convenience alias for results using the rig error type.
pub type AppResult<T> = std::result::Result<T, RigError>;

/// Exit status for intentional stops (completion, abort, declined or invalid count).
pub const EXIT_OK: u8 = 0;
/// Exit status for unexpected failures.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status when a pin cannot be claimed or configured.
pub const EXIT_HARDWARE: u8 = 3;
/// Exit status after an operator interrupt or termination signal (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum RigError {
    #[error("Invalid number of tests {requested}. Max tests: {max}")]
    InvalidCycleCount { requested: i64, max: u32 },

    #[error("Failed to configure {role} on pin {pin}: {reason}")]
    HardwareConfiguration {
        pin: PinId,
        role: SignalRole,
        reason: String,
    },

    #[error("Aborted by operator")]
    OperatorAbort,

    #[error("Interrupted: {reason}")]
    Interrupted { reason: String },

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for RigError {
    fn from(value: figment::Error) -> Self {
        RigError::ConfigLoad(Box::new(value))
    }
}

impl RigError {
    /// Process exit status for this error.
    ///
    /// Intentional stops share status 0 with a completed run; only failures that leave
    /// the rig unfinished for a technical reason get a non-zero status.
    pub fn exit_code(&self) -> u8 {
        match self {
            RigError::InvalidCycleCount { .. } | RigError::OperatorAbort => EXIT_OK,
            RigError::HardwareConfiguration { .. } | RigError::FeatureNotEnabled(_) => {
                EXIT_HARDWARE
            }
            RigError::Interrupted { .. } => EXIT_INTERRUPTED,
            RigError::Gpio(_)
            | RigError::Configuration(_)
            | RigError::ConfigLoad(_)
            | RigError::Io(_) => EXIT_FAILURE,
        }
    }

    /// Whether this error is an intentional stop rather than a failure.
    pub fn is_intentional_stop(&self) -> bool {
        self.exit_code() == EXIT_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intentional_stops_exit_cleanly() {
        let invalid = RigError::InvalidCycleCount {
            requested: 0,
            max: 500,
        };
        assert_eq!(invalid.exit_code(), EXIT_OK);
        assert!(invalid.is_intentional_stop());
        assert_eq!(RigError::OperatorAbort.exit_code(), EXIT_OK);
    }

    #[test]
    fn hardware_failure_has_distinct_exit_code() {
        let err = RigError::HardwareConfiguration {
            pin: PinId(22),
            role: SignalRole::Relay,
            reason: "line busy".into(),
        };
        assert_eq!(err.exit_code(), EXIT_HARDWARE);
        assert!(!err.is_intentional_stop());
        assert_eq!(
            err.to_string(),
            "Failed to configure relay on pin 22: line busy"
        );
    }

    #[test]
    fn invalid_count_message_names_the_limit() {
        let err = RigError::InvalidCycleCount {
            requested: 501,
            max: 500,
        };
        assert_eq!(err.to_string(), "Invalid number of tests 501. Max tests: 500");
    }

    #[test]
    fn io_errors_convert() {
        let err: RigError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(matches!(err, RigError::Io(_)));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }
}
