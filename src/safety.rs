//! Emergency stop for the control loop.
//!
//! The rig has no cancellation path other than the operator killing the program. To keep
//! that from leaving the motor energized, a handler for SIGINT (Ctrl-C), SIGTERM and
//! SIGHUP trips an [`EmergencyStopFlag`]; the controller checks the flag on every poll
//! tick and every delay step and unwinds through the signal bank's cleanup. Every trapped
//! signal takes the same path, so `kill`, a service stop or a dropped SSH session
//! de-energize the relay the same way Ctrl-C does.
//!
//! The handler itself only stores an atomic flag. All hardware access stays on the
//! control thread.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::error::{AppResult, RigError};

/// Reason recorded when a trapped signal trips the stop.
pub const SIGNAL_STOP_REASON: &str = "operator interrupt or termination signal";

/// A shared flag for signaling an emergency stop to the control loop.
#[derive(Clone, Debug, Default)]
pub struct EmergencyStopFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<RwLock<Option<String>>>,
}

impl EmergencyStopFlag {
    /// Create a new, untripped flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the emergency stop.
    pub fn trigger(&self, reason: impl Into<String>) {
        *self.reason.write() = Some(reason.into());
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check if the stop has been tripped.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Reason given when the stop was tripped.
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Return `Err(RigError::Interrupted)` if the stop has been tripped.
    pub fn check(&self) -> AppResult<()> {
        if self.is_triggered() {
            return Err(RigError::Interrupted {
                reason: self
                    .reason()
                    .unwrap_or_else(|| "emergency stop".to_string()),
            });
        }
        Ok(())
    }
}

/// Install a handler for SIGINT, SIGTERM and SIGHUP that trips `flag`.
///
/// Can only be installed once per process.
pub fn install_interrupt_handler(flag: &EmergencyStopFlag) -> AppResult<()> {
    let flag = flag.clone();
    ctrlc::set_handler(move || {
        warn!("Received interrupt or termination signal - de-energizing rig");
        flag.trigger(SIGNAL_STOP_REASON);
    })
    .map_err(|e| RigError::Configuration(format!("Failed to install signal handler: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_clear() {
        let flag = EmergencyStopFlag::new();
        assert!(!flag.is_triggered());
        assert!(flag.check().is_ok());
        assert!(flag.reason().is_none());
    }

    #[test]
    fn trigger_is_visible_through_clones() {
        let flag = EmergencyStopFlag::new();
        let handler_side = flag.clone();
        handler_side.trigger("test stop");

        assert!(flag.is_triggered());
        match flag.check() {
            Err(RigError::Interrupted { reason }) => assert_eq!(reason, "test stop"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn signal_stop_exits_as_interrupt() {
        let flag = EmergencyStopFlag::new();
        flag.clone().trigger(SIGNAL_STOP_REASON);

        let err = flag.check().unwrap_err();
        assert!(!err.is_intentional_stop());
        assert_eq!(err.exit_code(), crate::error::EXIT_INTERRUPTED);
        assert!(err.to_string().contains(SIGNAL_STOP_REASON));
    }
}
