//! Claimed-signal tracking with guaranteed release.
//!
//! A [`SignalBank`] owns the backend for the duration of a session. Whatever path the
//! session leaves by (completion, a configuration error half way through claiming, an
//! I/O error on the run log, an interrupt, or a panic), dropping the bank drives every
//! claimed output LOW and releases every claimed line.

use tracing::{debug, trace, warn};

use super::{Direction, GpioBackend, PinId, Signal};
use crate::error::AppResult;

/// Backend plus the signals claimed through it.
pub struct SignalBank<B: GpioBackend> {
    backend: B,
    claimed: Vec<Signal>,
}

impl<B: GpioBackend> SignalBank<B> {
    /// Wrap a backend. Nothing is claimed yet.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            claimed: Vec::new(),
        }
    }

    /// Claim and configure one signal.
    pub fn claim(&mut self, signal: Signal) -> AppResult<()> {
        self.backend.configure(&signal)?;
        debug!(pin = %signal.pin, role = %signal.role, direction = ?signal.direction, "Claimed signal");
        self.claimed.push(signal);
        Ok(())
    }

    /// Claim signals in order, stopping at the first failure.
    ///
    /// Signals claimed before the failure stay in the bank so that drop releases them.
    pub fn claim_all(&mut self, signals: &[Signal]) -> AppResult<()> {
        for signal in signals {
            self.claim(*signal)?;
        }
        Ok(())
    }

    /// Sample an input.
    pub fn read(&mut self, pin: PinId) -> AppResult<bool> {
        let level = self.backend.read(pin)?;
        trace!(pin = %pin, level, "read");
        Ok(level)
    }

    /// Drive an output.
    pub fn write(&mut self, pin: PinId, high: bool) -> AppResult<()> {
        trace!(pin = %pin, high, "write");
        self.backend.write(pin, high)
    }

    /// Signals currently claimed, in claim order.
    pub fn claimed(&self) -> &[Signal] {
        &self.claimed
    }

    /// Whether `pin` is currently claimed.
    pub fn is_claimed(&self, pin: PinId) -> bool {
        self.claimed.iter().any(|s| s.pin == pin)
    }

    /// Drive all claimed outputs LOW, then release every claimed signal.
    ///
    /// Every step is attempted even when an earlier one fails; the first error is
    /// returned. Calling this twice is harmless.
    pub fn shutdown(&mut self) -> AppResult<()> {
        let mut first_error = None;

        for signal in self
            .claimed
            .iter()
            .filter(|s| s.direction == Direction::Output)
        {
            if let Err(e) = self.backend.write(signal.pin, false) {
                warn!(pin = %signal.pin, role = %signal.role, error = %e, "Failed to de-energize output");
                first_error.get_or_insert(e);
            }
        }

        // Release in reverse claim order
        while let Some(signal) = self.claimed.pop() {
            if let Err(e) = self.backend.release(signal.pin) {
                warn!(pin = %signal.pin, role = %signal.role, error = %e, "Failed to release signal");
                first_error.get_or_insert(e);
            } else {
                debug!(pin = %signal.pin, role = %signal.role, "Released signal");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<B: GpioBackend> Drop for SignalBank<B> {
    fn drop(&mut self) {
        if self.claimed.is_empty() {
            return;
        }

        if std::thread::panicking() {
            eprintln!(
                "[PANIC SAFETY] Releasing {} signal(s) during panic",
                self.claimed.len()
            );
        } else {
            warn!(
                count = self.claimed.len(),
                "Signal bank dropped with claimed signals - forcing safe state"
            );
        }

        if let Err(e) = self.shutdown() {
            eprintln!("[PANIC SAFETY] Cleanup incomplete: {}", e);
        }
    }
}
