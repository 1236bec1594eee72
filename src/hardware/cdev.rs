//! Linux GPIO character device backend.
//!
//! Lines are requested through `/dev/gpiochipN` with the `gpio-cdev` crate. A line handle
//! is held for as long as the pin is claimed; dropping it hands the line back to the
//! kernel.
//!
//! The v1 character-device ABI has no bias flags, so pull configuration cannot be applied
//! from here. The rig's limit switches carry external pull-down resistors; a requested
//! pull is logged and otherwise ignored.

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use super::{Direction, GpioBackend, PinId, Pull, Signal};
use crate::error::{AppResult, RigError};

const CONSUMER: &str = "drop-rig";

struct ClaimedLine {
    handle: LineHandle,
    direction: Direction,
}

/// GPIO backend on a Linux gpiochip device.
pub struct CdevGpio {
    chip: Chip,
    lines: HashMap<PinId, ClaimedLine>,
}

impl CdevGpio {
    /// Open a GPIO chip, e.g. `/dev/gpiochip0`.
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let chip = Chip::new(path.as_ref()).map_err(|e| {
            RigError::Gpio(format!(
                "Failed to open GPIO chip '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        info!(
            chip = %path.as_ref().display(),
            label = chip.label(),
            lines = chip.num_lines(),
            "Opened GPIO chip"
        );
        Ok(Self {
            chip,
            lines: HashMap::new(),
        })
    }

    fn claimed(&self, pin: PinId) -> AppResult<&ClaimedLine> {
        self.lines
            .get(&pin)
            .ok_or_else(|| RigError::Gpio(format!("pin {} is not claimed", pin)))
    }
}

impl GpioBackend for CdevGpio {
    fn configure(&mut self, signal: &Signal) -> AppResult<()> {
        if self.lines.contains_key(&signal.pin) {
            return Err(signal.claim_error("pin already in use"));
        }
        if signal.pin.0 >= self.chip.num_lines() {
            return Err(signal.claim_error(format!(
                "chip has only {} lines",
                self.chip.num_lines()
            )));
        }
        if signal.pull != Pull::None {
            warn!(
                pin = %signal.pin,
                role = %signal.role,
                pull = ?signal.pull,
                "Pull configuration is not available through the character device; relying on external resistor"
            );
        }

        let flags = match signal.direction {
            Direction::Input => LineRequestFlags::INPUT,
            Direction::Output => LineRequestFlags::OUTPUT,
        };
        let handle = self
            .chip
            .get_line(signal.pin.0)
            .and_then(|line| line.request(flags, 0, CONSUMER))
            .map_err(|e| signal.claim_error(e.to_string()))?;

        self.lines.insert(
            signal.pin,
            ClaimedLine {
                handle,
                direction: signal.direction,
            },
        );
        Ok(())
    }

    fn read(&mut self, pin: PinId) -> AppResult<bool> {
        let line = self.claimed(pin)?;
        if line.direction != Direction::Input {
            return Err(RigError::Gpio(format!("pin {} is not an input", pin)));
        }
        line.handle
            .get_value()
            .map(|v| v != 0)
            .map_err(|e| RigError::Gpio(format!("read of pin {} failed: {}", pin, e)))
    }

    fn write(&mut self, pin: PinId, high: bool) -> AppResult<()> {
        let line = self.claimed(pin)?;
        if line.direction != Direction::Output {
            return Err(RigError::Gpio(format!("pin {} is not an output", pin)));
        }
        line.handle
            .set_value(u8::from(high))
            .map_err(|e| RigError::Gpio(format!("write of pin {} failed: {}", pin, e)))
    }

    fn release(&mut self, pin: PinId) -> AppResult<()> {
        let line = self
            .lines
            .remove(&pin)
            .ok_or_else(|| RigError::Gpio(format!("pin {} is not claimed", pin)))?;
        if line.direction == Direction::Output {
            line.handle
                .set_value(0)
                .map_err(|e| RigError::Gpio(format!("reset of pin {} failed: {}", pin, e)))?;
        }
        // Dropping the handle returns the line to the kernel
        drop(line);
        Ok(())
    }
}
