//! Pin/channel abstraction for the rig's digital lines.
//!
//! Every physical line the harness touches is described by a [`Signal`]: which pin it
//! lives on, what it is used for, and whether it is an input or an output. Backends
//! implement [`GpioBackend`] and are only ever driven through a [`SignalBank`], which
//! tracks what has been claimed and returns every output to a de-energized state when it
//! goes out of scope.
//!
//! # Backends
//!
//! - [`MockGpio`] - in-memory lines for tests and `--simulate` runs
//! - `CdevGpio` - Linux GPIO character device (feature `gpio_cdev`)

pub mod bank;
#[cfg(feature = "gpio_cdev")]
pub mod cdev;
pub mod mock;

pub use bank::SignalBank;
#[cfg(feature = "gpio_cdev")]
pub use cdev::CdevGpio;
pub use mock::{GpioEvent, MockGpio};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{AppResult, RigError};

/// Physical line identifier (GPIO line offset on the configured chip).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub u32);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a claimed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Line is sampled by the harness
    Input,
    /// Line is driven by the harness
    Output,
}

/// Pull resistor configuration for inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pull {
    /// Floating input
    #[default]
    None,
    /// Pulled to logic HIGH when idle
    Up,
    /// Pulled to logic LOW when idle
    Down,
}

/// What a line is used for on the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalRole {
    /// Upper limit switch (index 0 or 1)
    LimitSwitch(u8),
    /// Motor relay, active HIGH
    Relay,
    /// Clutch supply, active HIGH
    Clutch,
    /// ADC serial clock
    AdcClock,
    /// ADC data out (host to converter)
    AdcDataOut,
    /// ADC data in (converter to host)
    AdcDataIn,
    /// ADC chip-select, active LOW
    AdcChipSelect,
}

impl fmt::Display for SignalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitSwitch(index) => write!(f, "limit switch {}", index),
            Self::Relay => write!(f, "relay"),
            Self::Clutch => write!(f, "clutch"),
            Self::AdcClock => write!(f, "ADC clock"),
            Self::AdcDataOut => write!(f, "ADC data out"),
            Self::AdcDataIn => write!(f, "ADC data in"),
            Self::AdcChipSelect => write!(f, "ADC chip select"),
        }
    }
}

/// A logical hardware line, immutable for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    /// Physical pin
    pub pin: PinId,
    /// Purpose on the rig
    pub role: SignalRole,
    /// Input or output
    pub direction: Direction,
    /// Pull configuration (inputs only)
    pub pull: Pull,
}

impl Signal {
    /// An input line with the given pull configuration.
    pub fn input(pin: PinId, role: SignalRole, pull: Pull) -> Self {
        Self {
            pin,
            role,
            direction: Direction::Input,
            pull,
        }
    }

    /// An output line. Outputs never carry a pull configuration.
    pub fn output(pin: PinId, role: SignalRole) -> Self {
        Self {
            pin,
            role,
            direction: Direction::Output,
            pull: Pull::None,
        }
    }

    /// Build the `HardwareConfiguration` error for this signal.
    pub fn claim_error(&self, reason: impl Into<String>) -> RigError {
        RigError::HardwareConfiguration {
            pin: self.pin,
            role: self.role,
            reason: reason.into(),
        }
    }
}

/// Low-level digital line access.
///
/// # Contract
/// - `configure` claims the pin; it fails with `RigError::HardwareConfiguration` when the
///   pin is already in use or does not exist
/// - `read` is only valid on input lines, `write` only on output lines
/// - `release` returns the pin to a safe default (output LOW, or input without pull) and
///   frees it for reuse
/// - Every call touches the line immediately; nothing is batched
pub trait GpioBackend {
    /// Claim and configure a line.
    fn configure(&mut self, signal: &Signal) -> AppResult<()>;

    /// Sample an input line. `true` is logic HIGH.
    fn read(&mut self, pin: PinId) -> AppResult<bool>;

    /// Drive an output line. `true` is logic HIGH.
    fn write(&mut self, pin: PinId, high: bool) -> AppResult<()>;

    /// Return a line to its safe default and free it.
    fn release(&mut self, pin: PinId) -> AppResult<()>;
}

/// The four lines of the bit-banged ADC interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdcLines {
    /// Serial clock (output)
    pub clock: PinId,
    /// Host to converter data (output)
    pub data_out: PinId,
    /// Converter to host data (input)
    pub data_in: PinId,
    /// Chip-select, active LOW (output)
    pub chip_select: PinId,
}

impl AdcLines {
    /// The ADC lines as claimable signals.
    pub fn signals(&self) -> [Signal; 4] {
        [
            Signal::output(self.data_out, SignalRole::AdcDataOut),
            Signal::input(self.data_in, SignalRole::AdcDataIn, Pull::None),
            Signal::output(self.clock, SignalRole::AdcClock),
            Signal::output(self.chip_select, SignalRole::AdcChipSelect),
        ]
    }
}

/// Physical wiring of the rig.
///
/// Defaults are BCM line offsets for a Raspberry Pi header: limit switches on pins 38/40,
/// relay on pin 15, ADC on pins 12/18/16/22. Rigs that switch the clutch separately set
/// `clutch` (header pin 13 is line 27).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMap {
    /// Upper limit switches, pulled down, asserted HIGH
    pub limit_switches: [PinId; 2],
    /// Motor relay output
    pub relay: PinId,
    /// Clutch output, when the clutch is switched separately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clutch: Option<PinId>,
    /// ADC interface
    pub adc: AdcLines,
}

impl Default for SignalMap {
    fn default() -> Self {
        Self {
            limit_switches: [PinId(20), PinId(21)],
            relay: PinId(22),
            clutch: None,
            adc: AdcLines {
                clock: PinId(18),
                data_out: PinId(24),
                data_in: PinId(23),
                chip_select: PinId(25),
            },
        }
    }
}

impl SignalMap {
    /// Every signal of the rig in claim order: limit inputs, relay, clutch, ADC lines.
    pub fn signals(&self) -> Vec<Signal> {
        let mut signals = vec![
            Signal::input(self.limit_switches[0], SignalRole::LimitSwitch(0), Pull::Down),
            Signal::input(self.limit_switches[1], SignalRole::LimitSwitch(1), Pull::Down),
            Signal::output(self.relay, SignalRole::Relay),
        ];
        if let Some(clutch) = self.clutch {
            signals.push(Signal::output(clutch, SignalRole::Clutch));
        }
        signals.extend(self.adc.signals());
        signals
    }

    /// Reject maps that put two signals on the same pin.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for signal in self.signals() {
            if !seen.insert(signal.pin) {
                return Err(format!(
                    "Pin {} is assigned more than once (second use: {})",
                    signal.pin, signal.role
                ));
            }
        }
        Ok(())
    }
}
