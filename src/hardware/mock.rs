//! Mock GPIO Implementation
//!
//! Provides simulated digital lines for testing without a rig attached.
//!
//! `MockGpio` is a cheap clone handle over shared state: hand one clone to the
//! controller and keep another in the test to inspect what happened.
//!
//! # Input simulation
//!
//! Inputs resolve in this order on every read:
//! 1. A scripted queue (`script_reads`), consumed one value per read
//! 2. A pulse (`pulse_every`), asserted on every Nth read of that pin
//! 3. The fixed level (`set_input`), LOW unless changed
//!
//! # Event log
//!
//! Every operation is appended to an event log unless recording is switched off with
//! `set_event_recording(false)`. `simulated_rig` starts with recording off, so an
//! unattended simulated session runs in constant memory.
//!
//! # Example
//!
//! ```rust,ignore
//! let gpio = MockGpio::new();
//! gpio.script_reads(PinId(20), [false, false, true]);
//! let mut bank = SignalBank::new(gpio.clone());
//! // ... run ...
//! assert!(!gpio.level(PinId(22)));
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::{Direction, GpioBackend, PinId, Pull, Signal};
use crate::error::{AppResult, RigError};

/// One recorded operation on the mock lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioEvent {
    /// Pin claimed with the given direction
    Configure(PinId, Direction),
    /// Input sampled, with the level returned
    Read(PinId, bool),
    /// Output driven
    Write(PinId, bool),
    /// Pin released
    Release(PinId),
}

#[derive(Default)]
struct MockState {
    claimed: HashMap<PinId, Signal>,
    levels: HashMap<PinId, bool>,
    scripted: HashMap<PinId, VecDeque<bool>>,
    pulses: HashMap<PinId, (u32, u32)>,
    rejected: HashSet<PinId>,
    released: Vec<PinId>,
    events: Vec<GpioEvent>,
    events_disabled: bool,
}

impl MockState {
    fn record(&mut self, event: GpioEvent) {
        if !self.events_disabled {
            self.events.push(event);
        }
    }
}

/// In-memory GPIO backend.
#[derive(Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<MockState>>,
}

impl MockGpio {
    /// Create a mock with every line LOW and nothing claimed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock with limit switch `pin` pulsing HIGH every `period` reads.
    ///
    /// Used by `--simulate` so switch-only runs make progress. Event recording is off.
    pub fn simulated_rig(pin: PinId, period: u32) -> Self {
        let gpio = Self::new();
        gpio.set_event_recording(false);
        gpio.pulse_every(pin, period);
        gpio
    }

    /// Turn the event log on or off. Turning it off also drops what was recorded.
    pub fn set_event_recording(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.events_disabled = !enabled;
        if !enabled {
            state.events = Vec::new();
        }
    }

    /// Make `configure` fail for `pin`, as if the line were held by another process.
    pub fn reject_claim(&self, pin: PinId) {
        self.state.lock().rejected.insert(pin);
    }

    /// Set the idle level of an input.
    pub fn set_input(&self, pin: PinId, high: bool) {
        self.state.lock().levels.insert(pin, high);
    }

    /// Queue values returned by the next reads of `pin`.
    pub fn script_reads<I>(&self, pin: PinId, values: I)
    where
        I: IntoIterator<Item = bool>,
    {
        self.state
            .lock()
            .scripted
            .entry(pin)
            .or_default()
            .extend(values);
    }

    /// Assert `pin` on every `period`th read (1 = always HIGH).
    pub fn pulse_every(&self, pin: PinId, period: u32) {
        self.state.lock().pulses.insert(pin, (period.max(1), 0));
    }

    /// Current level of a line (last written value for outputs).
    pub fn level(&self, pin: PinId) -> bool {
        self.state.lock().levels.get(&pin).copied().unwrap_or(false)
    }

    /// Whether `pin` is currently claimed.
    pub fn is_claimed(&self, pin: PinId) -> bool {
        self.state.lock().claimed.contains_key(&pin)
    }

    /// Pins released so far, in release order.
    pub fn released(&self) -> Vec<PinId> {
        self.state.lock().released.clone()
    }

    /// Every operation recorded so far (empty while recording is off).
    pub fn events(&self) -> Vec<GpioEvent> {
        self.state.lock().events.clone()
    }

    /// Values written to `pin`, in order.
    pub fn writes_to(&self, pin: PinId) -> Vec<bool> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                GpioEvent::Write(p, high) if *p == pin => Some(*high),
                _ => None,
            })
            .collect()
    }

    /// Number of reads of `pin`.
    pub fn read_count(&self, pin: PinId) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, GpioEvent::Read(p, _) if *p == pin))
            .count()
    }
}

impl GpioBackend for MockGpio {
    fn configure(&mut self, signal: &Signal) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.rejected.contains(&signal.pin) {
            return Err(signal.claim_error("line rejected by mock"));
        }
        if state.claimed.contains_key(&signal.pin) {
            return Err(signal.claim_error("pin already in use"));
        }

        let idle = match (signal.direction, signal.pull) {
            (Direction::Output, _) => false,
            (Direction::Input, Pull::Up) => true,
            (Direction::Input, _) => state.levels.get(&signal.pin).copied().unwrap_or(false),
        };
        state.levels.insert(signal.pin, idle);
        state.claimed.insert(signal.pin, *signal);
        state.record(GpioEvent::Configure(signal.pin, signal.direction));
        Ok(())
    }

    fn read(&mut self, pin: PinId) -> AppResult<bool> {
        let mut state = self.state.lock();
        match state.claimed.get(&pin) {
            Some(signal) if signal.direction == Direction::Input => {}
            Some(_) => return Err(RigError::Gpio(format!("pin {} is not an input", pin))),
            None => return Err(RigError::Gpio(format!("pin {} is not claimed", pin))),
        }

        let scripted = state.scripted.get_mut(&pin).and_then(|q| q.pop_front());
        let pulsed = match state.pulses.get_mut(&pin) {
            Some((period, count)) => {
                *count += 1;
                Some(*count % *period == 0)
            }
            None => None,
        };
        let level = scripted
            .or(pulsed)
            .unwrap_or_else(|| state.levels.get(&pin).copied().unwrap_or(false));

        state.record(GpioEvent::Read(pin, level));
        Ok(level)
    }

    fn write(&mut self, pin: PinId, high: bool) -> AppResult<()> {
        let mut state = self.state.lock();
        match state.claimed.get(&pin) {
            Some(signal) if signal.direction == Direction::Output => {}
            Some(_) => return Err(RigError::Gpio(format!("pin {} is not an output", pin))),
            None => return Err(RigError::Gpio(format!("pin {} is not claimed", pin))),
        }

        state.levels.insert(pin, high);
        state.record(GpioEvent::Write(pin, high));
        Ok(())
    }

    fn release(&mut self, pin: PinId) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.claimed.remove(&pin).is_none() {
            return Err(RigError::Gpio(format!("pin {} is not claimed", pin)));
        }

        state.levels.insert(pin, false);
        state.released.push(pin);
        state.record(GpioEvent::Release(pin));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SignalRole;

    fn limit(pin: u32) -> Signal {
        Signal::input(PinId(pin), SignalRole::LimitSwitch(0), Pull::Down)
    }

    #[test]
    fn double_claim_fails() {
        let mut gpio = MockGpio::new();
        gpio.configure(&limit(20)).unwrap();
        let err = gpio.configure(&limit(20)).unwrap_err();
        assert!(matches!(err, RigError::HardwareConfiguration { .. }));
    }

    #[test]
    fn scripted_reads_then_fixed_level() {
        let mut gpio = MockGpio::new();
        gpio.configure(&limit(20)).unwrap();
        gpio.script_reads(PinId(20), [true, false]);
        gpio.set_input(PinId(20), true);

        assert!(gpio.read(PinId(20)).unwrap());
        assert!(!gpio.read(PinId(20)).unwrap());
        assert!(gpio.read(PinId(20)).unwrap());
        assert_eq!(gpio.read_count(PinId(20)), 3);
    }

    #[test]
    fn pulse_asserts_every_nth_read() {
        let mut gpio = MockGpio::new();
        gpio.configure(&limit(20)).unwrap();
        gpio.pulse_every(PinId(20), 3);

        let reads: Vec<bool> = (0..6).map(|_| gpio.read(PinId(20)).unwrap()).collect();
        assert_eq!(reads, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn direction_is_enforced() {
        let mut gpio = MockGpio::new();
        gpio.configure(&limit(20)).unwrap();
        gpio.configure(&Signal::output(PinId(22), SignalRole::Relay))
            .unwrap();

        assert!(gpio.write(PinId(20), true).is_err());
        assert!(gpio.read(PinId(22)).is_err());
        assert!(gpio.read(PinId(5)).is_err());
    }

    #[test]
    fn release_frees_pin_for_reuse() {
        let mut gpio = MockGpio::new();
        gpio.configure(&Signal::output(PinId(22), SignalRole::Relay))
            .unwrap();
        gpio.write(PinId(22), true).unwrap();
        gpio.release(PinId(22)).unwrap();

        assert!(!gpio.level(PinId(22)));
        assert!(gpio
            .configure(&Signal::output(PinId(22), SignalRole::Relay))
            .is_ok());
    }

    #[test]
    fn simulated_rig_keeps_no_event_log() {
        let mut gpio = MockGpio::simulated_rig(PinId(20), 2);
        gpio.configure(&limit(20)).unwrap();
        gpio.configure(&Signal::output(PinId(22), SignalRole::Relay))
            .unwrap();

        let reads: Vec<bool> = (0..1000).map(|_| gpio.read(PinId(20)).unwrap()).collect();
        gpio.write(PinId(22), true).unwrap();

        assert_eq!(reads.iter().filter(|high| **high).count(), 500);
        assert!(gpio.level(PinId(22)));
        assert!(gpio.events().is_empty());
        assert_eq!(gpio.read_count(PinId(20)), 0);

        gpio.release(PinId(22)).unwrap();
        assert_eq!(gpio.released(), vec![PinId(22)]);
        assert!(!gpio.level(PinId(22)));
    }

    #[test]
    fn recording_can_be_switched_back_on() {
        let mut gpio = MockGpio::new();
        gpio.configure(&limit(20)).unwrap();
        gpio.set_event_recording(false);
        gpio.read(PinId(20)).unwrap();
        gpio.set_event_recording(true);
        gpio.read(PinId(20)).unwrap();

        assert_eq!(gpio.events(), vec![GpioEvent::Read(PinId(20), false)]);
    }
}
