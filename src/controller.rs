//! Cycle controller: the relay state machine at the heart of the rig.
//!
//! # State machine
//!
//! ```text
//! Idle ─► Configuring ─► Armed ─► EngagedWaiting ◄──────┐
//!              │                        │               │ completed < count
//!              │ claim failure          ▼               │
//!              ▼                   Disengaging ─────────┘
//!           Aborted                     │ completed == count
//!                                       ▼
//!                                   Completed
//! ```
//!
//! - **Configuring**: every signal of the [`SignalMap`] is claimed. A claim failure is fatal
//!   and happens before the countdown.
//! - **Armed**: a fixed countdown of one-second delays gives the operator time to step
//!   away from the rig.
//! - **EngagedWaiting**: relay HIGH. The [`TerminationPolicy`] is evaluated once per poll
//!   interval (0.25 s by default). Polling is the only debounce.
//! - **Disengaging**: the cycle index is logged, the relay goes LOW and the load drops for
//!   the settle delay before the next cycle is engaged.
//! - **Completed**: run log closed, every output LOW, every signal released.
//!
//! Any error after configuration starts (I/O, GPIO, interrupt) ends in `Aborted`. The
//! [`SignalBank`] is dropped on the way out, so the relay and clutch are de-energized on
//! every path.
//!
//! The switch-only policy has no time escape. If neither limit switch ever closes the
//! controller polls forever; only an interrupt stops it.

use chrono::{DateTime, Local};
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::error::{AppResult, RigError};
use crate::hardware::{GpioBackend, SignalBank, SignalMap};
use crate::run_log::RunLog;
use crate::safety::EmergencyStopFlag;

/// Default interval between termination checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Default settle delay after the relay opens.
pub const DEFAULT_DROP_DURATION: Duration = Duration::from_secs(1);
/// Default number of one-second countdown steps before the first cycle.
pub const DEFAULT_COUNTDOWN_SECONDS: u32 = 3;

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// How a cycle decides it is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// Either limit switch closing ends the cycle. No timeout.
    SwitchOnly,
    /// Either limit switch, or `lift` elapsed since the relay engaged.
    SwitchOrTimer {
        /// Maximum time the relay stays engaged
        lift: Duration,
    },
}

impl TerminationPolicy {
    /// Evaluate the termination condition for one poll tick.
    ///
    /// The conditions short-circuit in order: timer (if any), limit switch 0, limit
    /// switch 1. `read_switch` is only called for switches that are actually sampled.
    pub fn evaluate<F>(&self, elapsed: Duration, mut read_switch: F) -> AppResult<Option<TriggerCause>>
    where
        F: FnMut(u8) -> AppResult<bool>,
    {
        if let TerminationPolicy::SwitchOrTimer { lift } = *self {
            if elapsed >= lift {
                return Ok(Some(TriggerCause::LiftTimeout));
            }
        }
        for index in 0..2 {
            if read_switch(index)? {
                return Ok(Some(TriggerCause::LimitSwitch(index)));
            }
        }
        Ok(None)
    }
}

impl fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SwitchOnly => write!(f, "switch-only"),
            Self::SwitchOrTimer { lift } => write!(f, "switch-or-timer ({:.2}s)", lift.as_secs_f64()),
        }
    }
}

/// Check a requested cycle count against the policy ceiling.
pub fn validate_cycle_count(requested: i64, max_cycles: u32) -> AppResult<u32> {
    if requested < 1 || requested > i64::from(max_cycles) {
        return Err(RigError::InvalidCycleCount {
            requested,
            max: max_cycles,
        });
    }
    Ok(requested as u32)
}

/// Immutable settings for one session.
///
/// Construction validates `0 < cycle_count <= max_cycles`, so a value of this type can
/// always be run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    cycle_count: u32,
    max_cycles: u32,
    policy: TerminationPolicy,
    drop_duration: Duration,
    poll_interval: Duration,
    countdown_seconds: u32,
    debug: bool,
    step_through: bool,
}

impl RunConfiguration {
    /// Validate `requested` against `max_cycles` and build a configuration with default
    /// timing.
    pub fn new(requested: i64, max_cycles: u32, policy: TerminationPolicy) -> AppResult<Self> {
        let cycle_count = validate_cycle_count(requested, max_cycles)?;
        Ok(Self {
            cycle_count,
            max_cycles,
            policy,
            drop_duration: DEFAULT_DROP_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            countdown_seconds: DEFAULT_COUNTDOWN_SECONDS,
            debug: false,
            step_through: false,
        })
    }

    /// Set the settle delay after the relay opens.
    pub fn with_drop_duration(mut self, drop_duration: Duration) -> Self {
        self.drop_duration = drop_duration;
        self
    }

    /// Set the interval between termination checks.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the number of one-second countdown steps.
    pub fn with_countdown(mut self, seconds: u32) -> Self {
        self.countdown_seconds = seconds;
        self
    }

    /// Enable per-poll diagnostics.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Wait for the operator instead of the settle delay between cycles.
    pub fn with_step_through(mut self, step_through: bool) -> Self {
        self.step_through = step_through;
        self
    }

    /// Number of cycles to run.
    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    /// Policy ceiling the count was validated against.
    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    /// Termination policy.
    pub fn policy(&self) -> TerminationPolicy {
        self.policy
    }

    /// Settle delay after the relay opens.
    pub fn drop_duration(&self) -> Duration {
        self.drop_duration
    }

    /// Interval between termination checks.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Countdown length in seconds.
    pub fn countdown_seconds(&self) -> u32 {
        self.countdown_seconds
    }

    /// Whether per-poll diagnostics are enabled.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether the operator advances each cycle by hand.
    pub fn step_through(&self) -> bool {
        self.step_through
    }
}

// =============================================================================
// Run-time state
// =============================================================================

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Not yet started
    Idle,
    /// Claiming signals
    Configuring,
    /// Signals claimed, countdown done
    Armed,
    /// Relay engaged, polling for termination
    EngagedWaiting,
    /// Relay released, load settling
    Disengaging,
    /// All cycles finished and signals released
    Completed,
    /// Stopped early by an error or interrupt
    Aborted,
}

/// Why a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCause {
    /// Limit switch 0 or 1 closed
    LimitSwitch(u8),
    /// Lift duration elapsed
    LiftTimeout,
}

impl fmt::Display for TriggerCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitSwitch(index) => write!(f, "limit switch {}", index),
            Self::LiftTimeout => write!(f, "lift timeout"),
        }
    }
}

/// Mutable per-run state, owned by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleState {
    /// Cycles finished so far
    pub completed_count: u32,
    /// Whether the relay is currently driven HIGH
    pub relay_engaged: bool,
    /// Clock reading when the current cycle began
    pub cycle_started_at: Duration,
}

/// One finished cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRecord {
    /// 1-based cycle index
    pub index: u32,
    /// What ended the cycle
    pub cause: TriggerCause,
    /// Time between engaging the relay and detecting the trigger
    pub engaged_for: Duration,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Every finished cycle, in order
    pub cycles: Vec<CycleRecord>,
    /// Wall-clock start of the session
    pub started_at: DateTime<Local>,
    /// Time from configuration to completion
    pub elapsed: Duration,
}

impl CycleReport {
    /// Number of cycles finished.
    pub fn completed(&self) -> u32 {
        self.cycles.len() as u32
    }

    /// Cycles ended by the lift timer.
    pub fn timeouts(&self) -> usize {
        self.cycles
            .iter()
            .filter(|c| c.cause == TriggerCause::LiftTimeout)
            .count()
    }

    /// Cycles ended by a limit switch.
    pub fn switch_hits(&self) -> usize {
        self.cycles.len() - self.timeouts()
    }
}

/// Operator-facing progress output.
///
/// Every method has a no-op default so test doubles only implement what they observe.
pub trait Narrator {
    /// Countdown step, `remaining` seconds before the relay engages.
    fn countdown(&mut self, _remaining: u32) {}

    /// Relay engaged for cycle `cycle` of `total`.
    fn cycle_started(&mut self, _cycle: u32, _total: u32) {}

    /// Relay released after cycle `cycle` ended.
    fn cycle_finished(&mut self, _cycle: u32, _total: u32, _cause: TriggerCause) {}

    /// Block until the operator allows the next cycle (step-through mode).
    fn await_continue(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// All cycles done.
    fn completed(&mut self, _report: &CycleReport) {}
}

/// Narrator that prints nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNarrator;

impl Narrator for NullNarrator {}

// =============================================================================
// Controller
// =============================================================================

/// Drives the relay through a bounded number of lift/drop cycles.
pub struct CycleController<C: Clock> {
    config: RunConfiguration,
    signals: SignalMap,
    clock: C,
    stop: EmergencyStopFlag,
    state: ControllerState,
    cycle: CycleState,
}

impl<C: Clock> CycleController<C> {
    /// Create a controller in `Idle`. Nothing is touched until [`run`](Self::run).
    pub fn new(config: RunConfiguration, signals: SignalMap, clock: C) -> Self {
        Self {
            config,
            signals,
            clock,
            stop: EmergencyStopFlag::new(),
            state: ControllerState::Idle,
            cycle: CycleState::default(),
        }
    }

    /// Use a shared emergency stop flag (e.g. one tripped by Ctrl-C).
    pub fn with_stop_flag(mut self, stop: EmergencyStopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Current state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Current cycle bookkeeping.
    pub fn cycle_state(&self) -> &CycleState {
        &self.cycle
    }

    /// Session configuration.
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Run the whole session on `backend`, logging completed cycles to `log`.
    ///
    /// Can only be called once; the controller ends in `Completed` or `Aborted`.
    #[instrument(skip_all, fields(cycles = self.config.cycle_count, policy = %self.config.policy))]
    pub fn run<B, W, N>(
        &mut self,
        backend: B,
        log: RunLog<W>,
        narrator: &mut N,
    ) -> AppResult<CycleReport>
    where
        B: GpioBackend,
        W: Write,
        N: Narrator,
    {
        if self.state != ControllerState::Idle {
            return Err(RigError::Configuration(format!(
                "controller already ran (state {:?})",
                self.state
            )));
        }

        let started_at = Local::now();
        let run_start = self.clock.now();
        let mut bank = SignalBank::new(backend);
        let mut log = log;

        match self.drive(&mut bank, &mut log, narrator) {
            Ok(cycles) => {
                let closed = log.close().map(drop);
                let released = bank.shutdown();
                self.cycle.relay_engaged = false;
                if let Err(e) = closed.and(released) {
                    error!(error = %e, "Cleanup after final cycle failed");
                    self.transition(ControllerState::Aborted);
                    return Err(e);
                }
                self.transition(ControllerState::Completed);

                let report = CycleReport {
                    cycles,
                    started_at,
                    elapsed: self.clock.now().saturating_sub(run_start),
                };
                info!(
                    completed = report.completed(),
                    switch_hits = report.switch_hits(),
                    timeouts = report.timeouts(),
                    elapsed_s = report.elapsed.as_secs_f64(),
                    started_at = %report.started_at.format("%Y-%m-%d %H:%M:%S"),
                    "Testing completed, rig released"
                );
                narrator.completed(&report);
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, completed = self.cycle.completed_count, "Run aborted");
                // Forces relay and clutch LOW and releases every claimed signal
                drop(bank);
                self.cycle.relay_engaged = false;
                self.transition(ControllerState::Aborted);
                Err(e)
            }
        }
    }

    fn drive<B, W, N>(
        &mut self,
        bank: &mut SignalBank<B>,
        log: &mut RunLog<W>,
        narrator: &mut N,
    ) -> AppResult<Vec<CycleRecord>>
    where
        B: GpioBackend,
        W: Write,
        N: Narrator,
    {
        self.transition(ControllerState::Configuring);
        bank.claim_all(&self.signals.signals())?;
        info!(signals = bank.claimed().len(), "Pins configured");

        for remaining in (1..=self.config.countdown_seconds).rev() {
            narrator.countdown(remaining);
            self.wait(COUNTDOWN_STEP)?;
        }
        self.transition(ControllerState::Armed);

        let mut cycles = Vec::with_capacity(self.config.cycle_count as usize);
        self.engage(bank, narrator)?;

        loop {
            self.stop.check()?;

            if let Some(cause) = self.poll(bank)? {
                cycles.push(self.disengage(bank, log, cause, narrator)?);
                self.settle(narrator)?;

                if self.cycle.completed_count < self.config.cycle_count {
                    self.engage(bank, narrator)?;
                } else {
                    return Ok(cycles);
                }
            }

            self.clock.sleep(self.config.poll_interval);
        }
    }

    fn engage<B: GpioBackend, N: Narrator>(
        &mut self,
        bank: &mut SignalBank<B>,
        narrator: &mut N,
    ) -> AppResult<()> {
        let index = self.cycle.completed_count + 1;
        narrator.cycle_started(index, self.config.cycle_count);
        info!(cycle = index, total = self.config.cycle_count, "Engaging clutch and motor");

        bank.write(self.signals.relay, true)?;
        self.cycle.relay_engaged = true;
        self.cycle.cycle_started_at = self.clock.now();
        self.transition(ControllerState::EngagedWaiting);
        Ok(())
    }

    fn poll<B: GpioBackend>(&self, bank: &mut SignalBank<B>) -> AppResult<Option<TriggerCause>> {
        let elapsed = self.clock.now().saturating_sub(self.cycle.cycle_started_at);
        let switches = self.signals.limit_switches;

        let cause = self
            .config
            .policy
            .evaluate(elapsed, |index| bank.read(switches[usize::from(index)]))?;

        if self.config.debug {
            debug!(
                elapsed_s = elapsed.as_secs_f64(),
                cause = ?cause,
                "Poll"
            );
        }
        Ok(cause)
    }

    fn disengage<B: GpioBackend, W: Write, N: Narrator>(
        &mut self,
        bank: &mut SignalBank<B>,
        log: &mut RunLog<W>,
        cause: TriggerCause,
        narrator: &mut N,
    ) -> AppResult<CycleRecord> {
        let now = self.clock.now();
        let engaged_for = now.saturating_sub(self.cycle.cycle_started_at);
        self.transition(ControllerState::Disengaging);

        if matches!(self.config.policy, TerminationPolicy::SwitchOrTimer { .. }) {
            self.cycle.cycle_started_at = now;
        }

        let index = self.cycle.completed_count + 1;
        log.record(index)?;

        bank.write(self.signals.relay, false)?;
        self.cycle.relay_engaged = false;
        self.cycle.completed_count += 1;

        info!(
            cycle = index,
            cause = %cause,
            engaged_s = engaged_for.as_secs_f64(),
            "Disengaging clutch and motor"
        );
        narrator.cycle_finished(index, self.config.cycle_count, cause);

        Ok(CycleRecord {
            index,
            cause,
            engaged_for,
        })
    }

    fn settle<N: Narrator>(&mut self, narrator: &mut N) -> AppResult<()> {
        if self.config.step_through {
            narrator.await_continue()?;
            self.stop.check()
        } else {
            self.wait(self.config.drop_duration)
        }
    }

    /// Blocking delay bracketed by emergency stop checks.
    fn wait(&self, duration: Duration) -> AppResult<()> {
        self.stop.check()?;
        self.clock.sleep(duration);
        self.stop.check()
    }

    fn transition(&mut self, next: ControllerState) {
        debug!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::hardware::{MockGpio, PinId};
    use tracing_test::traced_test;

    fn quick(count: i64, policy: TerminationPolicy) -> RunConfiguration {
        RunConfiguration::new(count, 100, policy).unwrap()
    }

    #[test]
    fn cycle_count_bounds() {
        assert!(validate_cycle_count(1, 500).is_ok());
        assert!(validate_cycle_count(500, 500).is_ok());
        assert!(matches!(
            validate_cycle_count(0, 500),
            Err(RigError::InvalidCycleCount { requested: 0, max: 500 })
        ));
        assert!(validate_cycle_count(501, 500).is_err());
        assert!(validate_cycle_count(-3, 500).is_err());
    }

    #[test]
    fn switch_only_ignores_elapsed_time() {
        let policy = TerminationPolicy::SwitchOnly;
        let cause = policy
            .evaluate(Duration::from_secs(3600), |_| Ok(false))
            .unwrap();
        assert_eq!(cause, None);

        let cause = policy.evaluate(Duration::ZERO, |i| Ok(i == 1)).unwrap();
        assert_eq!(cause, Some(TriggerCause::LimitSwitch(1)));
    }

    #[test]
    fn timer_short_circuits_switch_reads() {
        let policy = TerminationPolicy::SwitchOrTimer {
            lift: Duration::from_secs(30),
        };
        let mut reads = 0;
        let cause = policy
            .evaluate(Duration::from_secs(30), |_| {
                reads += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(cause, Some(TriggerCause::LiftTimeout));
        assert_eq!(reads, 0);
    }

    #[test]
    fn switch_zero_short_circuits_switch_one() {
        let mut sampled = Vec::new();
        let cause = TerminationPolicy::SwitchOnly
            .evaluate(Duration::ZERO, |i| {
                sampled.push(i);
                Ok(true)
            })
            .unwrap();
        assert_eq!(cause, Some(TriggerCause::LimitSwitch(0)));
        assert_eq!(sampled, vec![0]);
    }

    #[test]
    fn single_switch_cycle_runs_to_completion() {
        let gpio = MockGpio::new();
        let clock = MockClock::new();
        let map = SignalMap::default();
        gpio.script_reads(map.limit_switches[0], [false, true]);

        let mut controller =
            CycleController::new(quick(1, TerminationPolicy::SwitchOnly), map.clone(), clock.clone());
        let log = RunLog::from_writer(Vec::new()).unwrap();
        let report = controller.run(gpio.clone(), log, &mut NullNarrator).unwrap();

        assert_eq!(controller.state(), ControllerState::Completed);
        assert_eq!(controller.cycle_state().completed_count, 1);
        assert!(!controller.cycle_state().relay_engaged);
        assert_eq!(report.cycles[0].cause, TriggerCause::LimitSwitch(0));
        assert_eq!(report.cycles[0].engaged_for, DEFAULT_POLL_INTERVAL);
        assert_eq!(gpio.writes_to(map.relay), vec![true, false, false]);
        assert_eq!(clock.count_sleeps(Duration::from_secs(1)), 4);
    }

    #[test]
    fn second_run_is_rejected() {
        let gpio = MockGpio::new();
        gpio.set_input(PinId(20), true);
        let mut controller = CycleController::new(
            quick(1, TerminationPolicy::SwitchOnly).with_countdown(0),
            SignalMap::default(),
            MockClock::new(),
        );
        controller
            .run(gpio.clone(), RunLog::from_writer(Vec::new()).unwrap(), &mut NullNarrator)
            .unwrap();

        let again = controller.run(gpio, RunLog::from_writer(Vec::new()).unwrap(), &mut NullNarrator);
        assert!(matches!(again, Err(RigError::Configuration(_))));
        assert_eq!(controller.state(), ControllerState::Completed);
    }

    #[test]
    fn tripped_stop_flag_aborts_and_releases() {
        let gpio = MockGpio::new();
        let stop = EmergencyStopFlag::new();
        stop.trigger("test");

        let map = SignalMap::default();
        let mut controller =
            CycleController::new(quick(5, TerminationPolicy::SwitchOnly), map.clone(), MockClock::new())
                .with_stop_flag(stop);
        let result = controller.run(gpio.clone(), RunLog::from_writer(Vec::new()).unwrap(), &mut NullNarrator);

        assert!(matches!(result, Err(RigError::Interrupted { .. })));
        assert_eq!(controller.state(), ControllerState::Aborted);
        assert!(!gpio.level(map.relay));
        assert!(!gpio.is_claimed(map.relay));
    }

    #[test]
    #[traced_test]
    fn logs_every_cycle_transition() {
        let gpio = MockGpio::new();
        gpio.set_input(PinId(21), true);
        let mut controller = CycleController::new(
            quick(2, TerminationPolicy::SwitchOnly),
            SignalMap::default(),
            MockClock::new(),
        );
        controller
            .run(gpio, RunLog::from_writer(Vec::new()).unwrap(), &mut NullNarrator)
            .unwrap();

        assert!(logs_contain("Pins configured"));
        assert!(logs_contain("Engaging clutch and motor"));
        assert!(logs_contain("Disengaging clutch and motor"));
        assert!(logs_contain("cause=limit switch 1"));
        assert!(logs_contain("Testing completed, rig released"));
    }
}
