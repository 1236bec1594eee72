//! # Drop Rig Core Library
//!
//! This crate drives a mechanical drop/lift test rig: a relay powers a motor (and
//! optionally a clutch) to lift a load, and each cycle ends when a limit switch trips or,
//! in timed mode, when the lift window runs out. Completed cycles are written to a plain
//! text run log. The command-line front end lives in `main.rs`; everything it needs is
//! exposed here so tests can drive whole sessions against mock hardware.
//!
//! ## Crate Structure
//!
//! - **`adc`**: Bit-banged reader for the 8-channel ADC and the infrared range window.
//! - **`clock`**: The `Clock` trait with a real and a virtual-time implementation.
//! - **`config`**: Layered configuration (defaults, TOML file, `DROP_RIG_` environment).
//! - **`controller`**: The cycle state machine, termination policies and run reports.
//! - **`error`**: The `RigError` enum and exit status mapping.
//! - **`hardware`**: Signals, the `GpioBackend` trait, the `SignalBank` that guarantees
//!   release, a mock backend and (feature `gpio_cdev`) the Linux character device backend.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`run_log`**: The `Tests run:` log file.
//! - **`safety`**: Emergency stop flag and Ctrl-C handler.
//! - **`session`**: Operator prompts and console progress.

pub mod adc;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod run_log;
pub mod safety;
pub mod session;

pub use controller::{CycleController, CycleReport, RunConfiguration, TerminationPolicy};
pub use error::{AppResult, RigError};
