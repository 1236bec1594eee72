//! CLI entry point for the drop rig.
//!
//! ```bash
//! drop-rig 25                      # run 25 cycles
//! drop-rig                         # offer the configured default count
//! drop-rig --simulate --yes 3      # dry run against simulated lines
//! drop-rig adc --channel 0         # sample the infrared range sensor
//! drop-rig show-config             # print the effective configuration
//! ```
//!
//! Exit status: 0 for completion and intentional stops (abort, declined default, invalid
//! count), 1 for unexpected failures, 2 for usage errors, 3 when the GPIO lines cannot be
//! claimed, 130 after Ctrl-C or a termination signal.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use drop_rig::adc::{AdcSampler, CHANNELS, INVALID_CHANNEL};
use drop_rig::clock::SystemClock;
use drop_rig::config::{PolicyKind, RigConfig, DEFAULT_CONFIG_PATH};
use drop_rig::controller::{CycleController, Narrator};
use drop_rig::error::{AppResult, RigError, EXIT_FAILURE, EXIT_OK};
use drop_rig::hardware::{GpioBackend, MockGpio, SignalBank};
use drop_rig::logging;
use drop_rig::run_log::RunLog;
use drop_rig::safety::{install_interrupt_handler, EmergencyStopFlag};
use drop_rig::session::{ConsoleNarrator, CountDecision, Prompter};

/// Reads between simulated limit switch hits (about 1 s at the default poll interval).
const SIMULATED_SWITCH_PERIOD: u32 = 4;

#[derive(Parser)]
#[command(name = "drop-rig", version)]
#[command(about = "Relay-driven drop/lift cycle tester", long_about = None)]
struct Cli {
    /// Configuration file (default: config/drop_rig.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use simulated GPIO lines instead of the GPIO chip
    #[arg(long)]
    simulate: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct RunArgs {
    /// Number of test cycles to run
    #[arg(allow_negative_numbers = true)]
    count: Option<i64>,

    /// Cycle termination policy
    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,

    /// Lift timeout in seconds (timed policy)
    #[arg(long)]
    lift_seconds: Option<f64>,

    /// Settle delay after each cycle in seconds
    #[arg(long)]
    drop_seconds: Option<f64>,

    /// Run log path
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print per-poll diagnostics
    #[arg(long)]
    debug: bool,

    /// Wait for Enter between cycles
    #[arg(long)]
    step: bool,

    /// Skip the start confirmation
    #[arg(long)]
    yes: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Sample the ADC and classify readings against the IR range window
    Adc {
        /// ADC channel (0-7)
        #[arg(long, allow_negative_numbers = true)]
        channel: Option<i32>,

        /// Number of samples
        #[arg(long, default_value = "1")]
        samples: u32,

        /// Delay between samples in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if let Err(e) = logging::init_from_config(&config) {
        eprintln!("Warning: {}", e);
    }

    match &cli.command {
        Some(Command::ShowConfig) => report(show_config(&config)),
        Some(Command::Adc {
            channel,
            samples,
            interval_ms,
        }) => report(sample_adc(
            &config,
            cli.simulate,
            channel.unwrap_or(config.ir_range.adc_channel),
            *samples,
            Duration::from_millis(*interval_ms),
        )),
        None => finish_session(run_session(&cli, &config)),
    }
}

/// Load layered configuration and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<RigConfig> {
    let path = match &cli.config {
        Some(path) if !path.exists() => bail!("Config file not found: {}", path.display()),
        Some(path) => path.clone(),
        None => PathBuf::from(DEFAULT_CONFIG_PATH),
    };

    let mut config = RigConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let run = &cli.run;
    if let Some(policy) = run.policy {
        config.rig.policy = policy;
    }
    if let Some(lift) = run.lift_seconds {
        config.rig.lift_seconds = lift;
    }
    if let Some(settle) = run.drop_seconds {
        config.rig.drop_seconds = settle;
    }
    if let Some(log_file) = &run.log_file {
        config.rig.log_file = log_file.clone();
    }
    config.rig.debug |= run.debug;
    config.rig.step_through |= run.step;

    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

fn report(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn finish_session(result: AppResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) if e.is_intentional_stop() => {
            info!(reason = %e, "Session ended without running");
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            error!(error = %e, "Session failed");
            eprintln!("ERROR: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run_session(cli: &Cli, config: &RigConfig) -> AppResult<()> {
    if !cli.simulate && !cfg!(feature = "gpio_cdev") {
        return Err(RigError::FeatureNotEnabled("gpio_cdev".to_string()));
    }

    let mut prompter = Prompter::stdio();
    prompter.say(
        "***** CLUTCH AND MOTOR RUNNING IN PARALLEL *****\n\
         Please verify 12V PSU and motor are plugged into \"Normally off\"",
    )?;

    let count = match prompter.resolve_cycle_count(
        cli.run.count,
        config.rig.default_cycles,
        config.rig.max_cycles,
    )? {
        CountDecision::Run(count) => count,
        CountDecision::DeclinedDefault => return Ok(()),
    };

    if cli.run.yes {
        info!("Start confirmation skipped");
    } else {
        prompter.confirm_start()?;
    }

    let run = config.run_configuration(i64::from(count))?;
    if run.debug() {
        prompter.say("*****DEBUG MODE ENABLED*****")?;
        prompter.say(&format!(
            "PINOUT:\n    LIMIT SWITCHES: {}, {}\n    RELAY OUTPUT:   {}\n    LOG FILE:       {}",
            config.signals.limit_switches[0],
            config.signals.limit_switches[1],
            config.signals.relay,
            config.rig.log_file.display()
        ))?;
    }

    // Opened before any line is claimed so a bad path leaves the rig untouched
    let log = RunLog::create(&config.rig.log_file)?;

    let stop = EmergencyStopFlag::new();
    install_interrupt_handler(&stop)?;

    prompter.say(&format!("RUNNING: {} TESTS......\n", count))?;
    let mut narrator = ConsoleNarrator::new(prompter);
    let mut controller =
        CycleController::new(run, config.signals.clone(), SystemClock::new()).with_stop_flag(stop);

    if cli.simulate {
        warn!("Running against simulated GPIO lines");
        let gpio = MockGpio::simulated_rig(
            config.signals.limit_switches[0],
            SIMULATED_SWITCH_PERIOD,
        );
        controller.run(gpio, log, &mut narrator)?;
    } else {
        run_on_chip(&mut controller, &config.gpio.chip, log, &mut narrator)?;
    }
    Ok(())
}

#[cfg(feature = "gpio_cdev")]
fn run_on_chip<N: Narrator>(
    controller: &mut CycleController<SystemClock>,
    chip: &Path,
    log: RunLog<BufWriter<File>>,
    narrator: &mut N,
) -> AppResult<()> {
    let gpio = drop_rig::hardware::CdevGpio::open(chip)?;
    controller.run(gpio, log, narrator).map(drop)
}

#[cfg(not(feature = "gpio_cdev"))]
fn run_on_chip<N: Narrator>(
    _controller: &mut CycleController<SystemClock>,
    _chip: &Path,
    _log: RunLog<BufWriter<File>>,
    _narrator: &mut N,
) -> AppResult<()> {
    Err(RigError::FeatureNotEnabled("gpio_cdev".to_string()))
}

fn show_config(config: &RigConfig) -> Result<()> {
    let rendered = config
        .to_toml()
        .context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

fn sample_adc(
    config: &RigConfig,
    simulate: bool,
    channel: i32,
    samples: u32,
    interval: Duration,
) -> Result<()> {
    if !(0..CHANNELS).contains(&channel) {
        bail!("ADC channel {} is outside 0..{}", channel, CHANNELS);
    }

    if simulate {
        sample_with(MockGpio::new(), config, channel, samples, interval)
    } else {
        sample_on_chip(config, channel, samples, interval)
    }
}

#[cfg(feature = "gpio_cdev")]
fn sample_on_chip(config: &RigConfig, channel: i32, samples: u32, interval: Duration) -> Result<()> {
    let gpio = drop_rig::hardware::CdevGpio::open(&config.gpio.chip)?;
    sample_with(gpio, config, channel, samples, interval)
}

#[cfg(not(feature = "gpio_cdev"))]
fn sample_on_chip(_config: &RigConfig, _channel: i32, _samples: u32, _interval: Duration) -> Result<()> {
    Err(RigError::FeatureNotEnabled("gpio_cdev".to_string()).into())
}

fn sample_with<B: GpioBackend>(
    backend: B,
    config: &RigConfig,
    channel: i32,
    samples: u32,
    interval: Duration,
) -> Result<()> {
    let lines = config.signals.adc;
    let mut bank = SignalBank::new(backend);
    bank.claim_all(&lines.signals())
        .context("Failed to claim ADC lines")?;

    {
        let mut sampler = AdcSampler::new(&mut bank, lines);
        for sample in 1..=samples {
            let value = sampler.read_channel(channel)?;
            if value == INVALID_CHANNEL {
                bail!("ADC rejected channel {}", channel);
            }
            println!(
                "{:>4}  channel {}: {:>4}  {:?}",
                sample,
                channel,
                value,
                config.ir_range.classify(value)
            );
            if sample < samples {
                std::thread::sleep(interval);
            }
        }
    }

    bank.shutdown().context("Failed to release ADC lines")?;
    Ok(())
}
