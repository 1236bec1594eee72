//! Operator dialogue around a test session.
//!
//! Everything here is line-oriented console I/O over generic `BufRead`/`Write` handles:
//! - choosing the cycle count (explicit argument, or accepting the configured default)
//! - the start confirmation that gates energizing the relay
//! - [`ConsoleNarrator`], the countdown and per-test progress printed during a run
//!
//! Yes/no questions re-prompt until they get `y`, `yes`, `n` or `no` (any case). End of
//! input counts as an abort so a closed stdin never starts the rig.

use std::io::{self, BufRead, Stdin, StdinLock, Stdout, Write};
use tracing::{info, warn};

use crate::controller::{validate_cycle_count, CycleReport, Narrator, TriggerCause};
use crate::error::{AppResult, RigError};

/// Outcome of choosing how many cycles to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountDecision {
    /// Run this many cycles (already validated)
    Run(u32),
    /// The operator declined the default and has to pass a count explicitly
    DeclinedDefault,
}

/// Line-oriented yes/no dialogue with the operator.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<StdinLock<'static>, Stdout> {
    /// Prompter on the process's stdin and stdout.
    pub fn stdio() -> Self {
        let stdin: Stdin = io::stdin();
        Self::new(stdin.lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    /// Prompter over arbitrary handles.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Write one line to the operator.
    pub fn say(&mut self, line: &str) -> AppResult<()> {
        writeln!(self.output, "{}", line)?;
        self.output.flush()?;
        Ok(())
    }

    fn read_answer(&mut self, prompt: &str) -> AppResult<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_lowercase()))
    }

    /// Ask a yes/no question, re-prompting with `retry` until the answer is recognized.
    ///
    /// End of input is reported as `OperatorAbort`.
    pub fn ask_yes_no(&mut self, question: &str, retry: &str) -> AppResult<bool> {
        let mut prompt = question;
        loop {
            let answer = match self.read_answer(prompt)? {
                Some(answer) => answer,
                None => {
                    writeln!(self.output)?;
                    warn!("Input closed while waiting for an answer");
                    return Err(RigError::OperatorAbort);
                }
            };
            match answer.as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => prompt = retry,
            }
        }
    }

    /// Decide the cycle count from the optional command-line argument.
    ///
    /// Without an argument the operator is offered `default_cycles`. Declining prints
    /// usage guidance. The chosen count is validated against `1..=max_cycles`.
    pub fn resolve_cycle_count(
        &mut self,
        requested: Option<i64>,
        default_cycles: u32,
        max_cycles: u32,
    ) -> AppResult<CountDecision> {
        let count = match requested {
            Some(count) => count,
            None => {
                let question = format!(
                    "UNSPECIFIED INPUT: Would you like to run base number of tests (y/n) [{}]?: ",
                    default_cycles
                );
                let retry = format!(
                    "IMPROPER INPUT: Would you like to run base number of tests (y/n) [{}]?: ",
                    default_cycles
                );
                if !self.ask_yes_no(&question, &retry)? {
                    self.say(&format!(
                        "Please specify number of iterations (max: {}):\n    \"drop-rig <iterations>\"\n",
                        max_cycles
                    ))?;
                    return Ok(CountDecision::DeclinedDefault);
                }
                i64::from(default_cycles)
            }
        };

        self.say(&format!("NUMBER TESTS: {}", count))?;
        match validate_cycle_count(count, max_cycles) {
            Ok(count) => Ok(CountDecision::Run(count)),
            Err(e) => {
                self.say(&format!(
                    "ERROR: Invalid number of tests. Max tests: {}\n",
                    max_cycles
                ))?;
                Err(e)
            }
        }
    }

    /// Final go/no-go before the relay is energized.
    pub fn confirm_start(&mut self) -> AppResult<()> {
        if self.ask_yes_no(
            "ENTER \"y\" TO CONTINUE, \"n\" TO ABORT: ",
            "Please enter \"y\" or \"n\": ",
        )? {
            info!("Operator confirmed start");
            Ok(())
        } else {
            self.say("ABORTING\n")?;
            Err(RigError::OperatorAbort)
        }
    }

    /// Block until the operator presses Enter.
    pub fn wait_for_enter(&mut self) -> AppResult<()> {
        match self.read_answer("PRESS \"enter\" TO CONTINUE")? {
            Some(_) => Ok(()),
            None => Err(RigError::OperatorAbort),
        }
    }
}

/// Console progress in the rig's traditional wording.
pub struct ConsoleNarrator<R, W> {
    prompter: Prompter<R, W>,
    counting_down: bool,
}

impl<R: BufRead, W: Write> ConsoleNarrator<R, W> {
    /// Narrate through `prompter`, which also serves step-through pauses.
    pub fn new(prompter: Prompter<R, W>) -> Self {
        Self {
            prompter,
            counting_down: false,
        }
    }

    /// Hand the prompter back.
    pub fn into_inner(self) -> Prompter<R, W> {
        self.prompter
    }

    // Progress output never stops the rig
    fn line(&mut self, text: &str) {
        if let Err(e) = self.prompter.say(text) {
            warn!(error = %e, "Console write failed");
        }
    }
}

impl<R: BufRead, W: Write> Narrator for ConsoleNarrator<R, W> {
    fn countdown(&mut self, remaining: u32) {
        let text = format!("{}...", remaining);
        // First step carries the heading, later ones are indented under it
        if !self.counting_down {
            self.counting_down = true;
            self.line(&format!("Initiating motor in: {}", text));
        } else {
            self.line(&format!("{:>width$}", text, width = 25 + text.len()));
        }
    }

    fn cycle_started(&mut self, cycle: u32, total: u32) {
        self.counting_down = false;
        self.line(&format!("TEST {}/{}...", cycle, total));
        self.line("     Engaging clutch and motor");
    }

    fn cycle_finished(&mut self, _cycle: u32, _total: u32, cause: TriggerCause) {
        self.line(&format!("     Disengaging clutch and motor ({})\n", cause));
    }

    fn await_continue(&mut self) -> AppResult<()> {
        self.prompter.wait_for_enter()
    }

    fn completed(&mut self, report: &CycleReport) {
        self.line("TESTING COMPLETED. CLEANING UP...");
        self.line(&format!(
            "     {} tests: {} limit switch, {} lift timeout",
            report.completed(),
            report.switch_hits(),
            report.timeouts()
        ));
        self.line("     Cleanup complete. Closing program.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn prompter(input: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn transcript<R>(prompter: Prompter<R, Vec<u8>>) -> String {
        String::from_utf8(prompter.output).unwrap()
    }

    #[test]
    fn reprompts_until_recognized_answer() {
        let mut p = prompter("maybe\n\nYES\n");
        assert!(p.ask_yes_no("Q? ", "Again? ").unwrap());

        let out = transcript(p);
        assert_eq!(out.matches("Q? ").count(), 1);
        assert_eq!(out.matches("Again? ").count(), 2);
    }

    #[test]
    fn end_of_input_aborts() {
        let mut p = prompter("what\n");
        assert!(matches!(
            p.ask_yes_no("Q? ", "Again? "),
            Err(RigError::OperatorAbort)
        ));
    }

    #[test]
    fn explicit_count_skips_default_prompt() {
        let mut p = prompter("");
        assert_eq!(
            p.resolve_cycle_count(Some(25), 10, 500).unwrap(),
            CountDecision::Run(25)
        );
        let out = transcript(p);
        assert!(!out.contains("UNSPECIFIED INPUT"));
        assert!(out.contains("NUMBER TESTS: 25"));
    }

    #[test]
    fn accepting_default_count() {
        let mut p = prompter("y\n");
        assert_eq!(
            p.resolve_cycle_count(None, 10, 500).unwrap(),
            CountDecision::Run(10)
        );
        assert!(transcript(p).contains("(y/n) [10]?"));
    }

    #[test]
    fn declining_default_prints_usage() {
        let mut p = prompter("nope\nn\n");
        assert_eq!(
            p.resolve_cycle_count(None, 10, 500).unwrap(),
            CountDecision::DeclinedDefault
        );
        let out = transcript(p);
        assert!(out.contains("IMPROPER INPUT"));
        assert!(out.contains("max: 500"));
    }

    #[test]
    fn invalid_count_is_reported() {
        let mut p = prompter("");
        assert!(matches!(
            p.resolve_cycle_count(Some(501), 10, 500),
            Err(RigError::InvalidCycleCount { requested: 501, max: 500 })
        ));
        assert!(transcript(p).contains("ERROR: Invalid number of tests. Max tests: 500"));

        let mut p = prompter("");
        assert!(p.resolve_cycle_count(Some(-4), 10, 500).is_err());
    }

    #[test]
    fn start_confirmation() {
        let mut p = prompter("x\ny\n");
        assert!(p.confirm_start().is_ok());
        assert!(transcript(p).contains("Please enter \"y\" or \"n\": "));

        let mut p = prompter("no\n");
        assert!(matches!(p.confirm_start(), Err(RigError::OperatorAbort)));
        assert!(transcript(p).contains("ABORTING"));
    }

    #[test]
    fn narrates_countdown_and_cycles() {
        let mut narrator = ConsoleNarrator::new(prompter(""));
        for remaining in (1..=3).rev() {
            narrator.countdown(remaining);
        }
        narrator.cycle_started(1, 2);
        narrator.cycle_finished(1, 2, TriggerCause::LimitSwitch(0));
        narrator.completed(&CycleReport {
            cycles: Vec::new(),
            started_at: chrono::Local::now(),
            elapsed: Duration::ZERO,
        });

        let out = transcript(narrator.into_inner());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Initiating motor in: 3...");
        assert_eq!(lines[1].trim(), "2...");
        assert!(lines[1].starts_with("                         "));
        assert_eq!(lines[3], "TEST 1/2...");
        assert_eq!(lines[4], "     Engaging clutch and motor");
        assert!(lines[5].starts_with("     Disengaging clutch and motor"));
        assert!(out.contains("TESTING COMPLETED. CLEANING UP..."));
    }

    #[test]
    fn step_through_waits_for_enter() {
        let mut narrator = ConsoleNarrator::new(prompter("\n"));
        assert!(narrator.await_continue().is_ok());
        assert!(matches!(
            narrator.await_continue(),
            Err(RigError::OperatorAbort)
        ));
    }
}
