// SPDX-License-Identifier: PMPL-1.0-or-later

//! User-process fault capture
//!
//! The guest kernel prints a delimited crash report when a user program
//! faults. The report is read from the emulator console, then the debugger is
//! interrupted, switched to the program's own symbol table and asked about the
//! faulting instruction. A clean program exit is a normal outcome.

use crate::capture::exchange::{require, tolerate, Interrogator};
use crate::capture::{CaptureOutcome, CrashCapture, Progress};
use crate::config::{TimeoutConfig, TriageConfig, UserScenario};
use crate::console::consoles::Consoles;
use crate::console::pattern::Pattern;
use crate::console::stream::{StreamHandle, WaitOutcome};
use crate::error::{TriageError, TriageResult};
use crate::evidence::{assemble, Field, FieldLabel, RawCapture};
use crate::prompts::Prompts;
use crate::types::Mode;
use regex::Regex;
use std::thread;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Running,
    CrashReportDetected,
    SymbolsLoaded,
    SourceCaptured,
    Done,
    NoCrashDetected,
}

/// Confirmation questions answered while switching symbol files.
pub const MAX_CONFIRMATIONS: usize = 2;

pub struct UserCapture<'a> {
    scenario: &'a UserScenario,
    timeouts: &'a TimeoutConfig,
    prompts: &'a Prompts,
    address: Regex,
}

impl<'a> UserCapture<'a> {
    pub fn new(config: &'a TriageConfig, prompts: &'a Prompts) -> TriageResult<Self> {
        let address = Regex::new(&config.user.address_pattern).map_err(|e| {
            TriageError::Configuration(format!("invalid address pattern: {}", e))
        })?;
        Ok(Self {
            scenario: &config.user,
            timeouts: &config.timeouts,
            prompts,
            address,
        })
    }

    /// Faulting instruction address from a crash report, always `0x`-prefixed.
    pub fn extract_fault_address(&self, report: &str) -> Option<String> {
        let caps = self.address.captures(report)?;
        let raw = caps.get(1).or_else(|| caps.get(0))?.as_str().trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with("0x") || raw.starts_with("0X") {
            Some(format!("0x{}", &raw[2..]))
        } else {
            Some(format!("0x{}", raw))
        }
    }

    /// Switch to the program's symbol table, answering up to two confirmations.
    fn load_symbols(&self, debugger: &mut StreamHandle) -> TriageResult<bool> {
        let command = format!("file {}", self.scenario.symbol_file);
        debugger.send_line(&command)?;

        let mut waits: Vec<Pattern> = self.prompts.confirm.clone();
        waits.push(self.prompts.idle.clone());
        let idle_index = waits.len() - 1;

        let mut answered = 0;
        while answered < MAX_CONFIRMATIONS {
            match tolerate(debugger, &waits, self.timeouts.command(), "symbol file switch")? {
                Some((index, _)) if index == idle_index => return Ok(true),
                Some((index, _)) => {
                    info!(question = index, "confirming symbol file switch");
                    debugger.send_line("y")?;
                    answered += 1;
                }
                None => return Ok(false),
            }
        }

        Ok(tolerate(
            debugger,
            std::slice::from_ref(&self.prompts.idle),
            self.timeouts.command(),
            "prompt after symbol reload",
        )?
        .is_some())
    }
}

impl CrashCapture for UserCapture<'_> {
    fn mode(&self) -> Mode {
        Mode::User
    }

    fn capture(&self, consoles: &mut Consoles<'_>) -> TriageResult<CaptureOutcome> {
        let idle = &self.prompts.idle;
        let t = self.timeouts;
        let mut progress = Progress::new(Mode::User, UserState::Running);

        consoles.debugger().send_line("c")?;
        tolerate(
            consoles.debugger(),
            std::slice::from_ref(&self.prompts.continuing),
            t.prompt(),
            "continue acknowledgement",
        )?;

        let emulator = consoles.emulator("guest shell prompt")?;
        require(
            emulator,
            std::slice::from_ref(&self.prompts.shell),
            t.boot(),
            "guest shell prompt",
        )?;
        info!("guest shell is ready");
        thread::sleep(t.trigger_settle());

        let emulator = consoles.emulator("program launch")?;
        emulator.send_line(&self.scenario.program)?;

        let begin = std::slice::from_ref(&self.prompts.report_begin);
        match emulator.await_any(begin, t.crash_report()) {
            WaitOutcome::Matched { .. } => {}
            WaitOutcome::TimedOut { .. } => {
                progress.advance(UserState::NoCrashDetected);
                info!(program = %self.scenario.program, "no crash report; program exited cleanly");
                return Ok(CaptureOutcome::NoCrashDetected);
            }
            WaitOutcome::Closed { before } => {
                return Err(TriageError::StreamClosed {
                    stream: emulator.label().to_string(),
                    step: "crash report detection".to_string(),
                    before,
                });
            }
        }
        progress.advance(UserState::CrashReportDetected);

        let block = match tolerate(
            emulator,
            std::slice::from_ref(&self.prompts.report_end),
            t.crash_report(),
            "end-of-report marker",
        )? {
            Some((_, body)) => Field::Captured(format!(
                "{}{}{}",
                self.scenario.report_begin, body, self.scenario.report_end
            )),
            None => Field::unavailable("end-of-report marker not seen"),
        };

        // The target stays unhalted, so the break has to go out of band.
        consoles.hand_off();
        let debugger = consoles.debugger();
        debugger.send_control('c')?;
        tolerate(debugger, std::slice::from_ref(idle), t.interrupt(), "prompt after interrupt")?;

        let address = block.text().and_then(|text| self.extract_fault_address(text));
        let mut raw = vec![RawCapture::direct(FieldLabel::CrashReportBlock, block)];

        let Some(address) = address else {
            warn!("fault address not recoverable; submitting the crash report only");
            for label in [
                FieldLabel::FaultingAddress,
                FieldLabel::SourceAtFault,
                FieldLabel::SymbolAtFault,
                FieldLabel::DisassemblyAtFault,
            ] {
                raw.push(RawCapture::direct(
                    label,
                    Field::unavailable("fault address not recoverable"),
                ));
            }
            progress.advance(UserState::Done);
            return Ok(CaptureOutcome::Evidence {
                evidence: assemble(Mode::User, &raw),
                raw,
            });
        };
        info!(%address, "fault address extracted");
        raw.push(RawCapture::direct(
            FieldLabel::FaultingAddress,
            Field::Captured(address.clone()),
        ));

        let loaded = self.load_symbols(debugger)?;
        if !loaded {
            warn!(file = %self.scenario.symbol_file, "symbol switch did not return to the prompt");
        }
        progress.advance(UserState::SymbolsLoaded);

        let mut gdb = Interrogator::new(debugger, idle, t.command(), loaded);
        raw.push(gdb.capture(&format!("list *{}", address), FieldLabel::SourceAtFault)?);
        raw.push(gdb.capture(&format!("disassemble {}", address), FieldLabel::DisassemblyAtFault)?);
        raw.push(gdb.capture(&format!("info symbol {}", address), FieldLabel::SymbolAtFault)?);
        progress.advance(UserState::SourceCaptured);
        progress.advance(UserState::Done);

        Ok(CaptureOutcome::Evidence {
            evidence: assemble(Mode::User, &raw),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_capture(check: impl FnOnce(&UserCapture<'_>)) {
        let config = TriageConfig::default();
        let prompts = Prompts::from_config(&config).unwrap();
        let capture = UserCapture::new(&config, &prompts).unwrap();
        check(&capture);
    }

    #[test]
    fn test_address_prefix_normalised() {
        with_capture(|capture| {
            assert_eq!(
                capture.extract_fault_address("trap 0 err 0\nRIP: 0x1a2b\n").as_deref(),
                Some("0x1a2b")
            );
            assert_eq!(
                capture.extract_fault_address("RIP:  1a2b").as_deref(),
                Some("0x1a2b")
            );
            assert_eq!(capture.extract_fault_address("no address here"), None);
        });
    }
}
