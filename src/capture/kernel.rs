// SPDX-License-Identifier: PMPL-1.0-or-later

//! Kernel-trap capture
//!
//! Arms a breakpoint at the fault-entry location, boots the guest, provokes the
//! trap from the guest shell and then interrogates the halted target. The
//! caller's return address is recovered from the one-level-up frame info and
//! used for symbol, source and disassembly lookups.

use crate::capture::exchange::{require, run_quiet, tolerate, Interrogator};
use crate::capture::{CaptureOutcome, CrashCapture, Progress};
use crate::config::{KernelScenario, TimeoutConfig, TriageConfig};
use crate::console::consoles::Consoles;
use crate::error::{TriageError, TriageResult};
use crate::evidence::{assemble, Field, FieldLabel, RawCapture};
use crate::prompts::Prompts;
use crate::types::Mode;
use regex::Regex;
use std::thread;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    BreakpointArmed,
    Running,
    FaultHit,
    BacktraceCaptured,
    RegistersCaptured,
    CallSiteCaptured,
    Done,
}

const ADDRESS_UNRECOVERABLE: &str = "address not recoverable";

pub struct KernelCapture<'a> {
    scenario: &'a KernelScenario,
    timeouts: &'a TimeoutConfig,
    prompts: &'a Prompts,
    saved_rip: Regex,
}

impl<'a> KernelCapture<'a> {
    pub fn new(config: &'a TriageConfig, prompts: &'a Prompts) -> TriageResult<Self> {
        let saved_rip = Regex::new(r"saved rip = (0x[0-9a-fA-F]+)")
            .map_err(|e| TriageError::Configuration(e.to_string()))?;
        Ok(Self {
            scenario: &config.kernel,
            timeouts: &config.timeouts,
            prompts,
            saved_rip,
        })
    }

    /// Caller return address from `info frame` output.
    pub fn extract_saved_rip(&self, frame_info: &str) -> Option<String> {
        self.saved_rip
            .captures(frame_info)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl CrashCapture for KernelCapture<'_> {
    fn mode(&self) -> Mode {
        Mode::Kernel
    }

    fn capture(&self, consoles: &mut Consoles<'_>) -> TriageResult<CaptureOutcome> {
        let idle = &self.prompts.idle;
        let t = self.timeouts;

        let arm = format!("break {}", self.scenario.breakpoint);
        if !run_quiet(consoles.debugger(), idle, &arm, t.prompt())? {
            warn!(location = %self.scenario.breakpoint, "no prompt after arming breakpoint");
        }
        let mut progress = Progress::new(Mode::Kernel, KernelState::BreakpointArmed);

        consoles.debugger().send_line("c")?;
        tolerate(
            consoles.debugger(),
            std::slice::from_ref(&self.prompts.continuing),
            t.prompt(),
            "continue acknowledgement",
        )?;
        progress.advance(KernelState::Running);

        let emulator = consoles.emulator("guest shell prompt")?;
        require(
            emulator,
            std::slice::from_ref(&self.prompts.shell),
            t.boot(),
            "guest shell prompt",
        )?;
        info!("guest shell is ready");
        thread::sleep(t.trigger_settle());

        consoles
            .emulator("fault trigger")?
            .send_line(&self.scenario.trigger_command)?;
        // The debugger halts the target from here on.
        consoles.hand_off();
        thread::sleep(t.trigger_settle());

        require(
            consoles.debugger(),
            &self.prompts.breakpoint_hit,
            t.fault(),
            "breakpoint notification",
        )?;
        progress.advance(KernelState::FaultHit);
        let settled = tolerate(
            consoles.debugger(),
            std::slice::from_ref(idle),
            t.prompt(),
            "prompt after breakpoint",
        )?
        .is_some();

        let mut raw = Vec::new();
        let mut gdb = Interrogator::new(consoles.debugger(), idle, t.command(), settled);

        raw.push(gdb.capture("bt", FieldLabel::Backtrace)?);
        progress.advance(KernelState::BacktraceCaptured);

        raw.push(gdb.capture("info registers", FieldLabel::Registers)?);
        progress.advance(KernelState::RegistersCaptured);

        raw.push(gdb.capture("x/1xg $rsp", FieldLabel::StackDump)?);

        let frame = gdb.capture("info frame 1", FieldLabel::SavedReturnInfo)?;
        let saved_rip = frame.field.text().and_then(|text| self.extract_saved_rip(text));
        raw.push(frame);

        match saved_rip {
            Some(address) => {
                info!(%address, "caller return address recovered");
                raw.push(gdb.capture(&format!("info symbol {}", address), FieldLabel::CallerSymbol)?);
                raw.push(gdb.capture(&format!("list *{}", address), FieldLabel::SourceAtCallSite)?);
                raw.push(gdb.capture(
                    &format!("disassemble {}", address),
                    FieldLabel::CallerDisassembly,
                )?);
            }
            None => {
                warn!("saved return address not found in frame info");
                for label in [
                    FieldLabel::CallerSymbol,
                    FieldLabel::SourceAtCallSite,
                    FieldLabel::CallerDisassembly,
                ] {
                    raw.push(RawCapture::direct(label, Field::unavailable(ADDRESS_UNRECOVERABLE)));
                }
            }
        }
        progress.advance(KernelState::CallSiteCaptured);

        gdb.quiet("frame 0")?;
        progress.advance(KernelState::Done);

        Ok(CaptureOutcome::Evidence {
            evidence: assemble(Mode::Kernel, &raw),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_saved_rip() {
        let config = TriageConfig::default();
        let prompts = Prompts::from_config(&config).unwrap();
        let capture = KernelCapture::new(&config, &prompts).unwrap();
        let info = "Stack frame at 0xffffffff80119f98:\n rip = 0x0; saved rip = 0xffffffff80104a3e\n caller of frame at 0xffffffff80119f88";
        assert_eq!(
            capture.extract_saved_rip(info).as_deref(),
            Some("0xffffffff80104a3e")
        );
        assert_eq!(capture.extract_saved_rip("No frame at level 1."), None);
    }
}
