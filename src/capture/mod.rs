// SPDX-License-Identifier: PMPL-1.0-or-later

//! Crash-capture state machines
//!
//! Both variants run on the same substrate (debugger console plus emulator
//! console, with a one-way hand-off between them) and implement
//! [`CrashCapture`]. The caller picks one with [`for_mode`].
//!
//! Timeout policy shared by both: the first wait for evidence that the crash
//! happened at all is fatal; every later prompt wait is a warning and leaves
//! the affected field marked unavailable.

pub mod exchange;
pub mod kernel;
pub mod user;

use crate::config::TriageConfig;
use crate::console::consoles::Consoles;
use crate::error::TriageResult;
use crate::evidence::{CrashEvidence, RawCapture};
use crate::prompts::Prompts;
use crate::types::Mode;
use std::fmt::Debug;
use tracing::info;

pub use kernel::{KernelCapture, KernelState};
pub use user::{UserCapture, UserState};

/// Result of a capture run that did not fail fatally.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Evidence {
        evidence: CrashEvidence,
        raw: Vec<RawCapture>,
    },
    /// The user program finished without a crash report. Not an error.
    NoCrashDetected,
}

pub trait CrashCapture {
    fn mode(&self) -> Mode;

    /// Drive the target to the fault and collect evidence.
    fn capture(&self, consoles: &mut Consoles<'_>) -> TriageResult<CaptureOutcome>;
}

/// Build the state machine for `mode`.
pub fn for_mode<'a>(
    mode: Mode,
    config: &'a TriageConfig,
    prompts: &'a Prompts,
) -> TriageResult<Box<dyn CrashCapture + 'a>> {
    Ok(match mode {
        Mode::Kernel => Box::new(KernelCapture::new(config, prompts)?),
        Mode::User => Box::new(UserCapture::new(config, prompts)?),
    })
}

/// Logs every state transition of a capture run.
pub(crate) struct Progress<S> {
    mode: Mode,
    state: S,
}

impl<S: Copy + Debug> Progress<S> {
    pub(crate) fn new(mode: Mode, state: S) -> Self {
        info!(%mode, state = ?state, "capture started");
        Self { mode, state }
    }

    pub(crate) fn advance(&mut self, next: S) {
        info!(mode = %self.mode, from = ?self.state, to = ?next, "capture state");
        self.state = next;
    }
}
