// SPDX-License-Identifier: PMPL-1.0-or-later

//! Session orchestrator
//!
//! A session launches the emulator and the debugger, attaches one to the
//! other, runs the mode's capture state machine, submits the evidence for
//! analysis and hands the report to the sink. Both subprocesses belong to the
//! session and are shut down exactly once on every exit path: after `run`
//! returns, or from `Drop` when a step panics.

use crate::analysis::Analyzer;
use crate::capture::{self, CaptureOutcome};
use crate::config::RuntimeConfig;
use crate::console::consoles::Consoles;
use crate::console::stream::StreamHandle;
use crate::error::{TriageError, TriageResult};
use crate::evidence::{CrashEvidence, RawCapture};
use crate::handshake;
use crate::prompts::Prompts;
use crate::sink::ResultSink;
use crate::supervisor::{terminate, GracefulQuit, Launcher, Termination};
use crate::types::{AnalysisReport, Mode, SessionStatus};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Lines of each stream kept for post-mortem output.
const POSTMORTEM_LINES: usize = 40;

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Analyzed {
        evidence: CrashEvidence,
        report: AnalysisReport,
        artifacts: Vec<PathBuf>,
        /// Set when the sink could not write its artifacts.
        sink_error: Option<String>,
    },
    NoCrashDetected,
}

/// Last raw text seen on each stream before a fatal error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Postmortem {
    pub debugger_tail: String,
    pub emulator_tail: String,
}

#[derive(Debug, Error)]
#[error("session failed: {error}")]
pub struct SessionFailure {
    #[source]
    pub error: TriageError,
    pub postmortem: Postmortem,
}

pub struct Session<'r> {
    runtime: &'r RuntimeConfig,
    mode: Mode,
    status: SessionStatus,
    debugger: Option<StreamHandle>,
    emulator: Option<StreamHandle>,
    captures: Vec<RawCapture>,
    terminations: Vec<(String, Termination)>,
}

impl<'r> Session<'r> {
    pub fn new(runtime: &'r RuntimeConfig, mode: Mode) -> Self {
        Self {
            runtime,
            mode,
            status: SessionStatus::Running,
            debugger: None,
            emulator: None,
            captures: Vec::new(),
            terminations: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Raw captures accumulated by the state machine.
    pub fn captures(&self) -> &[RawCapture] {
        &self.captures
    }

    /// How each subprocess was shut down, in teardown order.
    pub fn terminations(&self) -> &[(String, Termination)] {
        &self.terminations
    }

    /// Run the whole session. Teardown has completed by the time this returns.
    pub fn run(
        &mut self,
        launcher: &mut dyn Launcher,
        analyzer: &dyn Analyzer,
        sink: &mut dyn ResultSink,
    ) -> Result<SessionOutcome, SessionFailure> {
        info!(mode = %self.mode, "session started");
        let result = self.drive(launcher, analyzer, sink).map_err(|error| {
            warn!(%error, "session aborted");
            SessionFailure {
                postmortem: self.postmortem(),
                error,
            }
        });
        self.teardown();

        self.status = match result {
            Ok(_) => SessionStatus::Succeeded,
            Err(_) => SessionStatus::Failed,
        };
        info!(mode = %self.mode, status = ?self.status, "session finished");
        result
    }

    fn drive(
        &mut self,
        launcher: &mut dyn Launcher,
        analyzer: &dyn Analyzer,
        sink: &mut dyn ResultSink,
    ) -> TriageResult<SessionOutcome> {
        let runtime = self.runtime;
        let config = &runtime.config;
        let prompts = Prompts::from_config(config)?;
        let capture = capture::for_mode(self.mode, config, &prompts)?;

        let emulator = self.emulator.insert(launcher.launch_emulator()?);
        launcher.settle();
        let debugger = self.debugger.insert(launcher.launch_debugger()?);

        handshake::establish(
            debugger,
            emulator,
            config.debugger.port,
            &prompts,
            &config.timeouts,
        )?;

        let mut consoles = Consoles::new(debugger, emulator);
        let (evidence, raw) = match capture.capture(&mut consoles)? {
            CaptureOutcome::Evidence { evidence, raw } => (evidence, raw),
            CaptureOutcome::NoCrashDetected => return Ok(SessionOutcome::NoCrashDetected),
        };
        self.captures = raw;
        info!(fingerprint = %evidence.fingerprint(), fields = evidence.fields.len(), "evidence assembled");

        let report = analyzer.analyze(&evidence);
        if let AnalysisReport::Error { error } = &report {
            warn!(%error, "analysis unavailable");
        }

        let (artifacts, sink_error) = match sink.persist(&evidence, &report) {
            Ok(paths) => (paths, None),
            Err(err) => {
                warn!(error = %format!("{:#}", err), "result sink failed");
                (Vec::new(), Some(format!("{:#}", err)))
            }
        };

        Ok(SessionOutcome::Analyzed {
            evidence,
            report,
            artifacts,
            sink_error,
        })
    }

    fn postmortem(&mut self) -> Postmortem {
        let tail_of = |handle: &mut Option<StreamHandle>| match handle {
            Some(stream) => {
                stream.drain_ready();
                tail_lines(&stream.recent_text(), POSTMORTEM_LINES)
            }
            None => String::new(),
        };
        Postmortem {
            debugger_tail: tail_of(&mut self.debugger),
            emulator_tail: tail_of(&mut self.emulator),
        }
    }

    /// Shut down whatever is still running: the debugger gracefully if it
    /// can, then the emulator by force. Safe to call more than once.
    pub fn teardown(&mut self) {
        if let Some(debugger) = self.debugger.take() {
            let quit = GracefulQuit::for_debugger(&self.runtime.config);
            let how = terminate(debugger, Some(&quit));
            self.terminations.push(("debugger".to_string(), how));
        }
        if let Some(emulator) = self.emulator.take() {
            let how = terminate(emulator, None);
            self.terminations.push(("emulator".to_string(), how));
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.debugger.is_some() || self.emulator.is_some() {
            warn!("session dropped with live subprocesses; tearing down");
            self.teardown();
        }
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
