// SPDX-License-Identifier: PMPL-1.0-or-later

//! Single protocol steps: fatal waits, tolerated waits and command/response pairs

use crate::console::pattern::Pattern;
use crate::console::stream::{StreamHandle, WaitOutcome};
use crate::error::{TriageError, TriageResult};
use crate::evidence::{Field, FieldLabel, RawCapture};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wait whose timeout aborts the session.
pub fn require(
    stream: &mut StreamHandle,
    patterns: &[Pattern],
    timeout: Duration,
    step: &str,
) -> TriageResult<(usize, String)> {
    match stream.await_any(patterns, timeout) {
        WaitOutcome::Matched { index, before } => Ok((index, before)),
        WaitOutcome::TimedOut { before } => Err(TriageError::CaptureTimeout {
            step: step.to_string(),
            before,
        }),
        WaitOutcome::Closed { before } => Err(closed(stream, step, before)),
    }
}

/// Wait whose timeout is only a warning. A closed stream is still fatal.
pub fn tolerate(
    stream: &mut StreamHandle,
    patterns: &[Pattern],
    timeout: Duration,
    step: &str,
) -> TriageResult<Option<(usize, String)>> {
    match stream.await_any(patterns, timeout) {
        WaitOutcome::Matched { index, before } => Ok(Some((index, before))),
        WaitOutcome::TimedOut { before } => {
            warn!(stream = %stream.label(), step, pending = before.len(), "soft timeout, continuing");
            Ok(None)
        }
        WaitOutcome::Closed { before } => Err(closed(stream, step, before)),
    }
}

/// Command/response exchanges on the debugger console, kept in step with the
/// commands that produced them.
///
/// The console echoes every typed line, so a genuine response starts with its
/// own command. A timed-out command leaves its output and a late prompt behind;
/// the console is then out of step until a sentinel has been echoed back, and
/// any response that does not open with its command is rejected.
pub struct Interrogator<'s> {
    stream: &'s mut StreamHandle,
    idle: &'s Pattern,
    timeout: Duration,
    syncs: u32,
    in_step: bool,
}

impl<'s> Interrogator<'s> {
    /// `in_step` is false when the previous wait on `stream` timed out.
    pub fn new(
        stream: &'s mut StreamHandle,
        idle: &'s Pattern,
        timeout: Duration,
        in_step: bool,
    ) -> Self {
        Self {
            stream,
            idle,
            timeout,
            syncs: 0,
            in_step,
        }
    }

    /// Send `command` and capture its response up to the next idle prompt.
    /// Anything not verifiably produced by `command` becomes an unavailable field.
    pub fn capture(&mut self, command: &str, label: FieldLabel) -> TriageResult<RawCapture> {
        if !self.in_step && !self.resync()? {
            return Ok(RawCapture::response(
                label,
                command,
                Field::unavailable(format!("debugger console out of step before `{}`", command)),
            ));
        }

        self.stream.send_line(command)?;
        let idle = std::slice::from_ref(self.idle);
        let field = match tolerate(self.stream, idle, self.timeout, command)? {
            Some((_, response)) if opens_with(&response, command) => {
                debug!(command, bytes = response.len(), "captured");
                Field::Captured(response)
            }
            Some(_) => {
                warn!(command, "response does not belong to the command");
                self.in_step = false;
                Field::unavailable(format!("response to `{}` did not start with its echo", command))
            }
            None => {
                self.in_step = false;
                Field::unavailable(format!("timed out waiting for the prompt after `{}`", command))
            }
        };
        Ok(RawCapture::response(label, command, field))
    }

    /// Send a command whose output is not evidence and wait for the prompt.
    pub fn quiet(&mut self, command: &str) -> TriageResult<bool> {
        if !self.in_step && !self.resync()? {
            return Ok(false);
        }
        self.in_step = run_quiet(self.stream, self.idle, command, self.timeout)?;
        Ok(self.in_step)
    }

    /// Echo a fresh sentinel and consume everything up to it and the prompt
    /// that follows it.
    pub fn resync(&mut self) -> TriageResult<bool> {
        self.syncs += 1;
        let token = format!("__sync_{}__", self.syncs);
        self.stream.send_line(&format!("echo {}\\n", token))?;

        // the echoed command line carries a literal `\n`, the output a real newline
        let marker = [
            Pattern::literal(format!("{}\r\n", token)),
            Pattern::literal(format!("{}\n", token)),
        ];
        if tolerate(self.stream, &marker, self.timeout, "console resync")?.is_none() {
            warn!(%token, "sentinel not echoed; console still out of step");
            return Ok(false);
        }
        self.in_step = tolerate(
            self.stream,
            std::slice::from_ref(self.idle),
            self.timeout,
            "prompt after resync",
        )?
        .is_some();
        if self.in_step {
            info!(%token, "debugger console back in step");
        }
        Ok(self.in_step)
    }
}

/// True when the first non-blank line of `response` is the echo of `command`.
pub fn opens_with(response: &str, command: &str) -> bool {
    response
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line == command.trim())
        .unwrap_or(false)
}

/// Send a command whose output is not evidence and wait for the prompt.
pub fn run_quiet(
    stream: &mut StreamHandle,
    idle: &Pattern,
    command: &str,
    timeout: Duration,
) -> TriageResult<bool> {
    stream.send_line(command)?;
    Ok(tolerate(stream, std::slice::from_ref(idle), timeout, command)?.is_some())
}

fn closed(stream: &StreamHandle, step: &str, before: String) -> TriageError {
    TriageError::StreamClosed {
        stream: stream.label().to_string(),
        step: step.to_string(),
        before,
    }
}
