// SPDX-License-Identifier: PMPL-1.0-or-later

//! Blocking pattern reader over one subprocess console
//!
//! Output is pumped from the subprocess by a background thread into a channel.
//! `await_any` consumes that output until one of an ordered list of patterns
//! appears, the budget expires, or the subprocess goes away. The reader never
//! retries a timed-out wait on its own: the caller decides what a timeout means
//! at each protocol step.

use crate::console::pattern::{earliest_match, Pattern};
use crate::error::{TriageError, TriageResult};
use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Lifecycle operations on the process behind a stream.
pub trait ProcessControl: Send {
    fn is_alive(&mut self) -> bool;

    /// Forced termination.
    fn kill(&mut self) -> io::Result<()>;

    fn pid(&self) -> Option<u32> {
        None
    }

    /// Poll until the process exits or `within` elapses. Returns true if it exited.
    fn wait_exit(&mut self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Result of one `await_any` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Pattern `index` matched; `before` is everything that preceded it.
    Matched { index: usize, before: String },
    /// Nothing matched within the budget. The text stays unconsumed.
    TimedOut { before: String },
    /// The subprocess side of the stream is gone.
    Closed { before: String },
}

impl WaitOutcome {
    pub fn before(&self) -> &str {
        match self {
            WaitOutcome::Matched { before, .. }
            | WaitOutcome::TimedOut { before }
            | WaitOutcome::Closed { before } => before,
        }
    }

    pub fn matched(&self) -> Option<usize> {
        match self {
            WaitOutcome::Matched { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Interaction channel with a single subprocess.
pub struct StreamHandle {
    label: String,
    incoming: Receiver<Vec<u8>>,
    writer: Box<dyn Write + Send>,
    process: Box<dyn ProcessControl>,
    pending: String,
    carry: Vec<u8>,
    before: String,
    last_match: Option<usize>,
    closed: bool,
}

impl StreamHandle {
    pub fn new(
        label: impl Into<String>,
        incoming: Receiver<Vec<u8>>,
        writer: Box<dyn Write + Send>,
        process: Box<dyn ProcessControl>,
    ) -> Self {
        Self {
            label: label.into(),
            incoming,
            writer,
            process,
            pending: String::new(),
            carry: Vec::new(),
            before: String::new(),
            last_match: None,
            closed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Text preceding the most recent match, or whatever arrived before a
    /// timeout or close.
    pub fn last_before(&self) -> &str {
        &self.before
    }

    pub fn last_match(&self) -> Option<usize> {
        self.last_match
    }

    /// Output received but not yet consumed by a match.
    pub fn unconsumed(&self) -> &str {
        &self.pending
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Pull in output that has already arrived, without waiting.
    pub fn drain_ready(&mut self) {
        while let Ok(chunk) = self.incoming.try_recv() {
            self.absorb(&chunk);
        }
    }

    /// Most recent raw text seen on this stream, for post-mortem output.
    pub fn recent_text(&self) -> String {
        match self.last_match {
            Some(_) => format!("{}{}", self.before, self.pending),
            None if self.pending.is_empty() => self.before.clone(),
            None => self.pending.clone(),
        }
    }

    pub fn process_mut(&mut self) -> &mut dyn ProcessControl {
        self.process.as_mut()
    }

    /// Consume output until the earliest match of any pattern.
    pub fn await_any(&mut self, patterns: &[Pattern], timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = earliest_match(patterns, &self.pending) {
                let before = self.pending[..found.start].to_string();
                self.pending.drain(..found.end);
                self.before = before.clone();
                self.last_match = Some(found.index);
                trace!(stream = %self.label, index = found.index, "pattern matched");
                return WaitOutcome::Matched {
                    index: found.index,
                    before,
                };
            }

            if self.closed {
                let before = std::mem::take(&mut self.pending);
                self.before = before.clone();
                self.last_match = None;
                return WaitOutcome::Closed { before };
            }

            let now = Instant::now();
            if now >= deadline {
                self.before = self.pending.clone();
                self.last_match = None;
                debug!(stream = %self.label, ?patterns, "wait timed out");
                return WaitOutcome::TimedOut {
                    before: self.before.clone(),
                };
            }

            match self.incoming.recv_timeout(deadline - now) {
                Ok(chunk) => self.absorb(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if !self.carry.is_empty() {
                        let tail = std::mem::take(&mut self.carry);
                        self.pending.push_str(&String::from_utf8_lossy(&tail));
                    }
                    self.closed = true;
                }
            }
        }
    }

    /// Write `text` followed by a line terminator.
    pub fn send_line(&mut self, text: &str) -> TriageResult<()> {
        trace!(stream = %self.label, line = text, "send");
        self.write_raw(format!("{}\n", text).as_bytes())
    }

    /// Send a control character out of band, e.g. `'c'` for an interrupt.
    pub fn send_control(&mut self, key: char) -> TriageResult<()> {
        let byte = (key.to_ascii_lowercase() as u8) & 0x1f;
        self.write_raw(&[byte])
    }

    fn write_raw(&mut self, bytes: &[u8]) -> TriageResult<()> {
        self.writer
            .write_all(bytes)
            .and_then(|_| self.writer.flush())
            .map_err(|source| TriageError::Io {
                stream: self.label.clone(),
                source,
            })
    }

    fn absorb(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    self.pending.push_str(text);
                    self.carry.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // from_utf8 already validated this prefix
                    self.pending
                        .push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            self.pending.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + len);
                        }
                        None => {
                            self.carry.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Shared handle on a side log receiving a copy of everything a stream produces.
pub type SideLog = Arc<Mutex<File>>;

/// Copy everything from `reader` into `tx` (and the side log) until EOF or error.
pub fn spawn_pump(
    label: String,
    mut reader: Box<dyn Read + Send>,
    tx: Sender<Vec<u8>>,
    log: Option<SideLog>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(log) = &log {
                        if let Ok(mut file) = log.lock() {
                            let _ = file.write_all(&buf[..n]);
                        }
                    }
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        trace!(stream = %label, "pump finished");
    })
}
