// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error taxonomy for a triage session

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriageError {
    /// Missing credential or an unreadable/invalid configuration file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The debugger could not attach to the emulator's control port.
    #[error("debugger could not attach to localhost:{port}: connection refused")]
    ConnectionRefused { port: u16 },

    /// A fatal wait ran out of time. `before` holds whatever had arrived.
    #[error("timed out during {step}")]
    CaptureTimeout { step: String, before: String },

    /// A subprocess exited while the session still needed it.
    #[error("{stream} stream closed during {step}")]
    StreamClosed {
        stream: String,
        step: String,
        before: String,
    },

    /// The emulator console was touched after control passed to the debugger.
    #[error("{stream} console accessed after hand-off to the debugger ({step})")]
    WrongStream { stream: String, step: String },

    #[error("failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },

    #[error("image build failed: {0}")]
    Build(String),

    #[error("i/o error on {stream} stream: {source}")]
    Io {
        stream: String,
        #[source]
        source: std::io::Error,
    },
}

impl TriageError {
    /// Raw text captured right before the failure, if the error carries any.
    pub fn captured_text(&self) -> Option<&str> {
        match self {
            TriageError::CaptureTimeout { before, .. } | TriageError::StreamClosed { before, .. } => {
                Some(before.as_str())
            }
            _ => None,
        }
    }

    /// Configuration errors get their own exit code in the CLI.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TriageError::Configuration(_))
    }
}

pub type TriageResult<T> = std::result::Result<T, TriageError>;
