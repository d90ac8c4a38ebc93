// SPDX-License-Identifier: PMPL-1.0-or-later

//! Ownership of "who may be read next" between the two consoles
//!
//! The emulator console is usable while the target boots and until the crash is
//! provoked. Once the debugger halts the target, only the debugger console may be
//! touched: a read on the emulator would either block forever or swallow output
//! that belongs to a later exchange.

use crate::console::stream::StreamHandle;
use crate::error::{TriageError, TriageResult};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// Boot and crash trigger: the emulator console may be driven.
    Emulator,
    /// Target halted or interrupted: debugger only.
    Debugger,
}

/// Borrowed view of both session streams plus the hand-off state.
pub struct Consoles<'s> {
    debugger: &'s mut StreamHandle,
    emulator: &'s mut StreamHandle,
    turn: Turn,
}

impl<'s> Consoles<'s> {
    pub fn new(debugger: &'s mut StreamHandle, emulator: &'s mut StreamHandle) -> Self {
        Self {
            debugger,
            emulator,
            turn: Turn::Emulator,
        }
    }

    pub fn turn(&self) -> Turn {
        self.turn
    }

    /// The debugger console is always reachable.
    pub fn debugger(&mut self) -> &mut StreamHandle {
        &mut *self.debugger
    }

    /// The emulator console, refused once the debugger owns the session.
    pub fn emulator(&mut self, step: &str) -> TriageResult<&mut StreamHandle> {
        match self.turn {
            Turn::Emulator => Ok(&mut *self.emulator),
            Turn::Debugger => Err(TriageError::WrongStream {
                stream: self.emulator.label().to_string(),
                step: step.to_string(),
            }),
        }
    }

    /// Irreversibly hand the session to the debugger.
    pub fn hand_off(&mut self) {
        if self.turn == Turn::Emulator {
            debug!("emulator console released; debugger owns the session");
        }
        self.turn = Turn::Debugger;
    }
}
