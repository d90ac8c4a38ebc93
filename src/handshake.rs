// SPDX-License-Identifier: PMPL-1.0-or-later

//! Attach the debugger to the emulator's control port and silence paging

use crate::capture::exchange::{require, run_quiet};
use crate::config::TimeoutConfig;
use crate::console::stream::StreamHandle;
use crate::error::{TriageError, TriageResult};
use crate::prompts::Prompts;
use tracing::{info, warn};

/// Commands that keep responses from being cut by a "press return" block.
pub const PAGING_COMMANDS: [&str; 2] = ["set pagination off", "set height 0"];

/// Attach `debugger` to `localhost:port`. Refusal is fatal and never retried:
/// the port is expected to be open once the emulator has settled.
pub fn establish(
    debugger: &mut StreamHandle,
    emulator: &mut StreamHandle,
    port: u16,
    prompts: &Prompts,
    timeouts: &TimeoutConfig,
) -> TriageResult<()> {
    let first = [prompts.idle.clone(), prompts.pending_breakpoint.clone()];
    let (index, _) = require(debugger, &first, timeouts.handshake(), "initial debugger prompt")?;
    if index == 1 {
        debugger.send_line("y")?;
        require(
            debugger,
            std::slice::from_ref(&prompts.idle),
            timeouts.handshake(),
            "prompt after pending-breakpoint answer",
        )?;
    }

    if !emulator.is_alive() {
        return Err(TriageError::StreamClosed {
            stream: emulator.label().to_string(),
            step: "handshake".to_string(),
            before: emulator.unconsumed().to_string(),
        });
    }

    debugger.send_line(&format!("target remote localhost:{}", port))?;
    let attach = [
        prompts.attach_banner.clone(),
        prompts.idle.clone(),
        prompts.refused.clone(),
    ];
    let (index, before) = require(debugger, &attach, timeouts.handshake(), "remote attach")?;
    if index == 2 || before.contains("Connection refused") {
        return Err(TriageError::ConnectionRefused { port });
    }
    if index == 0 {
        require(
            debugger,
            std::slice::from_ref(&prompts.idle),
            timeouts.handshake(),
            "prompt after attach",
        )?;
    }
    info!(port, "debugger attached");

    for command in PAGING_COMMANDS {
        if !run_quiet(debugger, &prompts.idle, command, timeouts.handshake())? {
            warn!(command, "no prompt after paging command");
        }
    }
    Ok(())
}
