// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prompt and notification patterns recognised on both consoles
//!
//! Exact debugger wording varies between versions, so the built-in forms are
//! a minimum set; configuration can append more.

use crate::config::TriageConfig;
use crate::console::pattern::{extend_with, Pattern};
use crate::error::{TriageError, TriageResult};
use regex::escape;

#[derive(Debug, Clone)]
pub struct Prompts {
    /// Debugger idle prompt.
    pub idle: Pattern,
    /// Startup question about pending breakpoints.
    pub pending_breakpoint: Pattern,
    pub attach_banner: Pattern,
    pub refused: Pattern,
    pub continuing: Pattern,
    /// Accepted breakpoint-hit notifications, in priority order.
    pub breakpoint_hit: Vec<Pattern>,
    /// Yes/no questions raised while switching symbol files.
    pub confirm: Vec<Pattern>,
    /// Guest shell prompt on the emulator console.
    pub shell: Pattern,
    pub report_begin: Pattern,
    pub report_end: Pattern,
}

impl Prompts {
    pub fn from_config(config: &TriageConfig) -> TriageResult<Self> {
        let bad = |what: &str, err: regex::Error| {
            TriageError::Configuration(format!("invalid {} pattern: {}", what, err))
        };

        let hit = vec![
            Pattern::regex(&format!(
                r"Breakpoint 1.*{}.*{}",
                escape(&config.kernel.fault_vector),
                escape(&config.kernel.breakpoint)
            ))
            .map_err(|e| bad("breakpoint", e))?,
            Pattern::regex(r"Thread \d+ hit Breakpoint 1").map_err(|e| bad("breakpoint", e))?,
        ];
        let breakpoint_hit = extend_with(hit, &config.debugger.extra_breakpoint_patterns)
            .map_err(|e| bad("breakpoint", e))?;

        let confirm = vec![
            Pattern::regex(r"change the file\?\s*\(y or n\)").map_err(|e| bad("confirm", e))?,
            Pattern::regex(r"Load new symbol table from .*\?\s*\(y or n\)")
                .map_err(|e| bad("confirm", e))?,
        ];
        let confirm = extend_with(confirm, &config.debugger.extra_confirm_patterns)
            .map_err(|e| bad("confirm", e))?;

        Ok(Self {
            idle: Pattern::literal(config.debugger.prompt.clone()),
            pending_breakpoint: Pattern::regex(
                r"(?i)breakpoint pending on future shared library load\? \(y or \[n\]\)",
            )
            .map_err(|e| bad("pending breakpoint", e))?,
            attach_banner: Pattern::literal("Remote debugging using localhost"),
            refused: Pattern::literal("Connection refused"),
            continuing: Pattern::literal("Continuing."),
            breakpoint_hit,
            confirm,
            shell: Pattern::regex(&config.emulator.shell_prompt).map_err(|e| bad("shell", e))?,
            report_begin: Pattern::literal(config.user.report_begin.clone()),
            report_end: Pattern::literal(config.user.report_end.clone()),
        })
    }
}
