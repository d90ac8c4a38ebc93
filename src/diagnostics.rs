// SPDX-License-Identifier: PMPL-1.0-or-later

//! Pre-flight checks for a triage session (`trap-triage doctor`)

use crate::config::{Credential, TriageConfig};
use anyhow::{anyhow, Result};
use colored::*;
use std::net::TcpListener;
use std::path::Path;

pub fn run_self_diagnostics(config: &TriageConfig) -> Result<()> {
    println!("trap-triage self-diagnostics");

    let checks = collect(config);
    println!();
    for entry in &checks {
        entry.print();
    }

    if checks.iter().any(|entry| entry.level == Level::Error) {
        Err(anyhow!("self-diagnostics reported issues"))
    } else {
        Ok(())
    }
}

/// Every check, in display order.
pub fn collect(config: &TriageConfig) -> Vec<Diagnostic> {
    let mut checks = vec![Diagnostic::ok(
        "version",
        format!("trap-triage {}", env!("CARGO_PKG_VERSION")),
    )];

    checks.push(check_program("debugger", &config.debugger.program));
    checks.push(check_program("emulator", &config.emulator.program));
    if let Some(build) = config.build.command.first() {
        checks.push(check_program("build tool", build));
    }
    for file in &config.emulator.required_files {
        checks.push(check_file(file));
    }
    checks.push(check_credential(config));
    checks.push(check_port(config.debugger.port));
    checks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Ok,
    Warn,
    Error,
}

impl Level {
    fn tag(&self) -> ColoredString {
        match self {
            Level::Ok => "OK".green(),
            Level::Warn => "WARN".yellow(),
            Level::Error => "ERR".red(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub label: String,
    pub level: Level,
    pub detail: String,
}

impl Diagnostic {
    fn new(label: impl Into<String>, level: Level, detail: String) -> Self {
        Self {
            label: label.into(),
            level,
            detail,
        }
    }

    fn ok(label: impl Into<String>, detail: String) -> Self {
        Self::new(label, Level::Ok, detail)
    }

    fn warning(label: impl Into<String>, detail: String) -> Self {
        Self::new(label, Level::Warn, detail)
    }

    fn error(label: impl Into<String>, detail: String) -> Self {
        Self::new(label, Level::Error, detail)
    }

    fn print(&self) {
        println!("  [{}] {:22} {}", self.level.tag(), self.label, self.detail);
    }
}

fn check_program(label: &str, program: &str) -> Diagnostic {
    match which::which(program) {
        Ok(path) => Diagnostic::ok(label, format!("{} -> {}", program, path.display())),
        Err(_) => Diagnostic::error(label, format!("{} not found on PATH", program)),
    }
}

fn check_file(path: &Path) -> Diagnostic {
    let label = format!("image {}", path.display());
    if path.is_file() {
        Diagnostic::ok(label, "present".to_string())
    } else if path.exists() {
        Diagnostic::warning(label, "exists but is not a regular file".to_string())
    } else {
        Diagnostic::warning(label, "missing (built by `run` unless --skip-build)".to_string())
    }
}

fn check_credential(config: &TriageConfig) -> Diagnostic {
    let env_key = &config.analysis.credential_env;
    match Credential::from_env(&config.analysis) {
        Ok(_) => Diagnostic::ok("analysis credential", format!("configured ({})", env_key)),
        Err(_) => Diagnostic::error("analysis credential", format!("not configured (set {})", env_key)),
    }
}

fn check_port(port: u16) -> Diagnostic {
    match TcpListener::bind(("127.0.0.1", port)) {
        Ok(_) => Diagnostic::ok("control port", format!("localhost:{} is free", port)),
        Err(err) => Diagnostic::warning(
            "control port",
            format!("localhost:{} unavailable ({}); a stale emulator may hold it", port, err),
        ),
    }
}
