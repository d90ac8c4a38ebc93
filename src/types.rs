// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core type definitions for trap-triage

use serde::{Deserialize, Serialize};
use std::fmt;

/// Crash class being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Kernel-level trap caught at the fault-entry breakpoint.
    Kernel,
    /// User-process fault reported by the guest kernel.
    User,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Kernel => "kernel",
            Mode::User => "user",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Succeeded,
    Failed,
}

/// Analysis of a kernel trap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelAnalysis {
    pub root_cause: String,
    pub faulty_function: String,
    pub faulty_line: String,
    pub severity: String,
    pub analysis_summary: String,
    pub suggested_fix_patch: String,
}

/// Analysis of a user-process fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnalysis {
    pub root_cause: String,
    pub trap_type_explanation: String,
    pub faulty_line: String,
    pub explanation: String,
    pub severity: String,
    pub suggested_fix: String,
}

/// Schema-validated answer from the analysis service. Either every required
/// field of the mode is present, or the report is the single-field error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnalysisReport {
    Kernel(KernelAnalysis),
    User(UserAnalysis),
    Error { error: String },
}

impl AnalysisReport {
    pub fn error(message: impl Into<String>) -> Self {
        AnalysisReport::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AnalysisReport::Error { .. })
    }

    pub fn severity(&self) -> Option<&str> {
        match self {
            AnalysisReport::Kernel(k) => Some(&k.severity),
            AnalysisReport::User(u) => Some(&u.severity),
            AnalysisReport::Error { .. } => None,
        }
    }

    /// Fix or patch body, if the report carries one.
    pub fn fix(&self) -> Option<&str> {
        match self {
            AnalysisReport::Kernel(k) => Some(&k.suggested_fix_patch),
            AnalysisReport::User(u) => Some(&u.suggested_fix),
            AnalysisReport::Error { .. } => None,
        }
    }
}
