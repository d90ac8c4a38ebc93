// SPDX-License-Identifier: PMPL-1.0-or-later

//! Console rendering of session outcomes

use crate::evidence::{CrashEvidence, Field};
use crate::session::{Postmortem, SessionOutcome};
use crate::types::{AnalysisReport, KernelAnalysis, UserAnalysis};
use colored::*;

pub struct ReportFormatter {
    show_evidence: bool,
}

impl ReportFormatter {
    pub fn new() -> Self {
        Self {
            show_evidence: true,
        }
    }

    pub fn without_evidence() -> Self {
        Self {
            show_evidence: false,
        }
    }

    pub fn print_outcome(&self, outcome: &SessionOutcome) {
        match outcome {
            SessionOutcome::NoCrashDetected => {
                println!("\n{}", "No crash detected: the program exited cleanly.".green());
            }
            SessionOutcome::Analyzed {
                evidence,
                report,
                artifacts,
                sink_error,
            } => {
                if self.show_evidence {
                    self.print_evidence(evidence);
                }
                self.print_analysis(report);
                for path in artifacts {
                    println!("\n{} {}", "Saved:".green(), path.display());
                }
                if let Some(err) = sink_error {
                    println!("\n{} {}", "Could not save results:".red(), err);
                }
            }
        }
    }

    pub fn print_evidence(&self, evidence: &CrashEvidence) {
        println!("\n{}", "--- Captured Debug Data ---".bold().cyan());
        println!("{}", evidence.document());
        for entry in &evidence.fields {
            let status = field_status(&entry.value);
            let status = if entry.value.is_captured() {
                status.normal()
            } else {
                status.yellow()
            };
            println!("  {:32} {}", entry.label.header(), status);
        }
        println!("  Fingerprint: {}", evidence.fingerprint().dimmed());
    }

    pub fn print_analysis(&self, report: &AnalysisReport) {
        println!("\n{}", "=".repeat(80));
        println!("{}", "AI-ASSISTED ROOT CAUSE ANALYSIS".bold().cyan());
        println!("{}", "=".repeat(80));

        match report {
            AnalysisReport::Kernel(k) => self.print_kernel(k),
            AnalysisReport::User(u) => self.print_user(u),
            AnalysisReport::Error { error } => {
                println!("{} {}", "Analysis failed:".red().bold(), error);
                println!("\nCheck that the analysis credential is valid and the model is reachable.");
            }
        }
    }

    fn print_kernel(&self, k: &KernelAnalysis) {
        println!("Root Cause: {}", k.root_cause.bold());
        println!("Faulty Function: {}", k.faulty_function);
        println!("Faulty Line: {}", k.faulty_line);
        println!("Severity: {}", severity_colored(&k.severity));
        println!("\n{}", "Analysis Summary:".yellow());
        println!("{}", k.analysis_summary);
        println!("\n{}", "Suggested Fix/Patch:".yellow());
        println!("{}", k.suggested_fix_patch);
    }

    fn print_user(&self, u: &UserAnalysis) {
        println!("Root Cause: {}", u.root_cause.bold());
        println!("Trap Type: {}", u.trap_type_explanation);
        println!("Faulty Line: {}", u.faulty_line);
        println!("Severity: {}", severity_colored(&u.severity));
        println!("\n{}", "Explanation:".yellow());
        println!("{}", u.explanation);
        println!("\n{}", "Suggested Fix:".yellow());
        println!("{}", u.suggested_fix);
    }

    /// Last output of both streams after a fatal error.
    pub fn print_postmortem(&self, postmortem: &Postmortem) {
        println!("\n{}", "Last debugger output:".yellow());
        println!("{}", or_placeholder(&postmortem.debugger_tail));
        println!("\n{}", "Last emulator output:".yellow());
        println!("{}", or_placeholder(&postmortem.emulator_tail));
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn or_placeholder(text: &str) -> &str {
    if text.trim().is_empty() {
        "(no output)"
    } else {
        text
    }
}

fn severity_colored(severity: &str) -> ColoredString {
    match severity.to_ascii_lowercase().as_str() {
        "high" | "critical" => severity.red().bold(),
        "medium" => severity.yellow(),
        "low" => severity.green(),
        _ => severity.normal(),
    }
}

/// Short status line for one evidence field.
pub fn field_status(field: &Field) -> String {
    match field {
        Field::Captured(text) => format!("{} lines", text.lines().count()),
        Field::Unavailable(reason) => format!("unavailable ({})", reason),
    }
}
