// SPDX-License-Identifier: PMPL-1.0-or-later

//! Result sink: the patch artifact plus optional report and evidence files

use crate::evidence::CrashEvidence;
use crate::types::{AnalysisReport, Mode};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives the analysed outcome of a successful session.
pub trait ResultSink {
    /// Persist `report` and return the paths written.
    fn persist(&mut self, evidence: &CrashEvidence, report: &AnalysisReport) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Yaml,
}

impl ReportFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Some(ReportFormat::Json),
            Some("yaml") | Some("yml") => Some(ReportFormat::Yaml),
            _ => None,
        }
    }

    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<String> {
        match self {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(value)?),
            ReportFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        }
    }
}

/// Everything known about one analysed crash, as written by `--report-out`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRecord {
    pub mode: Mode,
    pub fingerprint: String,
    pub generated_at: String,
    pub evidence: CrashEvidence,
    pub report: AnalysisReport,
}

impl TriageRecord {
    pub fn new(evidence: &CrashEvidence, report: &AnalysisReport) -> Self {
        Self {
            mode: evidence.mode,
            fingerprint: evidence.fingerprint(),
            generated_at: Utc::now().to_rfc3339(),
            evidence: evidence.clone(),
            report: report.clone(),
        }
    }
}

/// Patch file contents with a commented header. `None` for an error report.
pub fn render_patch(evidence: &CrashEvidence, report: &AnalysisReport) -> Option<String> {
    let mut out = String::new();
    match report {
        AnalysisReport::Kernel(k) => {
            out.push_str("# AI-generated patch for a kernel trap\n");
            out.push_str(&format!("# Root Cause: {}\n", k.root_cause));
            out.push_str(&format!("# Faulty Function: {}\n", k.faulty_function));
            out.push_str(&format!("# Faulty Line: {}\n", k.faulty_line));
            out.push_str(&format!("# Severity: {}\n", k.severity));
        }
        AnalysisReport::User(u) => {
            out.push_str("# AI-generated fix for a user-process trap\n");
            out.push_str(&format!("# Root Cause: {}\n", u.root_cause));
            out.push_str(&format!("# Trap Type: {}\n", first_line(&u.trap_type_explanation)));
            out.push_str(&format!("# Faulty Line: {}\n", u.faulty_line));
            out.push_str(&format!("# Severity: {}\n", u.severity));
        }
        AnalysisReport::Error { .. } => return None,
    }
    out.push_str(&format!("# Evidence: {}\n", evidence.fingerprint()));
    out.push_str(&format!("# Generated: {}\n\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")));
    out.push_str(report.fix().unwrap_or_default());
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Writes artifacts to the filesystem.
#[derive(Debug, Clone)]
pub struct FileSink {
    pub patch_path: PathBuf,
    pub report_path: Option<PathBuf>,
    pub evidence_path: Option<PathBuf>,
}

impl FileSink {
    pub fn new(patch_path: impl Into<PathBuf>) -> Self {
        Self {
            patch_path: patch_path.into(),
            report_path: None,
            evidence_path: None,
        }
    }

    pub fn with_report(mut self, path: Option<PathBuf>) -> Self {
        self.report_path = path;
        self
    }

    pub fn with_evidence(mut self, path: Option<PathBuf>) -> Self {
        self.evidence_path = path;
        self
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}

impl ResultSink for FileSink {
    fn persist(&mut self, evidence: &CrashEvidence, report: &AnalysisReport) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        if let Some(path) = &self.evidence_path {
            write_file(path, &serde_json::to_string_pretty(evidence)?)?;
            written.push(path.clone());
        }

        if let Some(path) = &self.report_path {
            let format = ReportFormat::from_path(path)
                .ok_or_else(|| anyhow!("unsupported report extension: {}", path.display()))?;
            write_file(path, &format.serialize(&TriageRecord::new(evidence, report))?)?;
            written.push(path.clone());
        }

        if let Some(patch) = render_patch(evidence, report) {
            write_file(&self.patch_path, &patch)?;
            info!(path = %self.patch_path.display(), "patch saved");
            written.push(self.patch_path.clone());
        }

        Ok(written)
    }
}

/// Load an evidence record saved with `--evidence-out`.
pub fn load_evidence(path: &Path) -> Result<CrashEvidence> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing evidence {}", path.display()))
}
