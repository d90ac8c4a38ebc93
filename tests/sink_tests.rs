// SPDX-License-Identifier: PMPL-1.0-or-later

//! File sink output

use std::fs;
use tempfile::TempDir;
use trap_triage::evidence::{assemble, CrashEvidence, Field, FieldLabel, RawCapture};
use trap_triage::sink::{load_evidence, render_patch, FileSink, ResultSink, TriageRecord};
use trap_triage::types::{AnalysisReport, KernelAnalysis, Mode, UserAnalysis};

fn kernel_evidence() -> CrashEvidence {
    assemble(
        Mode::Kernel,
        &[RawCapture::response(
            FieldLabel::Backtrace,
            "bt",
            Field::Captured("#0  vector0 () at vectors.S:5".into()),
        )],
    )
}

fn kernel_report() -> AnalysisReport {
    AnalysisReport::Kernel(KernelAnalysis {
        root_cause: "divide by zero".into(),
        faulty_function: "sys_trap_test (sysproc.c)".into(),
        faulty_line: "return 1 / n;".into(),
        severity: "High".into(),
        analysis_summary: "vector0 taken from sys_trap_test".into(),
        suggested_fix_patch: "--- a/sysproc.c\n+++ b/sysproc.c\n@@ -1 +1 @@\n-return 1 / n;\n+return n ? 1 / n : -1;".into(),
    })
}

#[test]
fn test_kernel_patch_header_and_body() {
    let dir = TempDir::new().expect("tempdir should succeed");
    let patch = dir.path().join("out").join("fix.patch");
    let mut sink = FileSink::new(&patch);

    let written = sink
        .persist(&kernel_evidence(), &kernel_report())
        .expect("persist should succeed");

    assert_eq!(written, vec![patch.clone()]);
    let content = fs::read_to_string(&patch).unwrap();
    assert!(content.starts_with("# AI-generated patch for a kernel trap\n"));
    assert!(content.contains("# Root Cause: divide by zero\n"));
    assert!(content.contains("# Faulty Function: sys_trap_test (sysproc.c)\n"));
    assert!(content.contains("# Severity: High\n"));
    assert!(content.contains(&format!("# Evidence: {}\n", kernel_evidence().fingerprint())));
    assert!(content.ends_with("+return n ? 1 / n : -1;\n"));
}

#[test]
fn test_user_patch_uses_first_line_of_trap_type() {
    let evidence = assemble(
        Mode::User,
        &[RawCapture::direct(
            FieldLabel::CrashReportBlock,
            Field::Captured("=== USER CRASH REPORT ===".into()),
        )],
    );
    let report = AnalysisReport::User(UserAnalysis {
        root_cause: "null store".into(),
        trap_type_explanation: "Trap 14 is a page fault.\nThe faulting address is in cr2.".into(),
        faulty_line: "*p = 1;".into(),
        explanation: "the store faulted".into(),
        severity: "Low".into(),
        suggested_fix: "if (p) *p = 1;\n".into(),
    });

    let patch = render_patch(&evidence, &report).expect("user report should render");
    assert!(patch.contains("# Trap Type: Trap 14 is a page fault.\n"));
    assert!(!patch.contains("cr2"));
    assert!(patch.ends_with("if (p) *p = 1;\n"));
}

#[test]
fn test_error_report_writes_no_patch() {
    let dir = TempDir::new().unwrap();
    let patch = dir.path().join("fix.patch");
    let mut sink = FileSink::new(&patch);

    let written = sink
        .persist(&kernel_evidence(), &AnalysisReport::error("service unavailable"))
        .expect("persist should succeed");

    assert!(written.is_empty());
    assert!(!patch.exists());
}

#[test]
fn test_yaml_report_and_evidence_round_trip() {
    let dir = TempDir::new().unwrap();
    let patch = dir.path().join("fix.patch");
    let report_path = dir.path().join("triage.yaml");
    let evidence_path = dir.path().join("evidence.json");
    let mut sink = FileSink::new(&patch)
        .with_report(Some(report_path.clone()))
        .with_evidence(Some(evidence_path.clone()));

    let evidence = kernel_evidence();
    let written = sink
        .persist(&evidence, &kernel_report())
        .expect("persist should succeed");
    assert_eq!(written, vec![evidence_path.clone(), report_path.clone(), patch]);

    let record: TriageRecord =
        serde_yaml::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(record.mode, Mode::Kernel);
    assert_eq!(record.fingerprint, evidence.fingerprint());
    assert_eq!(record.report, kernel_report());

    let loaded = load_evidence(&evidence_path).expect("evidence should load");
    assert_eq!(loaded, evidence);
}

#[test]
fn test_unknown_report_extension_rejected() {
    let dir = TempDir::new().unwrap();
    let mut sink = FileSink::new(dir.path().join("fix.patch"))
        .with_report(Some(dir.path().join("triage.txt")));
    assert!(sink.persist(&kernel_evidence(), &kernel_report()).is_err());
}

#[test]
fn test_load_evidence_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("evidence.json");
    fs::write(&path, "{ not evidence").unwrap();
    assert!(load_evidence(&path).is_err());
    assert!(load_evidence(&dir.path().join("missing.json")).is_err());
}
