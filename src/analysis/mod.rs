// SPDX-License-Identifier: PMPL-1.0-or-later

//! Analysis service client
//!
//! Submits a crash evidence record and returns a schema-checked report.
//! Failures are retried with exponential backoff; once the attempt bound is
//! exhausted the caller receives the error variant of the report instead of
//! an `Err`, so session teardown is never skipped on account of the network.

pub mod client;
pub mod prompt;
pub mod retry;

use crate::evidence::CrashEvidence;
use crate::types::AnalysisReport;

pub use client::{AnalysisClient, HttpReply, HttpTransport, ReqwestTransport};
pub use retry::{RetryPolicy, Sleeper};

pub trait Analyzer {
    fn analyze(&self, evidence: &CrashEvidence) -> AnalysisReport;
}
