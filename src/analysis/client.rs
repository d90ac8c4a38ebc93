// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP client for the analysis service

use crate::analysis::prompt::build_payload;
use crate::analysis::retry::{real_sleeper, RetryPolicy, Sleeper};
use crate::analysis::Analyzer;
use crate::config::{Credential, RuntimeConfig};
use crate::error::{TriageError, TriageResult};
use crate::evidence::CrashEvidence;
use crate::types::{AnalysisReport, KernelAnalysis, Mode, UserAnalysis};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Posts a JSON body with the credential as the `key` query parameter.
/// `Err` is a transport failure.
pub trait HttpTransport: Send + Sync {
    fn post_json(
        &self,
        url: &str,
        credential: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply, String>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> TriageResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| TriageError::Configuration(format!("http client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(
        &self,
        url: &str,
        credential: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply, String> {
        let resp = self
            .client
            .post(url)
            .query(&[("key", credential)])
            .timeout(timeout)
            .json(body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    format!("request timed out after {}s", timeout.as_secs())
                } else {
                    // reqwest errors carry the URL, which carries the key
                    e.without_url().to_string()
                }
            })?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(|e| e.without_url().to_string())?;
        Ok(HttpReply { status, body })
    }
}

pub struct AnalysisClient {
    endpoint: String,
    credential: Credential,
    timeout: Duration,
    policy: RetryPolicy,
    transport: Box<dyn HttpTransport>,
    sleeper: Sleeper,
}

impl AnalysisClient {
    pub fn new(runtime: &RuntimeConfig) -> TriageResult<Self> {
        Ok(Self::with_transport(runtime, Box::new(ReqwestTransport::new()?)))
    }

    pub fn with_transport(runtime: &RuntimeConfig, transport: Box<dyn HttpTransport>) -> Self {
        let analysis = &runtime.config.analysis;
        Self {
            endpoint: analysis.endpoint.clone(),
            credential: runtime.credential.clone(),
            timeout: Duration::from_secs(analysis.request_timeout_secs),
            policy: RetryPolicy::from_config(analysis),
            transport,
            sleeper: real_sleeper(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn attempt(&self, mode: Mode, payload: &Value) -> Result<AnalysisReport, String> {
        let reply = self.transport.post_json(
            &self.endpoint,
            self.credential.expose(),
            payload,
            self.timeout,
        )?;
        if reply.status != 200 {
            let excerpt: String = reply.body.chars().take(200).collect();
            return Err(format!("service returned status {}: {}", reply.status, excerpt));
        }
        parse_reply(mode, &reply.body)
    }
}

impl Analyzer for AnalysisClient {
    fn analyze(&self, evidence: &CrashEvidence) -> AnalysisReport {
        let payload = build_payload(evidence);
        info!(mode = %evidence.mode, fingerprint = %evidence.fingerprint(), "requesting analysis");

        match self
            .policy
            .run(&*self.sleeper, |attempt| {
                debug!(attempt, "posting evidence");
                self.attempt(evidence.mode, &payload)
            }) {
            Ok(report) => report,
            Err(exhausted) => AnalysisReport::error(format!(
                "Failed to get analysis after {} attempts: {}",
                exhausted.attempts, exhausted.last_error
            )),
        }
    }
}

/// Pull the nested answer text out of a service response and validate it
/// against the mode's required fields.
pub fn parse_reply(mode: Mode, body: &str) -> Result<AnalysisReport, String> {
    let envelope: Value =
        serde_json::from_str(body).map_err(|e| format!("malformed response body: {}", e))?;
    let text = envelope
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| "response carries no candidate text".to_string())?;

    match mode {
        Mode::Kernel => serde_json::from_str::<KernelAnalysis>(text)
            .map(AnalysisReport::Kernel)
            .map_err(|e| format!("analysis does not match the kernel schema: {}", e)),
        Mode::User => serde_json::from_str::<UserAnalysis>(text)
            .map(AnalysisReport::User)
            .map_err(|e| format!("analysis does not match the user schema: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(inner: &str) -> String {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": inner }] } }]
        })
        .to_string()
    }

    #[test]
    fn test_parse_user_reply() {
        let inner = r#"{"rootCause":"null write","trapTypeExplanation":"trap 14 is a page fault","faultyLine":"*p = 1;","explanation":"RIP points at the store","severity":"High","suggestedFix":"check p"}"#;
        let report = parse_reply(Mode::User, &envelope(inner)).unwrap();
        assert_eq!(report.severity(), Some("High"));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let inner = r#"{"rootCause":"null write","severity":"High"}"#;
        let err = parse_reply(Mode::Kernel, &envelope(inner)).unwrap_err();
        assert!(err.contains("kernel schema"));
    }

    #[test]
    fn test_no_candidates_rejected() {
        assert!(parse_reply(Mode::Kernel, r#"{"candidates":[]}"#).is_err());
        assert!(parse_reply(Mode::Kernel, "<html>").is_err());
    }
}
