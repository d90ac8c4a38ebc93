// SPDX-License-Identifier: PMPL-1.0-or-later

//! Session configuration
//!
//! Every constant a session uses lives in [`TriageConfig`]. The configuration
//! and the analysis credential are resolved once at startup into a
//! [`RuntimeConfig`] that is passed by reference into the session.

use crate::error::{TriageError, TriageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CREDENTIAL_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TriageConfig {
    pub emulator: EmulatorConfig,
    pub debugger: DebuggerConfig,
    pub kernel: KernelScenario,
    pub user: UserScenario,
    pub timeouts: TimeoutConfig,
    pub analysis: AnalysisConfig,
    pub build: BuildConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub program: String,
    /// `{port}` is replaced with the debugger port.
    pub args: Vec<String>,
    /// Process name swept before spawning.
    pub process_name: String,
    pub side_log: PathBuf,
    /// Regular expression for the guest shell prompt.
    pub shell_prompt: String,
    /// Pause between spawning the emulator and attaching the debugger.
    pub settle_delay_ms: u64,
    /// Image files that must exist before a session starts.
    pub required_files: Vec<PathBuf>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            program: "qemu-system-x86_64".to_string(),
            args: [
                "-nographic",
                "-cpu",
                "qemu64,+rdtscp",
                "-nic",
                "none",
                "-hda",
                "xv6.img",
                "-hdb",
                "fs.img",
                "-smp",
                "2",
                "-m",
                "512",
                "-S",
                "-gdb",
                "tcp::{port}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            process_name: "qemu-system-x86_64".to_string(),
            side_log: PathBuf::from("qemu_output.log"),
            shell_prompt: r"\$ ".to_string(),
            settle_delay_ms: 3000,
            required_files: vec![
                PathBuf::from("kernel"),
                PathBuf::from("xv6.img"),
                PathBuf::from("fs.img"),
            ],
        }
    }
}

impl EmulatorConfig {
    pub fn expanded_args(&self, port: u16) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{port}", &port.to_string()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub port: u16,
    /// Idle prompt including its trailing space, so responses start clean.
    pub prompt: String,
    /// Regular expressions accepted as a breakpoint-hit notification in
    /// addition to the built-in forms.
    pub extra_breakpoint_patterns: Vec<String>,
    /// Regular expressions accepted as a yes/no confirmation question in
    /// addition to the built-in forms.
    pub extra_confirm_patterns: Vec<String>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            program: "x86_64-elf-gdb".to_string(),
            args: vec!["kernel".to_string()],
            port: 26000,
            prompt: "(gdb) ".to_string(),
            extra_breakpoint_patterns: Vec::new(),
            extra_confirm_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelScenario {
    /// Fault-entry location the breakpoint is armed at.
    pub breakpoint: String,
    /// Symbol of the fault vector expected in the hit notification.
    pub fault_vector: String,
    /// Shell command that provokes the kernel fault.
    pub trigger_command: String,
}

impl Default for KernelScenario {
    fn default() -> Self {
        Self {
            breakpoint: "vectors.S:56".to_string(),
            fault_vector: "vector14".to_string(),
            trigger_command: "trap_test".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserScenario {
    pub program: String,
    /// Symbol file of the user program, loaded with `file`.
    pub symbol_file: String,
    pub report_begin: String,
    pub report_end: String,
    /// Regular expression whose first group is the faulting address.
    pub address_pattern: String,
}

impl Default for UserScenario {
    fn default() -> Self {
        Self {
            program: "user_crash".to_string(),
            symbol_file: "_user_crash".to_string(),
            report_begin: "=== USER CRASH REPORT ===".to_string(),
            report_end: "=== END CRASH REPORT ===".to_string(),
            address_pattern: r"RIP:\s*((?:0x)?[0-9a-fA-F]+)".to_string(),
        }
    }
}

/// Wait budgets, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub handshake_ms: u64,
    pub boot_ms: u64,
    pub fault_ms: u64,
    pub prompt_ms: u64,
    pub command_ms: u64,
    pub crash_report_ms: u64,
    pub interrupt_ms: u64,
    pub trigger_settle_ms: u64,
    pub quit_confirm_ms: u64,
    pub quit_exit_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: 10_000,
            boot_ms: 60_000,
            fault_ms: 20_000,
            prompt_ms: 10_000,
            command_ms: 5_000,
            crash_report_ms: 5_000,
            interrupt_ms: 5_000,
            trigger_settle_ms: 500,
            quit_confirm_ms: 2_000,
            quit_exit_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }
    pub fn boot(&self) -> Duration {
        Duration::from_millis(self.boot_ms)
    }
    pub fn fault(&self) -> Duration {
        Duration::from_millis(self.fault_ms)
    }
    pub fn prompt(&self) -> Duration {
        Duration::from_millis(self.prompt_ms)
    }
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }
    pub fn crash_report(&self) -> Duration {
        Duration::from_millis(self.crash_report_ms)
    }
    pub fn interrupt(&self) -> Duration {
        Duration::from_millis(self.interrupt_ms)
    }
    pub fn trigger_settle(&self) -> Duration {
        Duration::from_millis(self.trigger_settle_ms)
    }
    pub fn quit_confirm(&self) -> Duration {
        Duration::from_millis(self.quit_confirm_ms)
    }
    pub fn quit_exit(&self) -> Duration {
        Duration::from_millis(self.quit_exit_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub endpoint: String,
    /// Environment variable holding the credential.
    pub credential_env: String,
    /// Request attempts per analysis, clamped to 1..=5.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
                .to_string(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
            max_attempts: 5,
            base_delay_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Program and arguments; empty disables the build step.
    pub command: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec!["make".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub patch_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            patch_path: PathBuf::from("suggested_fix.patch"),
        }
    }
}

impl TriageConfig {
    /// Load a configuration file, dispatching on its extension.
    pub fn load(path: &Path) -> TriageResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TriageError::Configuration(format!("reading {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| {
                TriageError::Configuration(format!("parsing json config {}: {}", path.display(), e))
            }),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
                TriageError::Configuration(format!("parsing yaml config {}: {}", path.display(), e))
            }),
            _ => Err(TriageError::Configuration(format!(
                "unsupported config extension for {}",
                path.display()
            ))),
        }
    }

    /// Load `path` if given, otherwise use built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> TriageResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Analysis service credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> TriageResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TriageError::Configuration(
                "analysis credential is empty".to_string(),
            ));
        }
        Ok(Self(value.trim().to_string()))
    }

    /// Read the credential from the environment variable named in `analysis`.
    pub fn from_env(analysis: &AnalysisConfig) -> TriageResult<Self> {
        match std::env::var(&analysis.credential_env) {
            Ok(value) => Self::new(value).map_err(|_| {
                TriageError::Configuration(format!("{} is set but empty", analysis.credential_env))
            }),
            Err(_) => Err(TriageError::Configuration(format!(
                "please set the {} environment variable",
                analysis.credential_env
            ))),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Configuration plus credential, constructed once per process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub config: TriageConfig,
    pub credential: Credential,
}

impl RuntimeConfig {
    pub fn new(config: TriageConfig, credential: Credential) -> Self {
        Self { config, credential }
    }

    /// Resolve the credential from the environment. Fails before any session starts.
    pub fn from_env(config: TriageConfig) -> TriageResult<Self> {
        let credential = Credential::from_env(&config.analysis)?;
        Ok(Self::new(config, credential))
    }
}
