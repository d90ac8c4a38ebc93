// SPDX-License-Identifier: PMPL-1.0-or-later

//! Guest image build step, run before a session starts

use crate::config::BuildConfig;
use crate::error::{TriageError, TriageResult};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::info;

const STDERR_TAIL: usize = 2000;

/// Run the configured build command. An empty command is a no-op.
pub fn build(config: &BuildConfig) -> TriageResult<()> {
    let Some((program, args)) = config.command.split_first() else {
        info!("no build command configured");
        return Ok(());
    };

    info!(command = %config.command.join(" "), "building guest image");
    let started = Instant::now();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| TriageError::Build(format!("executing {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let start = stderr.len().saturating_sub(STDERR_TAIL);
        let tail = stderr.get(start..).unwrap_or(&stderr);
        return Err(TriageError::Build(format!(
            "`{}` exited with {:?}\n{}",
            config.command.join(" "),
            output.status.code(),
            tail.trim_end()
        )));
    }

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "guest image built");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_is_noop() {
        assert!(build(&BuildConfig { command: vec![] }).is_ok());
    }

    #[test]
    fn test_failing_command_is_build_error() {
        let config = BuildConfig {
            command: vec!["sh".into(), "-c".into(), "echo broken >&2; exit 3".into()],
        };
        match build(&config) {
            Err(TriageError::Build(message)) => assert!(message.contains("broken")),
            other => panic!("expected build error, got {:?}", other),
        }
    }
}
