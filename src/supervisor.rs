// SPDX-License-Identifier: PMPL-1.0-or-later

//! Process supervision for the emulator and the debugger
//!
//! Both subprocesses are spawned with no transport-level read timeout: the
//! stream reader's own budget is the only one that applies. Everything the
//! emulator prints is duplicated into a side log for post-mortem reading.

use crate::config::TriageConfig;
use crate::console::pattern::Pattern;
use crate::console::stream::{spawn_pump, ProcessControl, SideLog, StreamHandle, WaitOutcome};
use crate::error::{TriageError, TriageResult};
use portable_pty::{
    native_pty_system, Child as PtyChild, ChildKiller, CommandBuilder, MasterPty, PtySize,
};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a subprocess is attached to its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Pseudo-terminal: echo, line discipline and interrupt characters work.
    Teletype,
    /// Plain pipes; stdout and stderr are merged into one stream.
    Pipe,
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub mode: SpawnMode,
    pub side_log: Option<PathBuf>,
}

impl ProcessSpec {
    fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Produces the two session streams. The real implementation spawns
/// subprocesses; tests substitute scripted consoles.
pub trait Launcher {
    fn launch_emulator(&mut self) -> TriageResult<StreamHandle>;
    fn launch_debugger(&mut self) -> TriageResult<StreamHandle>;

    /// Pause after the emulator starts so its control port is open.
    fn settle(&mut self) {}
}

/// Spawns the subprocesses described by a [`TriageConfig`].
pub struct Supervisor<'c> {
    config: &'c TriageConfig,
}

impl<'c> Supervisor<'c> {
    pub fn new(config: &'c TriageConfig) -> Self {
        Self { config }
    }
}

impl Launcher for Supervisor<'_> {
    fn launch_emulator(&mut self) -> TriageResult<StreamHandle> {
        let emulator = &self.config.emulator;
        sweep_stale(&emulator.process_name);
        let spec = ProcessSpec {
            label: "emulator".to_string(),
            program: emulator.program.clone(),
            args: emulator.expanded_args(self.config.debugger.port),
            mode: SpawnMode::Teletype,
            side_log: Some(emulator.side_log.clone()),
        };
        info!(port = self.config.debugger.port, "starting emulator");
        spawn(&spec)
    }

    fn launch_debugger(&mut self) -> TriageResult<StreamHandle> {
        let debugger = &self.config.debugger;
        let spec = ProcessSpec {
            label: "debugger".to_string(),
            program: debugger.program.clone(),
            args: debugger.args.clone(),
            mode: SpawnMode::Teletype,
            side_log: None,
        };
        info!(program = %debugger.program, "starting debugger");
        spawn(&spec)
    }

    fn settle(&mut self) {
        thread::sleep(Duration::from_millis(self.config.emulator.settle_delay_ms));
    }
}

/// Kill any leftover instance of `process_name`. Finding none is fine.
pub fn sweep_stale(process_name: &str) {
    match Command::new("pkill")
        .args(["-9", process_name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {
            info!(process = process_name, "killed stale instance");
            thread::sleep(Duration::from_secs(1));
        }
        Ok(_) => debug!(process = process_name, "no stale instance"),
        Err(err) => debug!(process = process_name, %err, "stale sweep unavailable"),
    }
}

/// Spawn `spec` and wrap it in a [`StreamHandle`].
pub fn spawn(spec: &ProcessSpec) -> TriageResult<StreamHandle> {
    let log = match &spec.side_log {
        Some(path) => Some(open_side_log(path, spec)?),
        None => None,
    };
    match spec.mode {
        SpawnMode::Teletype => spawn_teletype(spec, log),
        SpawnMode::Pipe => spawn_pipe(spec, log),
    }
}

fn open_side_log(path: &Path, spec: &ProcessSpec) -> TriageResult<SideLog> {
    let file = File::create(path).map_err(|e| TriageError::Spawn {
        command: spec.command_line(),
        message: format!("cannot create side log {}: {}", path.display(), e),
    })?;
    Ok(Arc::new(Mutex::new(file)))
}

fn spawn_error(spec: &ProcessSpec, err: impl std::fmt::Display) -> TriageError {
    TriageError::Spawn {
        command: spec.command_line(),
        message: err.to_string(),
    }
}

fn spawn_teletype(spec: &ProcessSpec, log: Option<SideLog>) -> TriageResult<StreamHandle> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 50,
            cols: 250,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| spawn_error(spec, e))?;

    let mut cmd = CommandBuilder::new(&spec.program);
    cmd.args(&spec.args);
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| spawn_error(spec, e))?;
    // the reader only sees EOF once no slave descriptor is left open here
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| spawn_error(spec, e))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| spawn_error(spec, e))?;

    let (tx, rx) = mpsc::channel();
    spawn_pump(spec.label.clone(), reader, tx, log);

    debug!(stream = %spec.label, pid = ?child.process_id(), "spawned on pty");
    Ok(StreamHandle::new(
        spec.label.clone(),
        rx,
        writer,
        Box::new(TeletypeProcess {
            child,
            _master: pair.master,
        }),
    ))
}

fn spawn_pipe(spec: &ProcessSpec, log: Option<SideLog>) -> TriageResult<StreamHandle> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(spec, e))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_error(spec, "stdin not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_error(spec, "stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| spawn_error(spec, "stderr not captured"))?;

    let (tx, rx) = mpsc::channel();
    spawn_pump(spec.label.clone(), Box::new(stdout), tx.clone(), log.clone());
    spawn_pump(spec.label.clone(), Box::new(stderr), tx, log);

    debug!(stream = %spec.label, pid = child.id(), "spawned on pipes");
    Ok(StreamHandle::new(
        spec.label.clone(),
        rx,
        Box::new(stdin),
        Box::new(PipeProcess { child }),
    ))
}

struct TeletypeProcess {
    child: Box<dyn PtyChild + Send + Sync>,
    _master: Box<dyn MasterPty + Send>,
}

impl ProcessControl for TeletypeProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        let _ = self.child.wait();
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}

struct PipeProcess {
    child: Child,
}

impl ProcessControl for PipeProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        let _ = self.child.wait();
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

/// Bounds for a graceful debugger quit.
#[derive(Debug, Clone)]
pub struct GracefulQuit {
    pub command: String,
    pub confirm: Pattern,
    pub confirm_wait: Duration,
    pub exit_wait: Duration,
}

impl GracefulQuit {
    pub fn for_debugger(config: &TriageConfig) -> Self {
        Self {
            command: "q".to_string(),
            confirm: Pattern::literal("Quit anyway? (y or n)"),
            confirm_wait: config.timeouts.quit_confirm(),
            exit_wait: config.timeouts.quit_exit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Graceful,
    Forced,
    AlreadyExited,
}

/// Shut a stream's process down. A graceful quit is tried first when asked
/// for; forced termination is the fallback and its failure is swallowed.
pub fn terminate(mut handle: StreamHandle, graceful: Option<&GracefulQuit>) -> Termination {
    let label = handle.label().to_string();

    if let Some(quit) = graceful {
        if handle.is_alive() && quit_gracefully(&mut handle, quit) {
            info!(stream = %label, "exited gracefully");
            return Termination::Graceful;
        }
    }

    if !handle.is_alive() {
        debug!(stream = %label, "already exited");
        return Termination::AlreadyExited;
    }

    if let Err(err) = handle.process_mut().kill() {
        warn!(stream = %label, %err, "forced termination failed");
    } else {
        info!(stream = %label, "terminated");
    }
    Termination::Forced
}

fn quit_gracefully(handle: &mut StreamHandle, quit: &GracefulQuit) -> bool {
    if handle.send_line(&quit.command).is_err() {
        return false;
    }
    if let WaitOutcome::Matched { .. } =
        handle.await_any(std::slice::from_ref(&quit.confirm), quit.confirm_wait)
    {
        if handle.send_line("y").is_err() {
            return false;
        }
    }
    handle.process_mut().wait_exit(quit.exit_wait)
}
