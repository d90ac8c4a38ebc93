// SPDX-License-Identifier: PMPL-1.0-or-later

//! Scripted console rig shared by the integration tests
//!
//! Each side (debugger, emulator) is a `StreamHandle` backed by an in-memory
//! channel. Lines written to either side are matched against single-use rules
//! whose actions push replies onto either side, close a side or make its
//! process exit. Nothing is timed: replies are queued synchronously during the
//! write, so a missing rule is the only way to make a wait time out.

#![allow(dead_code)]

use std::cell::Cell;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use trap_triage::analysis::Analyzer;
use trap_triage::config::{Credential, RuntimeConfig, TimeoutConfig, TriageConfig};
use trap_triage::console::{ProcessControl, StreamHandle};
use trap_triage::evidence::CrashEvidence;
use trap_triage::sink::ResultSink;
use trap_triage::supervisor::Launcher;
use trap_triage::types::{AnalysisReport, KernelAnalysis, UserAnalysis};
use trap_triage::{TriageError, TriageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Debugger,
    Emulator,
}

impl Side {
    fn slot(self) -> usize {
        match self {
            Side::Debugger => 0,
            Side::Emulator => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Reply(Side, String),
    Close(Side),
    Exit(Side),
}

pub fn reply(side: Side, text: &str) -> Action {
    Action::Reply(side, text.to_string())
}

struct Rule {
    side: Side,
    trigger: String,
    actions: Vec<Action>,
    used: bool,
}

#[derive(Default)]
struct State {
    senders: [Option<Sender<Vec<u8>>>; 2],
    rules: Vec<Rule>,
    sent: [Vec<String>; 2],
    alive: [Option<Arc<AtomicBool>>; 2],
}

impl State {
    fn handle_event(&mut self, side: Side, event: String) {
        self.sent[side.slot()].push(event.clone());
        let actions = match self
            .rules
            .iter_mut()
            .find(|rule| !rule.used && rule.side == side && rule.trigger == event)
        {
            Some(rule) => {
                rule.used = true;
                rule.actions.clone()
            }
            None => return,
        };
        for action in actions {
            match action {
                Action::Reply(target, text) => {
                    if let Some(tx) = &self.senders[target.slot()] {
                        let _ = tx.send(text.into_bytes());
                    }
                }
                Action::Close(target) => self.senders[target.slot()] = None,
                Action::Exit(target) => {
                    if let Some(alive) = &self.alive[target.slot()] {
                        alive.store(false, Ordering::SeqCst);
                    }
                    self.senders[target.slot()] = None;
                }
            }
        }
    }
}

struct ScriptWriter {
    side: Side,
    state: Arc<Mutex<State>>,
    line: Vec<u8>,
}

impl Write for ScriptWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            let event = match byte {
                0x03 => Some("^C".to_string()),
                b'\n' => Some(String::from_utf8_lossy(&std::mem::take(&mut self.line)).into_owned()),
                other => {
                    self.line.push(other);
                    None
                }
            };
            if let Some(event) = event {
                self.state
                    .lock()
                    .expect("rig state poisoned")
                    .handle_event(self.side, event);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Process stand-in that stays alive until killed or scripted to exit.
pub struct MockProcess {
    alive: Arc<AtomicBool>,
    kills: Arc<AtomicUsize>,
}

impl ProcessControl for MockProcess {
    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Rig {
    state: Arc<Mutex<State>>,
    kills: [Arc<AtomicUsize>; 2],
    handles: [Option<StreamHandle>; 2],
}

impl Rig {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let kills = [Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0))];
        let mut handles = [None, None];

        for (side, label) in [(Side::Debugger, "debugger"), (Side::Emulator, "emulator")] {
            let (tx, rx) = mpsc::channel();
            let alive = Arc::new(AtomicBool::new(true));
            {
                let mut guard = state.lock().expect("rig state poisoned");
                guard.senders[side.slot()] = Some(tx);
                guard.alive[side.slot()] = Some(alive.clone());
            }
            let writer = ScriptWriter {
                side,
                state: state.clone(),
                line: Vec::new(),
            };
            let process = MockProcess {
                alive,
                kills: kills[side.slot()].clone(),
            };
            handles[side.slot()] = Some(StreamHandle::new(
                label,
                rx,
                Box::new(writer),
                Box::new(process),
            ));
        }

        Self {
            state,
            kills,
            handles,
        }
    }

    /// Add a single-use rule: when `trigger` is written to `side`, run `actions`.
    pub fn on(&mut self, side: Side, trigger: &str, actions: Vec<Action>) -> &mut Self {
        self.state
            .lock()
            .expect("rig state poisoned")
            .rules
            .push(Rule {
                side,
                trigger: trigger.to_string(),
                actions,
                used: false,
            });
        self
    }

    /// Queue output on `side` right away.
    pub fn emit(&mut self, side: Side, text: &str) -> &mut Self {
        if let Some(tx) = &self.state.lock().expect("rig state poisoned").senders[side.slot()] {
            let _ = tx.send(text.as_bytes().to_vec());
        }
        self
    }

    /// Every line (or `^C`) written to `side`, in order.
    pub fn sent(&self, side: Side) -> Vec<String> {
        self.state.lock().expect("rig state poisoned").sent[side.slot()].clone()
    }

    pub fn kills(&self, side: Side) -> usize {
        self.kills[side.slot()].load(Ordering::SeqCst)
    }

    pub fn take(&mut self, side: Side) -> StreamHandle {
        self.handles[side.slot()]
            .take()
            .expect("handle already taken")
    }

    pub fn launcher(&mut self) -> ScriptedLauncher {
        ScriptedLauncher {
            emulator: Some(self.take(Side::Emulator)),
            debugger: Some(self.take(Side::Debugger)),
            fail_debugger: false,
        }
    }
}

/// Hands out the rig's streams in place of real subprocesses.
pub struct ScriptedLauncher {
    emulator: Option<StreamHandle>,
    debugger: Option<StreamHandle>,
    pub fail_debugger: bool,
}

impl Launcher for ScriptedLauncher {
    fn launch_emulator(&mut self) -> TriageResult<StreamHandle> {
        self.emulator.take().ok_or_else(|| TriageError::Spawn {
            command: "emulator".into(),
            message: "already launched".into(),
        })
    }

    fn launch_debugger(&mut self) -> TriageResult<StreamHandle> {
        if self.fail_debugger {
            return Err(TriageError::Spawn {
                command: "x86_64-elf-gdb kernel".into(),
                message: "No such file or directory".into(),
            });
        }
        self.debugger.take().ok_or_else(|| TriageError::Spawn {
            command: "debugger".into(),
            message: "already launched".into(),
        })
    }
}

/// Defaults with every wait shortened so negative paths finish quickly.
pub fn fast_config() -> TriageConfig {
    let mut config = TriageConfig::default();
    config.timeouts = TimeoutConfig {
        handshake_ms: 1_000,
        boot_ms: 1_000,
        fault_ms: 200,
        prompt_ms: 500,
        command_ms: 500,
        crash_report_ms: 200,
        interrupt_ms: 300,
        trigger_settle_ms: 0,
        quit_confirm_ms: 30,
        quit_exit_ms: 30,
    };
    config
}

pub fn runtime(config: TriageConfig) -> RuntimeConfig {
    RuntimeConfig::new(config, Credential::new("test-key").expect("valid credential"))
}

pub const FRAME_INFO: &str = "Stack level 1, frame at 0xffffffff80119fa0:\n rip = 0xffffffff80104a3e in sys_trap_test (sysproc.c:92); saved rip = 0xffffffff80104b10\n called by frame at 0xffffffff80119fd0\n";

/// Debugger greeting, remote attach and paging commands.
pub fn script_attach(rig: &mut Rig) {
    rig.emit(
        Side::Debugger,
        "GNU gdb (GDB) 13.2\nReading symbols from kernel...\n(gdb) ",
    );
    rig.on(
        Side::Debugger,
        "target remote localhost:26000",
        vec![reply(
            Side::Debugger,
            "Remote debugging using localhost:26000\n0x000000000000fff0 in ?? ()\n(gdb) ",
        )],
    );
    rig.on(Side::Debugger, "set pagination off", vec![reply(Side::Debugger, "(gdb) ")]);
    rig.on(Side::Debugger, "set height 0", vec![reply(Side::Debugger, "(gdb) ")]);
}

/// Commands of the kernel path after the breakpoint hit, in order.
pub const KERNEL_COMMANDS: [&str; 8] = [
    "bt",
    "info registers",
    "x/1xg $rsp",
    "info frame 1",
    "info symbol 0xffffffff80104b10",
    "list *0xffffffff80104b10",
    "disassemble 0xffffffff80104b10",
    "frame 0",
];

fn kernel_response(command: &str) -> String {
    let body = match command {
        "bt" => "#0  vector14 () at vectors.S:56\n#1  0xffffffff80104a3e in sys_trap_test () at sysproc.c:92\n#2  0xffffffff80104b10 in syscall () at syscall.c:140\n",
        "info registers" => "rax            0x0                 0\nrip            0xffffffff80105e6a  0xffffffff80105e6a <vector14+2>\ncr2            0x0                 0\n",
        "x/1xg $rsp" => "0xffffffff80119f88:\t0x0000000000000002\n",
        "info frame 1" => FRAME_INFO,
        "info symbol 0xffffffff80104b10" => "syscall + 64 in section .text\n",
        "list *0xffffffff80104b10" => "0xffffffff80104b10 is in syscall (syscall.c:140).\n140\t    proc->tf->rax = syscalls[num]();\n",
        "disassemble 0xffffffff80104b10" => "Dump of assembler code for function syscall:\n   0xffffffff80104b0c <+60>:\tcall   *%rax\nEnd of assembler dump.\n",
        _ => "#0  vector14 () at vectors.S:56\n",
    };
    // a pty echoes the command back ahead of its output
    format!("{}\n{}\n(gdb) ", command, body)
}

/// Full kernel scenario. When `fail_at` names a step, the debugger console
/// closes instead of answering it. Steps: "break", "c", "trap_test" or one of
/// [`KERNEL_COMMANDS`].
pub fn script_kernel(rig: &mut Rig, fail_at: Option<&str>) {
    let step = |name: &str, actions: Vec<Action>| -> Vec<Action> {
        if fail_at == Some(name) {
            vec![Action::Close(Side::Debugger)]
        } else {
            actions
        }
    };

    script_attach(rig);
    rig.on(
        Side::Debugger,
        "break vectors.S:56",
        step(
            "break",
            vec![reply(
                Side::Debugger,
                "Breakpoint 1 at 0xffffffff80105e68: file vectors.S, line 56.\n(gdb) ",
            )],
        ),
    );
    rig.on(
        Side::Debugger,
        "c",
        step(
            "c",
            vec![
                reply(Side::Debugger, "Continuing.\n"),
                reply(
                    Side::Emulator,
                    "SeaBIOS (version 1.16.2)\ncpu0: starting xv6\ninit: starting sh\n$ ",
                ),
            ],
        ),
    );
    rig.on(
        Side::Emulator,
        "trap_test",
        step(
            "trap_test",
            vec![reply(
                Side::Debugger,
                "\nThread 1 hit Breakpoint 1, vector14 () at vectors.S:56\n56\t  push $14\n(gdb) ",
            )],
        ),
    );
    for command in KERNEL_COMMANDS {
        let response = kernel_response(command);
        rig.on(
            Side::Debugger,
            command,
            step(command, vec![reply(Side::Debugger, &response)]),
        );
    }
}

pub const USER_REPORT: &str = "=== USER CRASH REPORT ===\npid 3 user_crash: trap 14 err 6 on cpu 0\nRIP: 0x1a2b\nRSP: 0x2fd0\n=== END CRASH REPORT ===";

/// User scenario up to the program launch; `program_output` is what the
/// emulator prints after `user_crash` is typed.
pub fn script_user(rig: &mut Rig, program_output: &str) {
    script_attach(rig);
    rig.on(
        Side::Debugger,
        "c",
        vec![
            reply(Side::Debugger, "Continuing.\n"),
            reply(Side::Emulator, "init: starting sh\n$ "),
        ],
    );
    rig.on(
        Side::Emulator,
        "user_crash",
        vec![reply(Side::Emulator, &format!("user_crash\n{}\n$ ", program_output))],
    );
}

/// Interrupt, symbol switch with both confirmations, and the triad at 0x1a2b.
pub fn script_user_debugger(rig: &mut Rig) {
    rig.on(
        Side::Debugger,
        "^C",
        vec![reply(
            Side::Debugger,
            "\nThread 1 received signal SIGINT, Interrupt.\n0xffffffff80100e2a in ?? ()\n(gdb) ",
        )],
    );
    rig.on(
        Side::Debugger,
        "file _user_crash",
        vec![reply(
            Side::Debugger,
            "A program is being debugged already.\nAre you sure you want to change the file? (y or n) ",
        )],
    );
    rig.on(
        Side::Debugger,
        "y",
        vec![reply(
            Side::Debugger,
            "Load new symbol table from \"/src/xv6/_user_crash\"? (y or n) ",
        )],
    );
    rig.on(
        Side::Debugger,
        "y",
        vec![reply(Side::Debugger, "Reading symbols from _user_crash...\n(gdb) ")],
    );
    script_user_triad(rig);
}

/// Source, disassembly and symbol lookups at 0x1a2b.
pub fn script_user_triad(rig: &mut Rig) {
    rig.on(
        Side::Debugger,
        "list *0x1a2b",
        vec![reply(
            Side::Debugger,
            "list *0x1a2b\n0x1a2b is in main (user_crash.c:12).\n12\t  *p = 42;\n(gdb) ",
        )],
    );
    rig.on(
        Side::Debugger,
        "disassemble 0x1a2b",
        vec![reply(
            Side::Debugger,
            "disassemble 0x1a2b\nDump of assembler code for function main:\n=> 0x1a2b <+27>:\tmovl   $0x2a,(%rax)\nEnd of assembler dump.\n(gdb) ",
        )],
    );
    rig.on(
        Side::Debugger,
        "info symbol 0x1a2b",
        vec![reply(Side::Debugger, "info symbol 0x1a2b\nmain + 27 in section .text\n(gdb) ")],
    );
}

/// Line the debugger receives when the console is resynchronised for the
/// `n`th time.
pub fn sync_command(n: u32) -> String {
    format!("echo __sync_{}__\\n", n)
}

/// Debugger output for a resync: `late` (output that missed its prompt),
/// then the echoed sentinel command, the sentinel itself and a fresh prompt.
pub fn sync_reply(late: &str, n: u32) -> String {
    format!("{}{}\n__sync_{}__\n(gdb) ", late, sync_command(n), n)
}

/// Analyzer that counts calls and returns a canned report.
pub struct CannedAnalyzer {
    pub calls: Cell<usize>,
}

impl CannedAnalyzer {
    pub fn new() -> Self {
        Self { calls: Cell::new(0) }
    }
}

impl Analyzer for CannedAnalyzer {
    fn analyze(&self, evidence: &CrashEvidence) -> AnalysisReport {
        self.calls.set(self.calls.get() + 1);
        match evidence.mode {
            trap_triage::types::Mode::Kernel => AnalysisReport::Kernel(KernelAnalysis {
                root_cause: "null pointer dereference".into(),
                faulty_function: "sys_trap_test (sysproc.c)".into(),
                faulty_line: "sysproc.c:92".into(),
                severity: "High".into(),
                analysis_summary: "CR2 is zero".into(),
                suggested_fix_patch: "--- a/sysproc.c\n+++ b/sysproc.c\n".into(),
            }),
            trap_triage::types::Mode::User => AnalysisReport::User(UserAnalysis {
                root_cause: "write through null pointer".into(),
                trap_type_explanation: "trap 14 is a page fault".into(),
                faulty_line: "user_crash.c:12".into(),
                explanation: "RIP points at the store".into(),
                severity: "High".into(),
                suggested_fix: "if (p) *p = 42;".into(),
            }),
        }
    }
}

/// Sink that remembers what it was given.
#[derive(Default)]
pub struct MemorySink {
    pub persisted: Vec<(CrashEvidence, AnalysisReport)>,
}

impl ResultSink for MemorySink {
    fn persist(
        &mut self,
        evidence: &CrashEvidence,
        report: &AnalysisReport,
    ) -> anyhow::Result<Vec<PathBuf>> {
        self.persisted.push((evidence.clone(), report.clone()));
        Ok(Vec::new())
    }
}
