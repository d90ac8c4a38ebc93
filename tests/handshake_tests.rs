// SPDX-License-Identifier: PMPL-1.0-or-later

//! Debugger attach handshake

mod common;

use common::*;
use trap_triage::config::TriageConfig;
use trap_triage::handshake::establish;
use trap_triage::prompts::Prompts;
use trap_triage::TriageError;

fn attempt(rig: &mut Rig) -> Result<(), TriageError> {
    let config = fast_config();
    let prompts = Prompts::from_config(&config).expect("default prompts should compile");
    let mut debugger = rig.take(Side::Debugger);
    let mut emulator = rig.take(Side::Emulator);
    establish(
        &mut debugger,
        &mut emulator,
        config.debugger.port,
        &prompts,
        &config.timeouts,
    )
}

#[test]
fn test_attach_and_disable_paging() {
    let mut rig = Rig::new();
    script_attach(&mut rig);

    attempt(&mut rig).expect("handshake should succeed");

    assert_eq!(
        rig.sent(Side::Debugger),
        vec![
            "target remote localhost:26000".to_string(),
            "set pagination off".to_string(),
            "set height 0".to_string(),
        ]
    );
    assert!(rig.sent(Side::Emulator).is_empty());
}

#[test]
fn test_refusal_is_fatal_and_not_retried() {
    let mut rig = Rig::new();
    rig.emit(Side::Debugger, "(gdb) ");
    rig.on(
        Side::Debugger,
        "target remote localhost:26000",
        vec![reply(
            Side::Debugger,
            "localhost:26000: Connection refused.\n(gdb) ",
        )],
    );

    match attempt(&mut rig) {
        Err(TriageError::ConnectionRefused { port }) => assert_eq!(port, 26000),
        other => panic!("expected connection refused, got {:?}", other),
    }
    let attaches = rig
        .sent(Side::Debugger)
        .iter()
        .filter(|l| l.starts_with("target remote"))
        .count();
    assert_eq!(attaches, 1);
}

#[test]
fn test_pending_breakpoint_question_answered() {
    let mut rig = Rig::new();
    rig.emit(
        Side::Debugger,
        "Function \"vectors\" not defined.\nMake breakpoint pending on future shared library load? (y or [n]) ",
    );
    rig.on(Side::Debugger, "y", vec![reply(Side::Debugger, "(gdb) ")]);
    rig.on(
        Side::Debugger,
        "target remote localhost:26000",
        vec![reply(Side::Debugger, "Remote debugging using localhost:26000\n(gdb) ")],
    );
    rig.on(Side::Debugger, "set pagination off", vec![reply(Side::Debugger, "(gdb) ")]);
    rig.on(Side::Debugger, "set height 0", vec![reply(Side::Debugger, "(gdb) ")]);

    attempt(&mut rig).expect("handshake should succeed");
    assert_eq!(rig.sent(Side::Debugger)[0], "y");
}

#[test]
fn test_missing_paging_prompt_is_only_a_warning() {
    let mut rig = Rig::new();
    rig.emit(Side::Debugger, "(gdb) ");
    rig.on(
        Side::Debugger,
        "target remote localhost:26000",
        vec![reply(Side::Debugger, "Remote debugging using localhost:26000\n(gdb) ")],
    );
    // no answers to the paging commands

    attempt(&mut rig).expect("paging timeouts should not abort the handshake");
}

#[test]
fn test_silent_debugger_times_out() {
    let mut rig = Rig::new();
    match attempt(&mut rig) {
        Err(TriageError::CaptureTimeout { step, .. }) => {
            assert_eq!(step, "initial debugger prompt")
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[test]
fn test_custom_port_used_in_attach() {
    let mut config = TriageConfig::default();
    config.debugger.port = 1234;
    assert!(config
        .emulator
        .expanded_args(config.debugger.port)
        .iter()
        .any(|arg| arg == "tcp::1234"));
}
