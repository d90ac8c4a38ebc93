// SPDX-License-Identifier: PMPL-1.0-or-later

//! Trap-Triage: reproduce an OS crash under QEMU + GDB and triage it.
//!
//! A session boots the guest in an emulator halted at reset, attaches a
//! debugger to the emulator's control port, provokes a scripted fault and
//! collects the machine state at the trap. The collected evidence is sent to
//! an analysis service, and the resulting root-cause report and suggested
//! patch are written out.
//!
//! PIECES:
//! 1. **Console**: ordered pattern waits over subprocess output, plus the
//!    one-way hand-off between the emulator and debugger consoles.
//! 2. **Capture**: kernel-trap and user-fault state machines behind one trait.
//! 3. **Evidence**: pure normalisation of raw captures into a fixed layout.
//! 4. **Analysis**: schema-checked service calls with bounded backoff.
//! 5. **Session**: orchestration with guaranteed subprocess teardown.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod error;
pub mod evidence;
pub mod handshake;
pub mod image;
pub mod prompts;
pub mod report;
pub mod session;
pub mod sink;
pub mod supervisor;
pub mod types;

pub use error::{TriageError, TriageResult};
