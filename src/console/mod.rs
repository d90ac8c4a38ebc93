// SPDX-License-Identifier: PMPL-1.0-or-later

//! Pattern-driven interaction with subprocess consoles

pub mod consoles;
pub mod pattern;
pub mod stream;

pub use consoles::{Consoles, Turn};
pub use pattern::{earliest_match, Pattern, PatternMatch};
pub use stream::{ProcessControl, StreamHandle, WaitOutcome};
