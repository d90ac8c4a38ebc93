// SPDX-License-Identifier: PMPL-1.0-or-later

//! Report output module

pub mod formatter;

use crate::session::{Postmortem, SessionOutcome};

pub use formatter::ReportFormatter;

/// Print a finished session to the console
pub fn print_outcome(outcome: &SessionOutcome) {
    ReportFormatter::new().print_outcome(outcome);
}

/// Print the post-mortem of a failed session
pub fn print_postmortem(postmortem: &Postmortem) {
    ReportFormatter::new().print_postmortem(postmortem);
}
