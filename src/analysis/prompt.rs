// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request bodies for the analysis service
//!
//! The text here is data: a task description per mode plus a response schema
//! whose required fields match [`KernelAnalysis`](crate::types::KernelAnalysis)
//! and [`UserAnalysis`](crate::types::UserAnalysis).

use crate::evidence::CrashEvidence;
use crate::types::Mode;
use serde_json::{json, Value};

const KERNEL_SYSTEM: &str = "You are an operating systems debugging expert working on a small \
teaching kernel written in C and x86-64 assembly. You are given the machine state captured at \
the page-fault trap entry. Work out the root cause (for example a null pointer dereference, a \
stack overflow or an out-of-bounds access), name the code responsible, rate the severity and \
propose a fix.";

const KERNEL_QUERY: &str = "A kernel trap (page fault) was caught at the trap handler entry. The \
evidence below contains the backtrace, the CPU registers (CR2 holds the faulting address), the \
caller frame with its saved return address, the source and disassembly around that return \
address, and the word at the top of the stack.\n\n\
Using this evidence:\n\
1. Identify the exact function and line that caused the fault.\n\
2. Explain how that code leads to the trap.\n\
3. Give a concrete patch naming the file and line, as a unified diff where possible.";

const USER_SYSTEM: &str = "You are an operating systems debugging expert working on a small \
teaching kernel and its user programs. You are given the crash report the kernel printed when \
a user process trapped, along with debugger output for the faulting instruction. Explain the \
trap type, find the faulting source line, rate the severity and propose a fix.";

const USER_QUERY: &str = "A user process was killed by a trap. The evidence below contains the \
kernel's crash report (trap number, error code, faulting address and registers) followed by \
the source line, symbol and disassembly at the faulting instruction when they could be \
recovered.\n\n\
Using this evidence:\n\
1. Explain what the trap number means.\n\
2. Identify the faulting line in the user program.\n\
3. Suggest a corrected version of the code.";

const USER_DEGRADED_NOTE: &str = "The faulting address could not be recovered, so only the raw \
crash report is available.";

pub fn system_instruction(mode: Mode) -> &'static str {
    match mode {
        Mode::Kernel => KERNEL_SYSTEM,
        Mode::User => USER_SYSTEM,
    }
}

pub fn user_query(evidence: &CrashEvidence) -> String {
    let mut query = String::from(match evidence.mode {
        Mode::Kernel => KERNEL_QUERY,
        Mode::User => USER_QUERY,
    });
    if evidence.is_degraded() {
        query.push_str("\n\n");
        query.push_str(USER_DEGRADED_NOTE);
    }
    query.push_str("\n\n--- Captured Debug Data ---\n");
    query.push_str(&evidence.document());
    query
}

fn string_field(description: &str) -> Value {
    json!({ "type": "STRING", "description": description })
}

/// Response schema with every field required.
pub fn response_schema(mode: Mode) -> Value {
    let fields: &[(&str, &str)] = match mode {
        Mode::Kernel => &[
            ("rootCause", "The specific technical reason for the fault."),
            ("faultyFunction", "Function name and file that contain the bug."),
            ("faultyLine", "Line number or code snippet that caused the fault."),
            ("severity", "High, Medium, or Low."),
            ("analysisSummary", "How the captured state points to the root cause."),
            ("suggestedFixPatch", "Unified diff or exact code changes with file names and line numbers."),
        ],
        Mode::User => &[
            ("rootCause", "The specific technical reason for the fault."),
            ("trapTypeExplanation", "What the trap number means on x86-64."),
            ("faultyLine", "The line of user code that faulted."),
            ("explanation", "How the crash report and debugger output support the diagnosis."),
            ("severity", "High, Medium, or Low."),
            ("suggestedFix", "Corrected code for the faulty line or function."),
        ],
    };

    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|(name, description)| (name.to_string(), string_field(description)))
        .collect();
    let required: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();

    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": required,
    })
}

/// Full request body for one analysis call.
pub fn build_payload(evidence: &CrashEvidence) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": user_query(evidence) }] }],
        "systemInstruction": { "parts": [{ "text": system_instruction(evidence.mode) }] },
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(evidence.mode),
        },
    })
}
