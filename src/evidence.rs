// SPDX-License-Identifier: PMPL-1.0-or-later

//! Evidence assembly
//!
//! Raw command/response captures are normalised into one canonical record:
//! blank lines and echoed command lines are dropped, and fields are laid out
//! under fixed headers in a fixed order for each mode. Assembly is a pure
//! function of its input.

use crate::types::Mode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of one evidence field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldLabel {
    Backtrace,
    Registers,
    SavedReturnInfo,
    CallerSymbol,
    SourceAtCallSite,
    CallerDisassembly,
    StackDump,
    CrashReportBlock,
    FaultingAddress,
    SourceAtFault,
    SymbolAtFault,
    DisassemblyAtFault,
}

const KERNEL_LAYOUT: &[FieldLabel] = &[
    FieldLabel::Backtrace,
    FieldLabel::Registers,
    FieldLabel::SavedReturnInfo,
    FieldLabel::CallerSymbol,
    FieldLabel::SourceAtCallSite,
    FieldLabel::CallerDisassembly,
    FieldLabel::StackDump,
];

const USER_LAYOUT: &[FieldLabel] = &[
    FieldLabel::CrashReportBlock,
    FieldLabel::FaultingAddress,
    FieldLabel::SourceAtFault,
    FieldLabel::SymbolAtFault,
    FieldLabel::DisassemblyAtFault,
];

impl FieldLabel {
    pub fn header(&self) -> &'static str {
        match self {
            FieldLabel::Backtrace => "BACKTRACE",
            FieldLabel::Registers => "REGISTERS",
            FieldLabel::SavedReturnInfo => "SAVED RETURN ADDRESS INFO",
            FieldLabel::CallerSymbol => "CALLING FUNCTION",
            FieldLabel::SourceAtCallSite => "SOURCE CODE AT CALLING SITE",
            FieldLabel::CallerDisassembly => "DISASSEMBLY OF CALLING FUNCTION",
            FieldLabel::StackDump => "STACK ANALYSIS",
            FieldLabel::CrashReportBlock => "CRASH REPORT",
            FieldLabel::FaultingAddress => "FAULTING ADDRESS",
            FieldLabel::SourceAtFault => "SOURCE AT FAULT",
            FieldLabel::SymbolAtFault => "SYMBOL AT FAULT",
            FieldLabel::DisassemblyAtFault => "DISASSEMBLY AT FAULT",
        }
    }

    /// Field order of the evidence document for `mode`.
    pub fn layout(mode: Mode) -> &'static [FieldLabel] {
        match mode {
            Mode::Kernel => KERNEL_LAYOUT,
            Mode::User => USER_LAYOUT,
        }
    }
}

/// A field value that either came from a completed exchange or is explicitly
/// marked unavailable with a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "lowercase")]
pub enum Field {
    Captured(String),
    Unavailable(String),
}

impl Field {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Field::Unavailable(reason.into())
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Field::Captured(text) => Some(text),
            Field::Unavailable(_) => None,
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, Field::Captured(_))
    }
}

/// One raw capture as produced by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCapture {
    pub label: FieldLabel,
    /// Command whose echo should be stripped, if any.
    pub command: Option<String>,
    pub field: Field,
}

impl RawCapture {
    pub fn response(label: FieldLabel, command: &str, field: Field) -> Self {
        Self {
            label,
            command: Some(command.to_string()),
            field,
        }
    }

    pub fn direct(label: FieldLabel, field: Field) -> Self {
        Self {
            label,
            command: None,
            field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceField {
    pub label: FieldLabel,
    pub value: Field,
}

/// Canonical crash evidence record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashEvidence {
    pub mode: Mode,
    pub fields: Vec<EvidenceField>,
}

impl CrashEvidence {
    pub fn field(&self, label: FieldLabel) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.label == label)
            .map(|f| &f.value)
    }

    /// Captured text of `label`, if it was captured.
    pub fn text(&self, label: FieldLabel) -> Option<&str> {
        self.field(label).and_then(Field::text)
    }

    /// A user-mode record without a recoverable fault address carries only
    /// the crash report block.
    pub fn is_degraded(&self) -> bool {
        self.mode == Mode::User
            && !self
                .field(FieldLabel::FaultingAddress)
                .map(Field::is_captured)
                .unwrap_or(false)
    }

    /// Render the evidence document submitted for analysis.
    pub fn document(&self) -> String {
        let degraded = self.is_degraded();
        let mut sections = Vec::new();
        for entry in &self.fields {
            if degraded && entry.label != FieldLabel::CrashReportBlock {
                continue;
            }
            let body = match &entry.value {
                Field::Captured(text) if text.is_empty() => "(no output)".to_string(),
                Field::Captured(text) => text.clone(),
                Field::Unavailable(reason) => format!("[unavailable: {}]", reason),
            };
            sections.push(format!("{}:\n{}\n", entry.label.header(), body));
        }
        sections.join("\n")
    }

    /// SHA-256 of the rendered document, hex encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.document().as_bytes()))
    }
}

/// Drop blank lines and echoes of `command`, trim trailing whitespace.
pub fn normalize(raw: &str, command: Option<&str>) -> String {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| match command {
            Some(cmd) => line.trim() != cmd.trim(),
            None => true,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the canonical record for `mode` from raw captures. Labels outside the
/// mode's layout are ignored; layout labels with no capture are marked
/// unavailable. When a label is captured more than once the last one wins.
pub fn assemble(mode: Mode, raw: &[RawCapture]) -> CrashEvidence {
    let fields = FieldLabel::layout(mode)
        .iter()
        .map(|label| {
            let value = raw
                .iter()
                .rev()
                .find(|capture| capture.label == *label)
                .map(|capture| match &capture.field {
                    Field::Captured(text) => {
                        Field::Captured(normalize(text, capture.command.as_deref()))
                    }
                    Field::Unavailable(reason) => Field::Unavailable(reason.clone()),
                })
                .unwrap_or_else(|| Field::unavailable("not captured"));
            EvidenceField {
                label: *label,
                value,
            }
        })
        .collect();

    CrashEvidence { mode, fields }
}
