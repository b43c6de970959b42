//! Compiler diagnostics, parsed from rustc's JSON output.

use std::fmt;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// `file:line:column` of the primary span, if any.
    pub location: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Parse one line of `rustc --error-format=json` output.
    pub fn from_rustc_json(line: &str) -> Option<Self> {
        let raw: RawDiagnostic = serde_json::from_str(line).ok()?;
        raw.into_diagnostic()
    }

    /// Parse one line of `cargo --message-format=json` output. Only
    /// `compiler-message` records carry diagnostics.
    pub fn from_cargo_json(line: &str) -> Option<Self> {
        let message: CargoMessage = serde_json::from_str(line).ok()?;
        if message.reason != "compiler-message" {
            return None;
        }
        message.message?.into_diagnostic()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {} ({})", self.severity, self.message, location),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: String,
    message: Option<RawDiagnostic>,
}

#[derive(Debug, Deserialize)]
struct RawDiagnostic {
    message: String,
    level: String,
    #[serde(default)]
    spans: Vec<RawSpan>,
}

#[derive(Debug, Deserialize)]
struct RawSpan {
    file_name: String,
    line_start: usize,
    column_start: usize,
    is_primary: bool,
}

impl RawDiagnostic {
    fn into_diagnostic(self) -> Option<Diagnostic> {
        let severity = match self.level.as_str() {
            "error" | "error: internal compiler error" => Severity::Error,
            "warning" => Severity::Warning,
            "note" | "help" | "failure-note" => Severity::Note,
            _ => return None,
        };
        // Summary lines like "aborting due to 2 previous errors" carry no span
        // and would double-count errors.
        if self.spans.is_empty() && is_summary(severity, &self.message) {
            return None;
        }
        let location = self
            .spans
            .iter()
            .find(|span| span.is_primary)
            .map(|span| format!("{}:{}:{}", span.file_name, span.line_start, span.column_start));
        Some(Diagnostic {
            severity,
            message: self.message,
            location,
        })
    }
}

fn is_summary(severity: Severity, message: &str) -> bool {
    match severity {
        Severity::Error => message.starts_with("aborting due to"),
        Severity::Warning => message.contains("warning") && message.ends_with("emitted"),
        Severity::Note => false,
    }
}
