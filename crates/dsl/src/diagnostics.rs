//! Errors and warnings reported against script lines

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable diagnostic codes
pub mod codes {
    /// Line matches no command
    pub const UNKNOWN_COMMAND: &str = "SE001";
    /// `Set` targets a name that was never created or declared
    pub const UNDECLARED_OBJECT: &str = "SE002";
    /// `Propagate` names an undeclared propagator
    pub const UNDECLARED_PROPAGATOR: &str = "SE003";
    /// `Propagate` names an undeclared spacecraft
    pub const UNDECLARED_SPACECRAFT: &str = "SE004";
    /// A command failed while the job was running
    pub const RUNTIME_FAILURE: &str = "SE100";

    /// `Create` reuses a name
    pub const DUPLICATE_OBJECT: &str = "SW001";
    /// `Save` names an undeclared object
    pub const SAVE_UNDECLARED: &str = "SW002";
    /// `If`/`While` blocks do not pair up
    pub const UNBALANCED_BLOCK: &str = "SW003";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// A single diagnostic attached to a script line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line_number: usize,
    pub column: usize,
    pub message: String,
    pub code: String,
    pub severity: Severity,
}

/// Diagnostic with `Severity::Error`
pub type ScriptError = Diagnostic;
/// Diagnostic with `Severity::Warning`
pub type ScriptWarning = Diagnostic;

impl Diagnostic {
    pub fn error(
        line_number: usize,
        column: usize,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            line_number,
            column,
            message: message.into(),
            code: code.to_string(),
            severity: Severity::Error,
        }
    }

    pub fn warning(
        line_number: usize,
        column: usize,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            line_number,
            column,
            message: message.into(),
            code: code.to_string(),
            severity: Severity::Warning,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} {}: {}",
            self.line_number, self.column, self.severity, self.code, self.message
        )
    }
}

/// 1-based column of the first non-blank character of `line`
pub fn first_column(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count() + 1
}
