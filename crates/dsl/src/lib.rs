//! GMAT-style mission script language
//!
//! Text is turned into an ordered list of [`AstNode`]s by [`ScriptParser`]
//! and cross-checked by [`ScriptValidator`]. Neither step ever panics on bad
//! input; problems come back as [`Diagnostic`]s.

pub mod ast;
pub mod diagnostics;
pub mod parser;
pub mod validator;

use thiserror::Error;

pub use ast::{AstNode, Command, ParseResult, ScriptValue, StopCondition};
pub use diagnostics::{codes, Diagnostic, ScriptError, ScriptWarning, Severity};
pub use parser::ScriptParser;
pub use validator::{validate_script, ScriptValidator, ValidationResult};

#[derive(Debug, Error)]
pub enum DSLError {
    #[error("Unrecognized command: {0}")]
    UnrecognizedCommand(String),
    #[error("Grammar error: {0}")]
    GrammarError(String),
}

/// Parse script text. Shorthand for [`ScriptParser::parse_script`].
pub fn parse_script(content: &str) -> ParseResult {
    ScriptParser::parse_script(content)
}
