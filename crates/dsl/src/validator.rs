//! Semantic validation
//!
//! A second pass over the AST that checks every reference against the names
//! declared so far in source order. Issues are accumulated, never short-circuited.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::{AstNode, Command, ParseResult};
use crate::diagnostics::{codes, first_column, Diagnostic, ScriptError, ScriptWarning};
use crate::parser::ScriptParser;

/// Outcome of validating a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ScriptError>,
    pub warnings: Vec<ScriptWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If,
    While,
}

#[derive(Default)]
pub struct ScriptValidator {
    declared_objects: HashSet<String>,
    declared_variables: HashSet<String>,
    open_blocks: Vec<(Block, usize, usize)>,
    errors: Vec<ScriptError>,
    warnings: Vec<ScriptWarning>,
}

impl ScriptValidator {
    /// Validate an AST on its own.
    pub fn validate(ast: &[AstNode]) -> ValidationResult {
        let mut validator = Self::default();
        for node in ast {
            validator.check(node);
        }
        validator.finish()
    }

    /// Validate a parse result, keeping the parser's diagnostics in front.
    pub fn validate_parsed(parsed: &ParseResult) -> ValidationResult {
        let semantic = Self::validate(&parsed.ast);

        let mut errors = parsed.errors.clone();
        errors.extend(semantic.errors);
        let mut warnings = parsed.warnings.clone();
        warnings.extend(semantic.warnings);

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn check(&mut self, node: &AstNode) {
        let line = node.line_number;
        let column = first_column(&node.raw_text);

        match &node.command {
            Command::Create { object_name, .. } => {
                if !self.declared_objects.insert(object_name.clone()) {
                    self.warnings.push(Diagnostic::warning(
                        line,
                        column,
                        codes::DUPLICATE_OBJECT,
                        format!("Object '{}' is already created and will be replaced", object_name),
                    ));
                }
            }
            Command::Set { object_name, .. } => {
                if !self.is_declared(object_name) {
                    self.errors.push(Diagnostic::error(
                        line,
                        column,
                        codes::UNDECLARED_OBJECT,
                        format!("Object or variable '{}' is not declared", object_name),
                    ));
                }
            }
            Command::Propagate {
                propagator,
                spacecraft,
                ..
            } => {
                if !self.declared_objects.contains(propagator) {
                    self.errors.push(Diagnostic::error(
                        line,
                        column,
                        codes::UNDECLARED_PROPAGATOR,
                        format!("Propagator '{}' is not declared", propagator),
                    ));
                }
                if !self.declared_objects.contains(spacecraft) {
                    self.errors.push(Diagnostic::error(
                        line,
                        column,
                        codes::UNDECLARED_SPACECRAFT,
                        format!("Spacecraft '{}' is not declared", spacecraft),
                    ));
                }
            }
            Command::Variable { name, .. } => {
                self.declared_variables.insert(name.clone());
            }
            Command::Save { object_name } => {
                if !self.declared_objects.contains(object_name) {
                    self.warnings.push(Diagnostic::warning(
                        line,
                        column,
                        codes::SAVE_UNDECLARED,
                        format!("Saving undeclared object '{}'", object_name),
                    ));
                }
            }
            Command::If { .. } => self.open_blocks.push((Block::If, line, column)),
            Command::While { .. } => self.open_blocks.push((Block::While, line, column)),
            Command::Else => {
                if !matches!(self.open_blocks.last(), Some((Block::If, ..))) {
                    self.unbalanced(line, column, "Else without a matching If");
                }
            }
            Command::EndIf => self.close(Block::If, line, column, "EndIf without a matching If"),
            Command::EndWhile => {
                self.close(Block::While, line, column, "EndWhile without a matching While")
            }
            Command::Report { .. } | Command::Comment { .. } | Command::Unknown => {}
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.declared_objects.contains(name) || self.declared_variables.contains(name)
    }

    fn close(&mut self, block: Block, line: usize, column: usize, message: &str) {
        match self.open_blocks.last() {
            Some((open, ..)) if *open == block => {
                self.open_blocks.pop();
            }
            _ => self.unbalanced(line, column, message),
        }
    }

    fn unbalanced(&mut self, line: usize, column: usize, message: &str) {
        self.warnings.push(Diagnostic::warning(
            line,
            column,
            codes::UNBALANCED_BLOCK,
            message,
        ));
    }

    fn finish(mut self) -> ValidationResult {
        for (block, line, column) in std::mem::take(&mut self.open_blocks) {
            let message = match block {
                Block::If => "If block is never closed with EndIf",
                Block::While => "While block is never closed with EndWhile",
            };
            self.unbalanced(line, column, message);
        }

        debug!(
            errors = self.errors.len(),
            warnings = self.warnings.len(),
            "validated script"
        );

        ValidationResult {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

/// Parse and validate script text in one step.
pub fn validate_script(content: &str) -> ValidationResult {
    ScriptValidator::validate_parsed(&ScriptParser::parse_script(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes_of(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn test_valid_script() {
        let result = validate_script(
            "Create Spacecraft Sat\nCreate Propagator Prop\nSat.X = 7000\n\
             Propagate Prop(Sat)\nReport Sat.X\nSave Sat",
        );
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_duplicate_create_is_one_warning() {
        let result = validate_script("Create Spacecraft Sat\nCreate Spacecraft Sat");
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert_eq!(codes_of(&result.warnings), vec!["SW001"]);
        assert_eq!(result.warnings[0].line_number, 2);
    }

    #[test]
    fn test_set_on_undeclared_object() {
        let result = validate_script("Foo.Bar = 1");
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "SE002");
        assert_eq!(result.errors[0].line_number, 1);
    }

    #[test]
    fn test_set_before_create_is_an_error() {
        let result = validate_script("Sat.X = 1\nCreate Spacecraft Sat");
        assert_eq!(codes_of(&result.errors), vec!["SE002"]);
    }

    #[test]
    fn test_set_on_declared_variable() {
        let result = validate_script("var orbit = 1\norbit.Count = 2");
        assert!(result.is_valid);
    }

    #[test]
    fn test_propagate_checks_both_names() {
        let result = validate_script("Create Spacecraft S\nPropagate P(S)");
        assert_eq!(codes_of(&result.errors), vec!["SE003"]);

        let result = validate_script("Propagate P(S)");
        assert_eq!(codes_of(&result.errors), vec!["SE003", "SE004"]);
        assert!(result.errors.iter().all(|e| e.line_number == 1));
    }

    #[test]
    fn test_parser_errors_are_merged_first() {
        let result = validate_script("nonsense here\nFoo.Bar = 1");
        assert_eq!(codes_of(&result.errors), vec!["SE001", "SE002"]);
    }

    #[test]
    fn test_save_of_undeclared_object_warns() {
        let result = validate_script("Save Ghost");
        assert!(result.is_valid);
        assert_eq!(codes_of(&result.warnings), vec!["SW002"]);
    }

    #[test]
    fn test_block_balance_warnings() {
        let balanced = validate_script("If a > 1\nElse\nEndIf\nWhile b < 2\nEndWhile");
        assert!(balanced.warnings.is_empty());

        let stray = validate_script("EndIf\nElse\nWhile x < 1");
        assert!(stray.is_valid);
        assert_eq!(codes_of(&stray.warnings), vec!["SW003", "SW003", "SW003"]);
        assert_eq!(stray.warnings[2].line_number, 3);
    }
}
