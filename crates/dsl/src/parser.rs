//! Line-oriented script parser
//!
//! Each non-blank line is matched against the command rules in a fixed
//! order and the first rule that consumes the whole line wins. Parsing is
//! total: lines that match nothing become `Command::Unknown` nodes with an
//! `SE001` error, and parsing carries on with the next line.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use tracing::debug;

use crate::ast::{AstNode, Command, ParseResult, ScriptValue, StopCondition};
use crate::diagnostics::{codes, first_column, Diagnostic};
use crate::DSLError;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct ScriptGrammar;

/// Command rules in match priority order
const COMMAND_RULES: [Rule; 11] = [
    Rule::create_command,
    Rule::propagate_command,
    Rule::set_command,
    Rule::report_command,
    Rule::save_command,
    Rule::if_command,
    Rule::else_command,
    Rule::end_if_command,
    Rule::while_command,
    Rule::end_while_command,
    Rule::variable_command,
];

pub struct ScriptParser;

impl ScriptParser {
    /// Parse a whole script. Never fails.
    pub fn parse_script(content: &str) -> ParseResult {
        let lines = split_lines(content);
        let mut ast = Vec::new();
        let mut errors = Vec::new();

        for (index, raw) in lines.iter().enumerate() {
            let line_number = index + 1;
            if raw.trim().is_empty() {
                continue;
            }

            match Self::parse_line(line_number, raw) {
                Ok(node) => ast.push(node),
                Err(e) => {
                    errors.push(Diagnostic::error(
                        line_number,
                        first_column(raw),
                        codes::UNKNOWN_COMMAND,
                        e.to_string(),
                    ));
                    ast.push(AstNode::new(line_number, *raw, Command::Unknown));
                }
            }
        }

        let command_count = ast.iter().filter(|n| n.is_executable()).count();
        debug!(
            lines = lines.len(),
            nodes = ast.len(),
            commands = command_count,
            errors = errors.len(),
            "parsed script"
        );

        ParseResult {
            is_valid: errors.is_empty(),
            ast,
            errors,
            warnings: Vec::new(),
            line_count: lines.len(),
            command_count,
        }
    }

    /// Parse one non-blank line into a node.
    pub fn parse_line(line_number: usize, raw: &str) -> Result<AstNode, DSLError> {
        let trimmed = raw.trim();

        if let Some(text) = trimmed.strip_prefix('%') {
            let command = Command::Comment {
                text: text.trim().to_string(),
            };
            return Ok(AstNode::new(line_number, raw, command));
        }

        let text = trimmed
            .strip_suffix(';')
            .map(str::trim_end)
            .unwrap_or(trimmed);

        for rule in COMMAND_RULES {
            if let Ok(mut pairs) = ScriptGrammar::parse(rule, text) {
                let pair = pairs.next().ok_or_else(|| {
                    DSLError::GrammarError(format!("{:?} produced no match", rule))
                })?;
                let command = build_command(pair)?;
                return Ok(AstNode::new(line_number, raw, command));
            }
        }

        Err(DSLError::UnrecognizedCommand(trimmed.to_string()))
    }
}

/// Split on `\r\n`, `\r` or `\n`. A trailing terminator does not open a new line.
fn split_lines(content: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = content;

    while let Some(pos) = rest.find(|c: char| c == '\r' || c == '\n') {
        lines.push(&rest[..pos]);
        let terminator = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[pos + terminator..];
    }
    if !rest.is_empty() {
        lines.push(rest);
    }

    lines
}

fn next_text(inner: &mut Pairs<Rule>, expected: Rule) -> Result<String, DSLError> {
    match inner.next() {
        Some(pair) if pair.as_rule() == expected => Ok(pair.as_str().trim().to_string()),
        Some(pair) => Err(DSLError::GrammarError(format!(
            "expected {:?}, found {:?}",
            expected,
            pair.as_rule()
        ))),
        None => Err(DSLError::GrammarError(format!("missing {:?}", expected))),
    }
}

fn build_command(pair: Pair<Rule>) -> Result<Command, DSLError> {
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();

    let command = match rule {
        Rule::create_command => Command::Create {
            object_type: next_text(&mut inner, Rule::object_type)?,
            object_name: next_text(&mut inner, Rule::object_name)?,
        },
        Rule::propagate_command => {
            let propagator = next_text(&mut inner, Rule::propagator)?;
            let spacecraft = next_text(&mut inner, Rule::spacecraft)?;
            let stop_condition = match inner.next() {
                Some(stop) if stop.as_rule() == Rule::stop_condition => {
                    let mut fields = stop.into_inner();
                    Some(StopCondition {
                        object_name: next_text(&mut fields, Rule::object_name)?,
                        property_name: next_text(&mut fields, Rule::property_name)?,
                        value: ScriptValue::parse(&next_text(&mut fields, Rule::stop_value)?),
                    })
                }
                _ => None,
            };
            Command::Propagate {
                propagator,
                spacecraft,
                stop_condition,
            }
        }
        Rule::set_command => Command::Set {
            object_name: next_text(&mut inner, Rule::object_name)?,
            property_name: next_text(&mut inner, Rule::property_name)?,
            value: ScriptValue::parse(&next_text(&mut inner, Rule::value)?),
        },
        Rule::report_command => Command::Report {
            tokens: inner
                .filter(|p| p.as_rule() == Rule::report_token)
                .map(|p| p.as_str().to_string())
                .collect(),
        },
        Rule::save_command => Command::Save {
            object_name: next_text(&mut inner, Rule::object_name)?,
        },
        Rule::if_command => Command::If {
            condition: next_text(&mut inner, Rule::condition)?,
        },
        Rule::else_command => Command::Else,
        Rule::end_if_command => Command::EndIf,
        Rule::while_command => Command::While {
            condition: next_text(&mut inner, Rule::condition)?,
        },
        Rule::end_while_command => Command::EndWhile,
        Rule::variable_command => Command::Variable {
            name: next_text(&mut inner, Rule::variable_name)?,
            value: ScriptValue::parse(&next_text(&mut inner, Rule::value)?),
        },
        other => {
            return Err(DSLError::GrammarError(format!(
                "{:?} is not a command rule",
                other
            )))
        }
    };

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn only_command(line: &str) -> Command {
        ScriptParser::parse_line(1, line).unwrap().command
    }

    #[test]
    fn test_parse_create() {
        assert_eq!(
            only_command("Create Spacecraft Sat"),
            Command::Create {
                object_type: "Spacecraft".to_string(),
                object_name: "Sat".to_string(),
            }
        );
        assert_eq!(
            only_command("  CREATE Propagator Prop;"),
            Command::Create {
                object_type: "Propagator".to_string(),
                object_name: "Prop".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(
            only_command("Sat.Epoch = '01 Jan 2000 11:59:28.000'"),
            Command::Set {
                object_name: "Sat".to_string(),
                property_name: "Epoch".to_string(),
                value: ScriptValue::Quoted("01 Jan 2000 11:59:28.000".to_string()),
            }
        );
        assert_eq!(
            only_command("Sat.X=7000"),
            Command::Set {
                object_name: "Sat".to_string(),
                property_name: "X".to_string(),
                value: ScriptValue::Number(7000.0),
            }
        );
    }

    #[test]
    fn test_parse_propagate() {
        assert_eq!(
            only_command("Propagate Prop(Sat) {Sat.ElapsedDays = 0.5}"),
            Command::Propagate {
                propagator: "Prop".to_string(),
                spacecraft: "Sat".to_string(),
                stop_condition: Some(StopCondition {
                    object_name: "Sat".to_string(),
                    property_name: "ElapsedDays".to_string(),
                    value: ScriptValue::Number(0.5),
                }),
            }
        );
        assert_eq!(
            only_command("propagate Prop ( Sat )"),
            Command::Propagate {
                propagator: "Prop".to_string(),
                spacecraft: "Sat".to_string(),
                stop_condition: None,
            }
        );
    }

    #[test]
    fn test_parse_report_tokens() {
        assert_eq!(
            only_command("Report Sat.X  Sat.VX\tcounter"),
            Command::Report {
                tokens: vec![
                    "Sat.X".to_string(),
                    "Sat.VX".to_string(),
                    "counter".to_string()
                ],
            }
        );
    }

    #[test]
    fn test_parse_control_flow_keywords() {
        assert_eq!(
            only_command("If Sat.X > 7000"),
            Command::If {
                condition: "Sat.X > 7000".to_string()
            }
        );
        assert_eq!(only_command("else"), Command::Else);
        assert_eq!(only_command("EndIf"), Command::EndIf);
        assert_eq!(
            only_command("While counter < 10"),
            Command::While {
                condition: "counter < 10".to_string()
            }
        );
        assert_eq!(only_command("ENDWHILE"), Command::EndWhile);
    }

    #[test]
    fn test_parse_variables() {
        assert_eq!(
            only_command("var counter = 1"),
            Command::Variable {
                name: "counter".to_string(),
                value: ScriptValue::Number(1.0),
            }
        );
        assert_eq!(
            only_command("label = \"LEO\""),
            Command::Variable {
                name: "label".to_string(),
                value: ScriptValue::Quoted("LEO".to_string()),
            }
        );
        // keyword prefixes do not swallow identifiers
        assert_eq!(
            only_command("variable = 2"),
            Command::Variable {
                name: "variable".to_string(),
                value: ScriptValue::Number(2.0),
            }
        );
        assert_eq!(
            only_command("Created = yes"),
            Command::Variable {
                name: "Created".to_string(),
                value: ScriptValue::String("yes".to_string()),
            }
        );
    }

    #[test]
    fn test_unknown_line_reports_se001() {
        let result =
            ScriptParser::parse_script("Create Spacecraft Sat\n  Fly me to the moon\nSave Sat");
        assert!(!result.is_valid);
        assert_eq!(result.ast.len(), 3);
        assert_eq!(result.ast[1].command, Command::Unknown);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "SE001");
        assert_eq!(result.errors[0].line_number, 2);
        assert_eq!(result.errors[0].column, 3);
        assert_eq!(result.command_count, 2);
    }

    #[test]
    fn test_comments_never_count_or_fail() {
        let script = "% Create Spacecraft\n   %% ??? !!! = =\n%";
        let result = ScriptParser::parse_script(script);
        assert!(result.is_valid);
        assert_eq!(result.ast.len(), 3);
        assert_eq!(result.command_count, 0);
        assert!(result
            .ast
            .iter()
            .all(|n| matches!(n.command, Command::Comment { .. })));
    }

    #[test]
    fn test_line_terminators_and_numbering() {
        let result = ScriptParser::parse_script(
            "Create Spacecraft A\r\n\rCreate Spacecraft B\nCreate Spacecraft C\n",
        );
        assert_eq!(result.line_count, 4);
        let lines: Vec<usize> = result.ast.iter().map(|n| n.line_number).collect();
        assert_eq!(lines, vec![1, 3, 4]);
        assert_eq!(result.ast[0].raw_text, "Create Spacecraft A");
    }

    #[test]
    fn test_empty_script() {
        let result = ScriptParser::parse_script("");
        assert!(result.is_valid);
        assert!(result.ast.is_empty());
        assert_eq!(result.line_count, 0);
        assert_eq!(result.command_count, 0);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let script = "Create Spacecraft Sat\nSat.X = 7000\nReport Sat.X\nbogus line here\n% done";
        let first = ScriptParser::parse_script(script);
        let second = ScriptParser::parse_script(script);
        assert_eq!(first, second);
    }

    #[test]
    fn test_end_to_end_shape() {
        let result =
            ScriptParser::parse_script("Create Spacecraft Sat\nSat.X = 7000\nReport Sat.X");
        assert!(result.is_valid);
        assert_eq!(result.ast.len(), 3);
        assert_eq!(result.command_count, 3);
        assert!(result.errors.is_empty());
    }
}
