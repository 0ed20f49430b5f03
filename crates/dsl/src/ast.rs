//! Abstract syntax tree for mission scripts

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{ScriptError, ScriptWarning};

/// A literal value appearing on the right-hand side of an assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptValue {
    /// Anything that parses as a float
    Number(f64),
    /// Unquoted text, kept verbatim
    String(String),
    /// Text that was wrapped in matching single or double quotes
    Quoted(String),
}

impl ScriptValue {
    /// Classify a raw literal.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(number) = raw.parse::<f64>() {
            return ScriptValue::Number(number);
        }

        let bytes = raw.as_bytes();
        if bytes.len() >= 2 {
            let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
            if first == last && (first == b'\'' || first == b'"') {
                return ScriptValue::Quoted(raw[1..raw.len() - 1].to_string());
            }
        }

        ScriptValue::String(raw.to_string())
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            ScriptValue::String(s) | ScriptValue::Quoted(s) => s.trim().parse().ok(),
        }
    }

    /// Text view of the value
    pub fn as_text(&self) -> String {
        match self {
            ScriptValue::String(s) | ScriptValue::Quoted(s) => s.clone(),
            ScriptValue::Number(n) => n.to_string(),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Number(n) => write!(f, "{}", n),
            ScriptValue::String(s) | ScriptValue::Quoted(s) => f.write_str(s),
        }
    }
}

/// Optional `{Obj.Prop = Value}` clause on a Propagate command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopCondition {
    pub object_name: String,
    pub property_name: String,
    pub value: ScriptValue,
}

/// Variant-specific payload of an AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Create {
        object_type: String,
        object_name: String,
    },
    Set {
        object_name: String,
        property_name: String,
        value: ScriptValue,
    },
    Propagate {
        propagator: String,
        spacecraft: String,
        stop_condition: Option<StopCondition>,
    },
    Report {
        tokens: Vec<String>,
    },
    Variable {
        name: String,
        value: ScriptValue,
    },
    Save {
        object_name: String,
    },
    If {
        condition: String,
    },
    Else,
    EndIf,
    While {
        condition: String,
    },
    EndWhile,
    Comment {
        text: String,
    },
    Unknown,
}

impl Command {
    /// Short keyword naming the command, used for progress reporting
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Create { .. } => "Create",
            Command::Set { .. } => "Set",
            Command::Propagate { .. } => "Propagate",
            Command::Report { .. } => "Report",
            Command::Variable { .. } => "Variable",
            Command::Save { .. } => "Save",
            Command::If { .. } => "If",
            Command::Else => "Else",
            Command::EndIf => "EndIf",
            Command::While { .. } => "While",
            Command::EndWhile => "EndWhile",
            Command::Comment { .. } => "Comment",
            Command::Unknown => "Unknown",
        }
    }
}

/// One parsed script line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    /// 1-based source line
    pub line_number: usize,
    /// The line as written, without the line terminator
    pub raw_text: String,
    pub command: Command,
}

impl AstNode {
    pub fn new(line_number: usize, raw_text: impl Into<String>, command: Command) -> Self {
        Self {
            line_number,
            raw_text: raw_text.into(),
            command,
        }
    }

    /// Comments and unrecognized lines are skipped at execution time and
    /// excluded from command counts.
    pub fn is_executable(&self) -> bool {
        !matches!(self.command, Command::Comment { .. } | Command::Unknown)
    }
}

/// Output of the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub is_valid: bool,
    pub ast: Vec<AstNode>,
    pub errors: Vec<ScriptError>,
    pub warnings: Vec<ScriptWarning>,
    pub line_count: usize,
    pub command_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_classification() {
        assert_eq!(ScriptValue::parse("7000"), ScriptValue::Number(7000.0));
        assert_eq!(ScriptValue::parse("-1.5e3"), ScriptValue::Number(-1500.0));
        assert_eq!(
            ScriptValue::parse("'01 Jan 2000 12:00:00.000'"),
            ScriptValue::Quoted("01 Jan 2000 12:00:00.000".to_string())
        );
        assert_eq!(
            ScriptValue::parse("\"EarthMJ2000Eq\""),
            ScriptValue::Quoted("EarthMJ2000Eq".to_string())
        );
        assert_eq!(
            ScriptValue::parse("RungeKutta89"),
            ScriptValue::String("RungeKutta89".to_string())
        );
    }

    #[test]
    fn test_mismatched_quotes_stay_verbatim() {
        assert_eq!(
            ScriptValue::parse("'abc\""),
            ScriptValue::String("'abc\"".to_string())
        );
        assert_eq!(ScriptValue::parse("'"), ScriptValue::String("'".to_string()));
    }

    #[test]
    fn test_value_views() {
        assert_eq!(ScriptValue::Quoted("42.5".to_string()).as_f64(), Some(42.5));
        assert_eq!(ScriptValue::String("abc".to_string()).as_f64(), None);
        assert_eq!(ScriptValue::Number(7000.0).to_string(), "7000");
    }

    #[test]
    fn test_executable_nodes() {
        let comment = AstNode::new(1, "% hi", Command::Comment { text: " hi".to_string() });
        let unknown = AstNode::new(2, "???", Command::Unknown);
        let endif = AstNode::new(3, "EndIf", Command::EndIf);
        assert!(!comment.is_executable());
        assert!(!unknown.is_executable());
        assert!(endif.is_executable());
    }
}
