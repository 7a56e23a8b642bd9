//! Recognition of one source line into its label, operator, operand
//! and comment parts.
//!
//! The operand-plus-comment tail is kept exactly as written because
//! later stages need to see the original text: literal capture must
//! match `[` `]` across operand boundaries and text pseudo-ops scan
//! for their own delimiters, which may hide a `;`.

use std::ops::Deref;
use std::sync::OnceLock;

use regex::Regex;

use super::types::ProgramError;

pub(crate) struct LazyRegex {
    once: OnceLock<Regex>,
    pattern: &'static str,
}

impl LazyRegex {
    pub(crate) const fn new(pattern: &'static str) -> Self {
        LazyRegex {
            once: OnceLock::new(),
            pattern,
        }
    }
}

impl Deref for LazyRegex {
    type Target = Regex;

    fn deref(&self) -> &Regex {
        self.once.get_or_init(|| match Regex::new(self.pattern) {
            Ok(r) => r,
            Err(e) => {
                panic!("'{}' is not a valid regular expression: {e}", self.pattern);
            }
        })
    }
}

// The symbol class: `$`, `%`, `.` and `?` count as letters, and a
// symbol cannot start with a digit.
static LINE_RX: LazyRegex = LazyRegex::new(concat!(
    "(?i)^\\s*",
    "(?:([A-Z$%.?][0-9A-Z$%.]*)(::?)\\s*)?",
    "(?:([A-Z$%.?][0-9A-Z$%.]*))?",
    "([ \\t]*)",
    "(.*)$",
));

pub(crate) fn is_symbol_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '$' | '%' | '.' | '?')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Label {
    pub(crate) name: String,
    pub(crate) internal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TokenizedLine {
    pub(crate) label: Option<Label>,
    pub(crate) op: Option<String>,
    pub(crate) separator: String,
    /// Operand text, up to the start of the comment.
    pub(crate) operands: String,
    /// The comment, `;` included.
    pub(crate) comment: String,
    /// Operands and comment exactly as written.
    pub(crate) raw_tail: String,
}

impl TokenizedLine {
    pub(crate) fn op_upper(&self) -> Option<String> {
        self.op.as_ref().map(|op| op.to_ascii_uppercase())
    }
}

pub(crate) fn tokenize(line: &str, line_number: usize) -> Result<TokenizedLine, ProgramError> {
    let caps = match LINE_RX.captures(line) {
        Some(caps) => caps,
        None => {
            // The tail group swallows almost anything, so a complete
            // mismatch indicates something like an interior NUL.
            return Err(ProgramError::Syntax {
                line: line_number,
                msg: format!("unrecognisable line '{line}'"),
            });
        }
    };

    let label = caps.get(1).map(|m| Label {
        name: m.as_str().to_string(),
        internal: caps.get(2).map(|c| c.as_str() == "::").unwrap_or(false),
    });
    let op = caps.get(3).map(|m| m.as_str().to_string());
    let separator = caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default();
    let raw_tail = caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default();

    if label.is_none() && op.is_none() {
        // A leading token containing ':' here means the label failed
        // to lex (e.g. it starts with a digit).
        let head = raw_tail
            .trim_start()
            .split([' ', '\t', ';'])
            .next()
            .unwrap_or("");
        if head.contains(':') {
            return Err(ProgramError::Syntax {
                line: line_number,
                msg: format!("unrecognisable line '{line}'"),
            });
        }
    }

    let (operands, comment) = match raw_tail.find(';') {
        Some(pos) => (raw_tail[..pos].to_string(), raw_tail[pos..].to_string()),
        None => (raw_tail.clone(), String::new()),
    };

    Ok(TokenizedLine {
        label,
        op,
        separator,
        operands,
        comment,
        raw_tail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(line: &str) -> TokenizedLine {
        tokenize(line, 1).expect("line should tokenize")
    }

    #[test]
    fn test_blank_and_comment_lines() {
        let t = tok("");
        assert_eq!(t.label, None);
        assert_eq!(t.op, None);
        assert_eq!(t.operands, "");

        let t = tok("   ; just a comment");
        assert_eq!(t.op, None);
        assert_eq!(t.operands, "");
        assert_eq!(t.comment, "; just a comment");
    }

    #[test]
    fn test_plain_instruction() {
        let t = tok("\tMOVE 1,2 ;copy");
        assert_eq!(t.label, None);
        assert_eq!(t.op.as_deref(), Some("MOVE"));
        assert_eq!(t.operands, "1,2 ");
        assert_eq!(t.comment, ";copy");
        assert_eq!(t.raw_tail, "1,2 ;copy");
    }

    #[test]
    fn test_label_forms() {
        let t = tok("START: JRST GO");
        assert_eq!(
            t.label,
            Some(Label {
                name: "START".to_string(),
                internal: false
            })
        );
        assert_eq!(t.op.as_deref(), Some("JRST"));

        let t = tok("GLOB:: 0");
        assert_eq!(
            t.label,
            Some(Label {
                name: "GLOB".to_string(),
                internal: true
            })
        );
        assert_eq!(t.op, None);
        assert_eq!(t.operands, "0");
    }

    #[test]
    fn test_bare_expression_line() {
        let t = tok("135531,,246642");
        assert_eq!(t.label, None);
        assert_eq!(t.op, None);
        assert_eq!(t.operands, "135531,,246642");
    }

    #[test]
    fn test_assignment_shape() {
        let t = tok("FOO=123");
        assert_eq!(t.op.as_deref(), Some("FOO"));
        assert_eq!(t.operands, "=123");
    }

    #[test]
    fn test_symbol_class() {
        let t = tok("?00001");
        assert_eq!(t.op.as_deref(), Some("?00001"));
        let t = tok("$X.Y 5");
        assert_eq!(t.op.as_deref(), Some("$X.Y"));
    }

    #[test]
    fn test_bad_label_is_syntax_error() {
        assert!(tokenize("1ABC: 0", 7).is_err());
        match tokenize("1ABC: 0", 7) {
            Err(e) => assert_eq!(e.line(), 7),
            Ok(_) => panic!("expected a syntax error"),
        }
    }

    #[test]
    fn test_lower_case_folds_like_upper() {
        let t = tok("start: move 1,2");
        assert_eq!(t.op_upper().as_deref(), Some("MOVE"));
        assert_eq!(t.label.unwrap().name, "start");
    }
}
