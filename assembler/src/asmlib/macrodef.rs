//! Macro definitions, body capture and parameter substitution.
//!
//! Named DEFINE and OPDEF macros, the anonymous REPEAT/IFx/IRP/IRPC
//! bodies, captured literals and reserved variables all live in one
//! table; the anonymous forms are filed under `?`-prefixed pseudo
//! names which cannot collide with user symbols.

use super::lexer::is_symbol_char;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Condition {
    Equal,
    Greater,
    Less,
    NotEqual,
}

impl Condition {
    pub(crate) fn holds(&self, value: i64) -> bool {
        match self {
            Condition::Equal => value == 0,
            Condition::Greater => value > 0,
            Condition::Less => value < 0,
            Condition::NotEqual => value != 0,
        }
    }

    pub(crate) fn pseudo_name(&self) -> &'static str {
        match self {
            Condition::Equal => "?IFE",
            Condition::Greater => "?IFG",
            Condition::Less => "?IFL",
            Condition::NotEqual => "?IFN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MacroKind {
    Define,
    Opdef,
    Literal,
    Reserved,
    Repeat(i64),
    If(Condition, i64),
    Irp,
    Irpc,
}

impl MacroKind {
    /// The body delimiters: angle brackets, except for the forms
    /// whose body is itself a bracketed word.
    pub(crate) fn delimiters(&self) -> (char, char) {
        match self {
            MacroKind::Opdef | MacroKind::Literal => ('[', ']'),
            _ => ('<', '>'),
        }
    }

    /// The table name for the anonymous forms.
    pub(crate) fn pseudo_name(&self) -> Option<&'static str> {
        match self {
            MacroKind::Repeat(_) => Some("?REPEAT"),
            MacroKind::If(cond, _) => Some(cond.pseudo_name()),
            MacroKind::Irp => Some("?IRP"),
            MacroKind::Irpc => Some("?IRPC"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MacroDef {
    pub(crate) name: String,
    pub(crate) kind: MacroKind,
    pub(crate) params: Vec<String>,
    pub(crate) defaults: Vec<Option<String>>,
    pub(crate) body: String,
    pub(crate) line: usize,
}

impl MacroDef {
    pub(crate) fn anonymous(kind: MacroKind, line: usize) -> MacroDef {
        let name = kind
            .pseudo_name()
            .expect("anonymous macro kinds have pseudo names")
            .to_string();
        MacroDef {
            name,
            kind,
            params: Vec::new(),
            defaults: Vec::new(),
            body: String::new(),
            line,
        }
    }
}

pub(crate) enum CaptureStep {
    Done(MacroDef),
    More(MacroCapture),
}

/// Collects a macro body, tracking delimiter nesting.  Text before
/// the opening delimiter (trailing header text, comments) is
/// discarded; the matched delimiters themselves are not part of the
/// body.
#[derive(Debug)]
pub(crate) struct MacroCapture {
    def: MacroDef,
    open: char,
    close: char,
    awaiting_open: bool,
    depth: usize,
}

impl MacroCapture {
    pub(crate) fn new(def: MacroDef) -> MacroCapture {
        let (open, close) = def.kind.delimiters();
        MacroCapture {
            def,
            open,
            close,
            awaiting_open: true,
            depth: 0,
        }
    }

    pub(crate) fn line(&self) -> usize {
        self.def.line
    }

    pub(crate) fn close_delimiter(&self) -> char {
        self.close
    }

    pub(crate) fn append(mut self, text: &str) -> CaptureStep {
        for ch in text.chars() {
            if self.awaiting_open {
                if ch == self.open {
                    self.awaiting_open = false;
                    self.depth = 1;
                }
            } else if ch == self.open {
                self.depth += 1;
                self.def.body.push(ch);
            } else if ch == self.close {
                self.depth -= 1;
                if self.depth == 0 {
                    return CaptureStep::Done(self.def);
                }
                self.def.body.push(ch);
            } else {
                self.def.body.push(ch);
            }
        }
        if !self.awaiting_open {
            self.def.body.push('\n');
        }
        CaptureStep::More(self)
    }
}

/// Replace each parameter occurrence in the operand region of `line`
/// with its bound value (or default, or nothing).  An occurrence
/// counts only when flanked by non-symbol characters; an apostrophe
/// touching the occurrence is the concatenation operator and is
/// consumed.  Returns `None` when nothing changed.
pub(crate) fn substitute_params(
    line: &str,
    params: &[String],
    values: &[String],
    defaults: &[Option<String>],
) -> Option<String> {
    let comment_start = line.find(';').unwrap_or(line.len());
    let (region, comment) = line.split_at(comment_start);
    let mut text = region.to_string();
    let mut changed = false;
    for (i, param) in params.iter().enumerate() {
        if param.is_empty() {
            continue;
        }
        let value: &str = match values.get(i) {
            Some(v) if !v.is_empty() => v,
            _ => defaults.get(i).and_then(|d| d.as_deref()).unwrap_or(""),
        };
        let (replaced, did) = replace_flanked(&text, param, value);
        if did {
            text = replaced;
            changed = true;
        }
    }
    if changed {
        Some(format!("{text}{comment}"))
    } else {
        None
    }
}

fn matches_at(chars: &[char], at: usize, wanted: &[char]) -> bool {
    chars.len() - at >= wanted.len()
        && wanted
            .iter()
            .zip(&chars[at..])
            .all(|(w, c)| w.eq_ignore_ascii_case(c))
}

fn replace_flanked(text: &str, param: &str, value: &str) -> (String, bool) {
    let chars: Vec<char> = text.chars().collect();
    let wanted: Vec<char> = param.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut changed = false;
    let mut i = 0;
    while i < chars.len() {
        let flanked = matches_at(&chars, i, &wanted)
            && (i == 0 || !is_symbol_char(chars[i - 1]))
            && (i + wanted.len() == chars.len() || !is_symbol_char(chars[i + wanted.len()]));
        if flanked {
            if out.ends_with('\'') {
                out.pop();
            }
            out.push_str(value);
            i += wanted.len();
            if chars.get(i) == Some(&'\'') {
                i += 1;
            }
            changed = true;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    (out, changed)
}
