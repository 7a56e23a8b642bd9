//! The debugger-side services an assembler needs: an expression
//! parser over a variable table, a PDP-10 instruction encoder, and a
//! console sink for diagnostic lines.
//!
//! The variable table can be snapshotted and restored around an
//! assembly so that assembling a program leaves the debugger's own
//! symbol environment unchanged.

#![deny(unreachable_pub)]
#![deny(unsafe_code)]

mod eval;

pub use eval::EvalError;

use std::collections::HashMap;

use tracing::{event, Level};

use base::instruction::{
    opcode_base, InstructionClass, ADDRESS_MASK, AC_SHIFT, DEVICE_SHIFT, INDEX_SHIFT, IND_BIT,
};
use base::prelude::Unsigned36Bit;

/// Symbol names are significant to six characters, upper case.
pub(crate) fn normalise_name(name: &str) -> String {
    name.trim()
        .chars()
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase()
}

/// The result of encoding one instruction.  When the address field
/// could not yet be evaluated, `word` carries Y=0 and `deferred`
/// holds the address expression so the caller can patch the word
/// once every symbol is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub word: Unsigned36Bit,
    pub deferred: Option<String>,
}

#[derive(Debug, Default)]
enum Console {
    #[default]
    Stdout,
    Buffer(Vec<String>),
}

#[derive(Debug, Default)]
pub struct Debugger {
    variables: HashMap<String, i64>,
    snapshot: Option<HashMap<String, i64>>,
    console: Console,
}

impl Debugger {
    pub fn new() -> Debugger {
        Debugger::default()
    }

    /// A debugger whose console lines are collected rather than
    /// printed; used by tests and embedders.
    pub fn with_buffered_console() -> Debugger {
        Debugger {
            console: Console::Buffer(Vec::new()),
            ..Debugger::default()
        }
    }

    pub fn set_variable(&mut self, name: &str, value: i64) {
        self.variables.insert(normalise_name(name), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<i64> {
        self.variables.get(&normalise_name(name)).copied()
    }

    /// Snapshot the variable table; `restore_variables` puts the
    /// snapshot back.
    pub fn reset_variables(&mut self) {
        self.snapshot = Some(self.variables.clone());
    }

    pub fn restore_variables(&mut self) {
        if let Some(saved) = self.snapshot.take() {
            self.variables = saved;
        }
    }

    pub fn println(&mut self, line: &str) {
        match &mut self.console {
            Console::Stdout => println!("{line}"),
            Console::Buffer(lines) => lines.push(line.to_string()),
        }
    }

    /// Drain the buffered console lines.  Empty when the console
    /// prints directly.
    pub fn take_console_lines(&mut self) -> Vec<String> {
        match &mut self.console {
            Console::Stdout => Vec::new(),
            Console::Buffer(lines) => std::mem::take(lines),
        }
    }

    /// Evaluate an infix expression.  `Ok(None)` means an undefined
    /// symbol was referenced and `pass1` permits deferral.
    pub fn parse_expression(&self, text: &str, pass1: bool) -> Result<Option<i64>, EvalError> {
        eval::evaluate(text, &self.variables, pass1)
    }

    /// Render a value the way the expression parser reads numbers
    /// back in: octal.
    pub fn format_word(&self, n: i64) -> String {
        if n < 0 {
            format!("-{:o}", n.unsigned_abs())
        } else {
            format!("{n:o}")
        }
    }

    /// Keep the low `bits` bits of `n`; `unsigned` selects zero- or
    /// sign-extension of the result.
    pub fn truncate(&self, n: i64, bits: u32, unsigned: bool) -> i64 {
        if bits >= 64 {
            return n;
        }
        let mask = (1_i64 << bits) - 1;
        let low = n & mask;
        if unsigned || low & (1_i64 << (bits - 1)) == 0 {
            low
        } else {
            low | !mask
        }
    }

    /// Encode one instruction at `location`.  An empty mnemonic
    /// encodes the operand fields against opcode zero, which is how
    /// OPDEF operands are merged into their base word.
    pub fn parse_instruction(
        &self,
        op: &str,
        operands: &str,
        location: i64,
        pass1: bool,
    ) -> Result<Encoded, EvalError> {
        let (mut word, class) = if op.is_empty() {
            (0_u64, InstructionClass::Basic)
        } else {
            match opcode_base(op) {
                Some((base, class)) => (u64::from(base), class),
                None => {
                    return Err(EvalError::new(format!("unrecognised instruction '{op}'")));
                }
            }
        };

        let text = operands.trim();
        let (first, rest) = split_first_field(text);
        if let Some(field) = first {
            let value = self.require_field(&field, pass1)?;
            match class {
                InstructionClass::Basic => {
                    word |= ((value as u64) & 0o17) << AC_SHIFT;
                }
                InstructionClass::InOut => {
                    word |= ((value as u64) & 0o177) << DEVICE_SHIFT;
                }
            }
        }

        let mut addr = rest.trim();
        if let Some(stripped) = addr.strip_prefix('@') {
            word |= IND_BIT;
            addr = stripped.trim_start();
        }
        let (addr_text, index_text) = split_index(addr);
        if let Some(index) = index_text {
            let value = self.require_field(&index, pass1)?;
            word |= ((value as u64) & 0o17) << INDEX_SHIFT;
        }

        let mut deferred = None;
        let addr_text = addr_text.trim();
        if !addr_text.is_empty() {
            match self.parse_expression(addr_text, pass1)? {
                Some(value) => {
                    word |= (self.truncate(value, 18, true) as u64) & ADDRESS_MASK;
                }
                None => {
                    deferred = Some(addr_text.to_string());
                }
            }
        }

        event!(
            Level::TRACE,
            "encoded '{op} {operands}' at {location:o} as {word:012o} (deferred: {deferred:?})"
        );
        Ok(Encoded {
            word: Unsigned36Bit::truncating_from(word),
            deferred,
        })
    }

    // Accumulator, device and index fields have to evaluate when the
    // instruction is first seen; only the address can be deferred.
    fn require_field(&self, text: &str, pass1: bool) -> Result<i64, EvalError> {
        match self.parse_expression(text, pass1)? {
            Some(value) => Ok(value),
            None => Err(EvalError::new(format!(
                "field '{text}' references a symbol which is not yet defined"
            ))),
        }
    }
}

/// Split `ac,rest` at the first top-level single comma.  A doubled
/// comma is a halfword operator, not a field separator.
fn split_first_field(text: &str) -> (Option<String>, String) {
    let bytes = text.as_bytes();
    let mut depth = 0_i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' | b'[' | b'<' => depth += 1,
                b')' | b']' | b'>' => depth -= 1,
                b',' if depth == 0 => {
                    if i + 1 < bytes.len() && bytes[i + 1] == b',' {
                        i += 1; // skip the halfword operator
                    } else {
                        return (
                            Some(text[..i].trim().to_string()),
                            text[i + 1..].to_string(),
                        );
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    (None, text.to_string())
}

/// Split a trailing `(index)` off an address field.
fn split_index(text: &str) -> (String, Option<String>) {
    let trimmed = text.trim_end();
    if !trimmed.ends_with(')') {
        return (text.to_string(), None);
    }
    let bytes = trimmed.as_bytes();
    let mut depth = 0_i32;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => {
                    depth += 1;
                    if depth == 1 {
                        // Candidate opening paren; accept it only if
                        // its match is the final character.
                        let inner = &trimmed[i + 1..trimmed.len() - 1];
                        if matching_close(&trimmed[i..]) == Some(trimmed.len() - 1 - i) {
                            return (trimmed[..i].to_string(), Some(inner.trim().to_string()));
                        }
                    }
                }
                b')' => depth -= 1,
                _ => {}
            },
        }
    }
    (text.to_string(), None)
}

/// Index of the ')' matching the '(' at the start of `text`.
fn matching_close(text: &str) -> Option<usize> {
    let mut depth = 0_i32;
    let mut quote: Option<u8> = None;
    for (i, &b) in text.as_bytes().iter().enumerate() {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}
