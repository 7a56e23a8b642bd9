//! Infix expression evaluation.
//!
//! Expressions follow assembler conventions: numbers are octal unless
//! a trailing dot, a digit 8 or 9, or a `^D` prefix forces decimal;
//! `'text'` is a SIXBIT word literal and `"text"` a 7-bit ASCII one;
//! symbols come from the debugger's variable table.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use logos::Logos;

use base::charset::{ascii_word, sixbit_word};

use crate::normalise_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    msg: String,
}

impl EvalError {
    pub(crate) fn new<S: Into<String>>(msg: S) -> EvalError {
        EvalError { msg: msg.into() }
    }
}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for EvalError {}

#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t]+")]
enum Token {
    #[regex(r"[0-9]+\.?", |lex| lex.slice().to_string())]
    Digits(String),

    #[regex(r"\^[A-Za-z][0-9]+", |lex| lex.slice().to_string())]
    Radix(String),

    #[regex(r"[A-Za-z$%.?][0-9A-Za-z$%.]*", |lex| lex.slice().to_string())]
    Symbol(String),

    #[regex(r"'[^']*'", |lex| { let s = lex.slice(); s[1..s.len()-1].to_string() })]
    Sixbit(String),

    #[regex(r#""[^"]*""#, |lex| { let s = lex.slice(); s[1..s.len()-1].to_string() })]
    Ascii(String),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("&")]
    Amp,
    #[token("!")]
    Bang,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

fn lex(text: &str) -> Result<Vec<Token>, EvalError> {
    let mut lexer = Token::lexer(text);
    let mut tokens = Vec::new();
    while let Some(item) = lexer.next() {
        match item {
            Ok(token) => tokens.push(token),
            Err(()) => {
                return Err(EvalError::new(format!(
                    "unrecognised character '{}' in expression '{}'",
                    lexer.slice(),
                    text
                )));
            }
        }
    }
    Ok(tokens)
}

/// A plain run of digits: octal unless a trailing dot or a digit
/// outside the octal range forces decimal.
fn digits_value(text: &str) -> Result<i64, EvalError> {
    let (digits, forced_decimal) = match text.strip_suffix('.') {
        Some(d) => (d, true),
        None => (text, false),
    };
    let radix = if forced_decimal || digits.contains(['8', '9']) {
        10
    } else {
        8
    };
    i64::from_str_radix(digits, radix)
        .map_err(|_| EvalError::new(format!("number '{text}' is out of range")))
}

fn radix_value(text: &str) -> Result<i64, EvalError> {
    // The slice always starts "^X" followed by digits.
    let marker = text.as_bytes()[1].to_ascii_uppercase();
    let digits = &text[2..];
    let radix = match marker {
        b'D' => 10,
        b'O' => 8,
        b'B' => 2,
        other => {
            return Err(EvalError::new(format!(
                "unknown radix prefix '^{}'",
                other as char
            )));
        }
    };
    i64::from_str_radix(digits, radix)
        .map_err(|_| EvalError::new(format!("number '{text}' is not valid for its radix")))
}

struct Evaluator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    variables: &'a HashMap<String, i64>,
    undefined: Option<String>,
}

impl<'a> Evaluator<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // & and ! bind least tightly.
    fn logical(&mut self) -> Result<i64, EvalError> {
        let mut acc = self.sum()?;
        loop {
            match self.peek() {
                Some(Token::Amp) => {
                    self.bump();
                    acc &= self.sum()?;
                }
                Some(Token::Bang) => {
                    self.bump();
                    acc |= self.sum()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn sum(&mut self) -> Result<i64, EvalError> {
        let mut acc = self.product()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.bump();
                    acc = acc.wrapping_add(self.product()?);
                }
                Some(Token::Minus) => {
                    self.bump();
                    acc = acc.wrapping_sub(self.product()?);
                }
                _ => return Ok(acc),
            }
        }
    }

    fn product(&mut self) -> Result<i64, EvalError> {
        let mut acc = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.bump();
                    acc = acc.wrapping_mul(self.unary()?);
                }
                Some(Token::Slash) => {
                    self.bump();
                    let divisor = self.unary()?;
                    if divisor == 0 {
                        return Err(EvalError::new("division by zero"));
                    }
                    acc = acc.wrapping_div(divisor);
                }
                _ => return Ok(acc),
            }
        }
    }

    fn unary(&mut self) -> Result<i64, EvalError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.bump();
                Ok(self.unary()?.wrapping_neg())
            }
            Some(Token::Plus) => {
                self.bump();
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<i64, EvalError> {
        match self.bump() {
            Some(Token::Digits(text)) => digits_value(&text),
            Some(Token::Radix(text)) => radix_value(&text),
            Some(Token::Sixbit(text)) => Ok(i64::from(sixbit_word(&text))),
            Some(Token::Ascii(text)) => Ok(i64::from(ascii_word(&text))),
            Some(Token::Symbol(name)) => {
                match self.variables.get(&normalise_name(&name)) {
                    Some(value) => Ok(*value),
                    None => {
                        // Record the miss and keep parsing; whether it
                        // is fatal depends on the pass.
                        if self.undefined.is_none() {
                            self.undefined = Some(name);
                        }
                        Ok(0)
                    }
                }
            }
            Some(Token::LParen) => {
                let value = self.logical()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(EvalError::new("missing ')' in expression")),
                }
            }
            other => Err(EvalError::new(format!(
                "expected an operand, found {other:?}"
            ))),
        }
    }
}

/// Evaluate `text`.  `Ok(None)` means the expression referenced a
/// symbol which is not yet defined and `pass1` allows that to be
/// deferred; with `pass1` false an undefined symbol is an error.
pub(crate) fn evaluate(
    text: &str,
    variables: &HashMap<String, i64>,
    pass1: bool,
) -> Result<Option<i64>, EvalError> {
    let tokens = lex(text)?;
    if tokens.is_empty() {
        return Err(EvalError::new("empty expression"));
    }
    let len = tokens.len();
    let mut ev = Evaluator {
        tokens,
        pos: 0,
        variables,
        undefined: None,
    };
    let value = ev.logical()?;
    if ev.pos != len {
        return Err(EvalError::new(format!(
            "unexpected text after expression '{text}'"
        )));
    }
    match ev.undefined {
        None => Ok(Some(value)),
        Some(_) if pass1 => Ok(None),
        Some(name) => Err(EvalError::new(format!("symbol '{name}' is not defined"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> i64 {
        let variables = HashMap::new();
        evaluate(text, &variables, false)
            .expect("expression should evaluate")
            .expect("expression should be defined")
    }

    #[test]
    fn test_octal_default() {
        assert_eq!(eval("17"), 0o17);
        assert_eq!(eval("100"), 0o100);
    }

    #[test]
    fn test_decimal_forms() {
        assert_eq!(eval("18"), 18);
        assert_eq!(eval("10."), 10);
        assert_eq!(eval("^D100"), 100);
        assert_eq!(eval("^O17"), 0o17);
        assert_eq!(eval("^B101"), 5);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1+2*3"), 7);
        assert_eq!(eval("10/2-1"), 3);
        assert_eq!(eval("(1+2)*3"), 9);
        assert_eq!(eval("7&3!10"), (7 & 3) | 8);
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval("-1"), -1);
        assert_eq!(eval("2--3"), 5);
    }

    #[test]
    fn test_text_literals() {
        assert_eq!(eval("'A'"), (0o41_i64) << 30);
        assert_eq!(eval("\"A\""), (0o101_i64) << 29);
    }

    #[test]
    fn test_symbols() {
        let mut variables = HashMap::new();
        variables.insert("FOO".to_string(), 42);
        assert_eq!(evaluate("FOO+1", &variables, false), Ok(Some(43)));
        // Lookup is folded to upper case and six characters.
        assert_eq!(evaluate("foo", &variables, false), Ok(Some(42)));
    }

    #[test]
    fn test_undefined_symbol() {
        let variables = HashMap::new();
        assert_eq!(evaluate("BAR+1", &variables, true), Ok(None));
        assert!(evaluate("BAR+1", &variables, false).is_err());
    }

    #[test]
    fn test_malformed() {
        let variables = HashMap::new();
        assert!(evaluate("", &variables, true).is_err());
        assert!(evaluate("1+", &variables, true).is_err());
        assert!(evaluate("(1", &variables, true).is_err());
        assert!(evaluate("1 2", &variables, true).is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let variables = HashMap::new();
        assert!(evaluate("1/0", &variables, true).is_err());
    }
}
