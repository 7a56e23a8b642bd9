//! Capture and generation of ASCII, ASCIZ and SIXBIT word data.
//!
//! The first non-blank character after the pseudo-op is the
//! delimiter and the text runs to the next occurrence of it, which
//! may be on a later line; the line break itself then becomes part
//! of the text.

use base::charset::{pack_ascii, pack_sixbit};
use base::prelude::Unsigned36Bit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextKind {
    Ascii,
    Asciz,
    Sixbit,
}

pub(crate) enum TextStep {
    Done(TextKind, String),
    More(TextCapture),
}

#[derive(Debug)]
pub(crate) struct TextCapture {
    kind: TextKind,
    delimiter: Option<char>,
    buf: String,
    line: usize,
}

impl TextCapture {
    /// Start collecting from the raw tail following the pseudo-op.
    pub(crate) fn begin(kind: TextKind, tail: &str, line: usize) -> TextStep {
        let capture = TextCapture {
            kind,
            delimiter: None,
            buf: String::new(),
            line,
        };
        capture.scan(tail)
    }

    /// Continue on the next source line.  The separator between the
    /// lines is part of the captured text.
    pub(crate) fn feed(mut self, text: &str) -> TextStep {
        if self.delimiter.is_some() {
            self.buf.push_str("\r\n");
        }
        self.scan(text)
    }

    pub(crate) fn line(&self) -> usize {
        self.line
    }

    fn scan(mut self, text: &str) -> TextStep {
        let rest = match self.delimiter {
            Some(_) => text,
            None => match text.char_indices().find(|(_, c)| !c.is_whitespace()) {
                Some((i, c)) => {
                    self.delimiter = Some(c);
                    &text[i + c.len_utf8()..]
                }
                None => return TextStep::More(self),
            },
        };
        let delimiter = self.delimiter.expect("delimiter was just established");
        match rest.find(delimiter) {
            Some(pos) => {
                self.buf.push_str(&rest[..pos]);
                TextStep::Done(self.kind, self.buf)
            }
            None => {
                self.buf.push_str(rest);
                TextStep::More(self)
            }
        }
    }
}

/// The packed words for a completed capture.  ASCIZ extends the text
/// by one zero character, which is what guarantees the terminator
/// even when the text exactly fills its final word.
pub(crate) fn words_for(kind: TextKind, text: &str) -> Vec<Unsigned36Bit> {
    match kind {
        TextKind::Ascii => pack_ascii(text),
        TextKind::Asciz => {
            let mut terminated = text.to_string();
            terminated.push('\0');
            pack_ascii(&terminated)
        }
        TextKind::Sixbit => pack_sixbit(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(kind: TextKind, lines: &[&str]) -> Option<String> {
        let mut step = TextCapture::begin(kind, lines[0], 1);
        for line in &lines[1..] {
            step = match step {
                TextStep::Done(_, buf) => return Some(buf),
                TextStep::More(capture) => capture.feed(line),
            };
        }
        match step {
            TextStep::Done(_, buf) => Some(buf),
            TextStep::More(_) => None,
        }
    }

    #[test]
    fn test_single_line() {
        assert_eq!(
            complete(TextKind::Asciz, &["/AB/"]).as_deref(),
            Some("AB")
        );
        assert_eq!(
            complete(TextKind::Ascii, &[" .A/B. ;x"]).as_deref(),
            Some("A/B")
        );
    }

    #[test]
    fn test_spans_lines() {
        assert_eq!(
            complete(TextKind::Ascii, &["/AB", "CD/"]).as_deref(),
            Some("AB\r\nCD")
        );
    }

    #[test]
    fn test_unterminated() {
        assert_eq!(complete(TextKind::Ascii, &["/AB"]), None);
    }

    #[test]
    fn test_asciz_adds_terminator() {
        let words = words_for(TextKind::Asciz, "AB");
        assert_eq!(words.len(), 1);
        assert_eq!(
            u64::from(words[0]),
            (0o101_u64 << 29) | (0o102_u64 << 22)
        );
        // Five characters exactly fill a word; the terminator forces
        // a second one.
        assert_eq!(words_for(TextKind::Asciz, "ABCDE").len(), 2);
        assert_eq!(words_for(TextKind::Ascii, "ABCDE").len(), 1);
    }

    #[test]
    fn test_sixbit_words() {
        let words = words_for(TextKind::Sixbit, "ab");
        assert_eq!(words.len(), 1);
        assert_eq!(
            u64::from(words[0]),
            (0o41_u64 << 30) | (0o42_u64 << 24)
        );
    }
}
