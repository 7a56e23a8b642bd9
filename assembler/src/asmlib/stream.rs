//! The word buffer, its deferred-expression list, and the scope
//! machinery which redirects output while a literal or an OPDEF
//! operand is being assembled.
//!
//! Everything the emitter writes through is packaged as one
//! `OutputStream` value so that entering a scope is a plain swap and
//! there is no global write head to get wrong.

use std::collections::BTreeMap;

use base::prelude::Unsigned36Bit;

/// An expression whose value is not yet known.  It is re-evaluated
/// after the main pass and *added* into the word already emitted at
/// its location.  Two fixups are the same for literal-collapsing
/// purposes when their texts are equal; the line is only for error
/// reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fixup {
    pub(crate) text: String,
    pub(crate) line: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct OutputStream {
    pub(crate) words: Vec<Unsigned36Bit>,
    pub(crate) fixups: BTreeMap<u64, Fixup>,
    /// The location of `words[0]`.
    pub(crate) base: u64,
    /// Where the next word will go.
    pub(crate) location: u64,
    /// What `.` means while this stream is a side scope: the
    /// location in the enclosing stream at which the scope was
    /// opened.
    pub(crate) scope_location: u64,
}

impl OutputStream {
    pub(crate) fn new(base: u64) -> OutputStream {
        OutputStream {
            words: Vec::new(),
            fixups: BTreeMap::new(),
            base,
            location: base,
            scope_location: base,
        }
    }

    /// Append one word at the current location.  The buffer is dense:
    /// a forward jump of the location counter zero-fills the gap, and
    /// emitting below an already-emitted location overwrites.
    pub(crate) fn emit(
        &mut self,
        word: Unsigned36Bit,
        fixup: Option<Fixup>,
    ) -> Result<(), String> {
        if self.location < self.base {
            return Err(format!(
                "location {:o} is below the load address {:o}",
                self.location, self.base
            ));
        }
        let index = (self.location - self.base) as usize;
        if index < self.words.len() {
            self.words[index] = word;
        } else {
            while self.words.len() < index {
                self.words.push(Unsigned36Bit::ZERO);
            }
            self.words.push(word);
        }
        match fixup {
            Some(f) => {
                self.fixups.insert(self.location, f);
            }
            None => {
                self.fixups.remove(&self.location);
            }
        }
        self.location += 1;
        Ok(())
    }

    /// Join further deferred text onto the fixup for `location`.
    pub(crate) fn append_fixup(&mut self, location: u64, text: &str, line: usize) {
        self.fixups
            .entry(location)
            .and_modify(|f| {
                f.text.push('+');
                f.text.push_str(text);
            })
            .or_insert_with(|| Fixup {
                text: text.to_string(),
                line,
            });
    }

    pub(crate) fn word_at(&self, location: u64) -> Option<Unsigned36Bit> {
        if location < self.base {
            return None;
        }
        self.words.get((location - self.base) as usize).copied()
    }

    pub(crate) fn fixup_text_at(&self, location: u64) -> Option<&str> {
        self.fixups.get(&location).map(|f| f.text.as_str())
    }
}

/// The state saved while a literal or OPDEF operand is assembled
/// into a side buffer.
#[derive(Debug)]
pub(crate) struct ScopeFrame {
    pub(crate) name: Option<String>,
    pub(crate) saved: OutputStream,
    pub(crate) line: usize,
}

/// One captured literal, waiting to be placed in the pool.
#[derive(Debug, Clone)]
pub(crate) struct LiteralEntry {
    pub(crate) name: String,
    pub(crate) words: Vec<Unsigned36Bit>,
    pub(crate) fixups: Vec<Option<Fixup>>,
}

impl LiteralEntry {
    pub(crate) fn from_stream(name: String, stream: OutputStream) -> LiteralEntry {
        let fixups = (0..stream.words.len() as u64)
            .map(|i| stream.fixups.get(&i).cloned())
            .collect();
        LiteralEntry {
            name,
            words: stream.words,
            fixups,
        }
    }

    /// Would the block already emitted at `at` serve as this
    /// literal?  Only exact word-for-word and fixup-text equality
    /// counts; no arithmetic equivalence is attempted.
    pub(crate) fn matches(&self, stream: &OutputStream, at: u64) -> bool {
        self.words.iter().enumerate().all(|(i, word)| {
            let location = at + i as u64;
            stream.word_at(location) == Some(*word)
                && stream.fixup_text_at(location)
                    == self.fixups[i].as_ref().map(|f| f.text.as_str())
        })
    }
}
