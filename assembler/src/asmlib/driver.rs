//! The assembly driver: walks the joined source line by line,
//! dispatches pseudo-operators, expands macros, and then runs the
//! second conceptual phase which materialises literals and reserved
//! variables and folds every deferred expression into its word.
//!
//! The ordering is load-bearing: main text, then literals, then
//! variables, and only then fixup resolution, because a fixup may
//! name a literal or a variable whose address exists only once the
//! pool has been laid down.

use std::collections::HashMap;

use tracing::{event, span, Level};

use base::instruction::{IND_BIT, OPERAND_FIELD_MASK};
use base::prelude::{join_halves, Unsigned18Bit, Unsigned36Bit, INT_LIMIT, WORD_LIMIT};

use super::expr;
use super::host::Host;
use super::lexer::{self, TokenizedLine};
use super::macrodef::{
    self, CaptureStep, Condition, MacroCapture, MacroDef, MacroKind,
};
use super::source::{self, SourceLoader};
use super::stream::{Fixup, LiteralEntry, OutputStream, ScopeFrame};
use super::symtab::{self, SymbolFlags, SymbolTable};
use super::text::{self, TextCapture, TextKind, TextStep};
use super::types::{AssemblerFailure, ProgramError};

/// Macro recursion beyond this depth is reported instead of eating
/// the stack.
const MAX_EXPANSION_DEPTH: usize = 100;

/// Addresses are eighteen bits; a location counter outside that
/// range is a programming error, not a huge allocation.
const ADDRESS_SPACE: u64 = 1 << 18;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub preprocess_only: bool,
}

impl Options {
    /// Decode an option-letter string; `p` selects preprocessing
    /// only.  Other letters are reserved and ignored.
    pub fn from_letters(letters: &str) -> Options {
        Options {
            preprocess_only: letters.contains(['p', 'P']),
        }
    }
}

/// The result of a successful assembly: a dense word image starting
/// at the load address, and the start address if the program's END
/// named one.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub load_address: u64,
    pub words: Vec<Unsigned36Bit>,
    pub start: Option<u64>,
}

impl Assembly {
    pub fn word_at(&self, location: u64) -> Option<Unsigned36Bit> {
        location
            .checked_sub(self.load_address)
            .and_then(|index| self.words.get(index as usize))
            .copied()
    }
}

/// One active macro expansion: the parameter binding that substitutes
/// into each body line, and that IRP/IRPC iterate over.
#[derive(Debug, Clone)]
struct ExpansionFrame {
    params: Vec<String>,
    values: Vec<String>,
    defaults: Vec<Option<String>>,
}

pub(crate) struct Assembler<'h> {
    host: &'h mut dyn Host,
    stream: OutputStream,
    scopes: Vec<ScopeFrame>,
    symbols: SymbolTable,
    macros: HashMap<String, MacroDef>,
    literals: Vec<LiteralEntry>,
    reserved_queue: Vec<String>,
    expansions: Vec<ExpansionFrame>,
    capture: Option<MacroCapture>,
    text_capture: Option<TextCapture>,
    literal_seq: u32,
    line: usize,
    start: Option<u64>,
    ended: bool,
    depth: usize,
}

/// Assemble already-loaded source text.  The host's variable table
/// is snapshotted first and restored afterwards whether or not the
/// assembly succeeds.
pub fn assemble_source(
    text: &str,
    load_address: Option<u64>,
    options: &Options,
    host: &mut dyn Host,
) -> Result<Assembly, AssemblerFailure> {
    host.reset_variables();
    let result = assemble_inner(text, load_address, options, host);
    host.restore_variables();
    if let Err(failure) = &result {
        host.println(&failure.to_string());
    }
    result
}

/// Assemble a semicolon-separated list of source URLs.
pub fn assemble_urls(
    url_list: &str,
    load_address: Option<u64>,
    options: &Options,
    host: &mut dyn Host,
    loader: &dyn SourceLoader,
) -> Result<Assembly, AssemblerFailure> {
    let mut warnings = Vec::new();
    let text = match source::load_sources(url_list, loader, &mut warnings) {
        Ok(text) => {
            for warning in &warnings {
                host.println(warning);
            }
            text
        }
        Err(failure) => {
            host.println(&failure.to_string());
            return Err(failure);
        }
    };
    assemble_source(&text, load_address, options, host)
}

fn assemble_inner(
    text: &str,
    load_address: Option<u64>,
    options: &Options,
    host: &mut dyn Host,
) -> Result<Assembly, AssemblerFailure> {
    let text = source::normalise_newlines(text);
    let load_address = load_address.unwrap_or(0);
    if options.preprocess_only {
        for line in text.split("\r\n") {
            host.println(line);
        }
        return Ok(Assembly {
            load_address,
            words: Vec::new(),
            start: None,
        });
    }
    let mut asm = Assembler::new(host, load_address);
    asm.main_pass(&text)?;
    asm.finish()?;
    Ok(Assembly {
        load_address,
        words: asm.stream.words,
        start: asm.start,
    })
}

impl<'h> Assembler<'h> {
    fn new(host: &'h mut dyn Host, load_address: u64) -> Assembler<'h> {
        Assembler {
            host,
            stream: OutputStream::new(load_address),
            scopes: Vec::new(),
            symbols: SymbolTable::new(),
            macros: HashMap::new(),
            literals: Vec::new(),
            reserved_queue: Vec::new(),
            expansions: Vec::new(),
            capture: None,
            text_capture: None,
            literal_seq: 1,
            line: 0,
            start: None,
            ended: false,
            depth: 0,
        }
    }

    fn main_pass(&mut self, text: &str) -> Result<(), ProgramError> {
        let span = span!(Level::ERROR, "main pass");
        let _enter = span.enter();
        for (index, line) in text.split("\r\n").enumerate() {
            self.line = index + 1;
            self.process_line(line)?;
            if self.ended {
                break;
            }
        }
        Ok(())
    }

    /// Every line, whether from the source or from a macro body,
    /// comes through here.  Open captures get the line before any
    /// other interpretation.
    fn process_line(&mut self, line: &str) -> Result<(), ProgramError> {
        if let Some(capture) = self.text_capture.take() {
            match capture.feed(line) {
                TextStep::Done(kind, buf) => return self.emit_text(kind, &buf),
                TextStep::More(capture) => {
                    self.text_capture = Some(capture);
                    return Ok(());
                }
            }
        }
        if let Some(capture) = self.capture.take() {
            match capture.append(line) {
                CaptureStep::Done(def) => return self.finish_capture(def),
                CaptureStep::More(capture) => {
                    self.capture = Some(capture);
                    return Ok(());
                }
            }
        }
        self.handle_statement(line)
    }

    fn handle_statement(&mut self, line: &str) -> Result<(), ProgramError> {
        let tok = lexer::tokenize(line, self.line)?;
        // IRP and IRPC name a parameter of the enclosing macro; the
        // header must not have that name substituted away.
        let exempt = matches!(tok.op_upper().as_deref(), Some("IRP") | Some("IRPC"));
        let tok = match (exempt, self.expansions.last()) {
            (false, Some(frame)) => {
                match macrodef::substitute_params(
                    line,
                    &frame.params,
                    &frame.values,
                    &frame.defaults,
                ) {
                    Some(replaced) => lexer::tokenize(&replaced, self.line)?,
                    None => tok,
                }
            }
            _ => tok,
        };
        self.dispatch(tok)
    }

    fn dispatch(&mut self, tok: TokenizedLine) -> Result<(), ProgramError> {
        if let Some(label) = &tok.label {
            let here = self.stream.location;
            let flags = SymbolFlags {
                label: true,
                private: false,
                internal: label.internal,
            };
            self.define_symbol_value(&label.name, here as i64, flags)?;
        }

        let op = match &tok.op {
            None => {
                if tok.operands.trim().is_empty() {
                    return Ok(());
                }
                return self.emit_expression_word(&tok);
            }
            Some(op) => op.clone(),
        };

        // `NAME=value` promotes the operator position to a symbol
        // name; `==` marks it private and `=:` internal.
        let assignment = tok.operands.trim_start();
        if let Some(rest) = assignment.strip_prefix('=') {
            let (flags, text) = if let Some(after) = rest.strip_prefix('=') {
                (
                    SymbolFlags {
                        label: false,
                        private: true,
                        internal: false,
                    },
                    after,
                )
            } else if let Some(after) = rest.strip_prefix(':') {
                (
                    SymbolFlags {
                        label: false,
                        private: false,
                        internal: true,
                    },
                    after,
                )
            } else {
                (SymbolFlags::default(), rest)
            };
            let value = self.resolve_now(text)?;
            return self.define_symbol_value(&op, value, flags);
        }

        let op_upper = op.to_ascii_uppercase();
        match op_upper.as_str() {
            "DEFINE" => self.begin_define(&tok),
            "OPDEF" => self.begin_opdef(&tok),
            "REPEAT" => self.begin_counted(&tok, MacroKind::Repeat),
            "IFE" => self.begin_counted(&tok, |n| MacroKind::If(Condition::Equal, n)),
            "IFG" => self.begin_counted(&tok, |n| MacroKind::If(Condition::Greater, n)),
            "IFL" => self.begin_counted(&tok, |n| MacroKind::If(Condition::Less, n)),
            "IFN" => self.begin_counted(&tok, |n| MacroKind::If(Condition::NotEqual, n)),
            "IRP" => self.begin_irp(&tok, MacroKind::Irp),
            "IRPC" => self.begin_irp(&tok, MacroKind::Irpc),
            "ASCII" => self.begin_text(TextKind::Ascii, &tok),
            "ASCIZ" => self.begin_text(TextKind::Asciz, &tok),
            "SIXBIT" => self.begin_text(TextKind::Sixbit, &tok),
            "END" => self.handle_end(&tok),
            "EXP" => self.emit_expression_word(&tok),
            "LOC" => self.handle_loc(&tok),
            "XWD" => self.handle_xwd(&tok),
            // Listing control: accepted, no effect on the image.
            "LALL" | "LIST" | "NOSYM" | "PAGE" | "SUBTTL" | "TITLE" | "XLIST" => Ok(()),
            _ => match self.macros.get(&op_upper).cloned() {
                Some(def) => self.invoke_macro(def, &tok),
                None => self.emit_instruction(&op_upper, &tok),
            },
        }
    }

    // ----- symbols ---------------------------------------------------

    fn define_symbol_value(
        &mut self,
        name: &str,
        value: i64,
        flags: SymbolFlags,
    ) -> Result<(), ProgramError> {
        let key = symtab::normalise(name);
        let word = Unsigned36Bit::truncating_from(value as u64);
        self.symbols.define(&key, word, flags, self.line)?;
        self.host.set_variable(&key, value);
        event!(Level::DEBUG, "defined symbol {key} = {value:#o}");
        Ok(())
    }

    // ----- expression plumbing --------------------------------------

    /// What `.` denotes right now: inside a scope, the location the
    /// scope was opened at; otherwise the live location counter.
    fn current_dot(&self) -> u64 {
        if self.scopes.is_empty() {
            self.stream.location
        } else {
            self.stream.scope_location
        }
    }

    fn rewrite_for_host(&self, text: &str) -> String {
        let here = self.host.format_word(self.current_dot() as i64);
        expr::substitute_location(&expr::rewrite_text_operators(text), &here)
    }

    /// Resolve an expression completely, now.  Used where a value is
    /// needed to proceed (assignments, REPEAT counts, LOC, END).
    fn resolve_now(&mut self, text: &str) -> Result<i64, ProgramError> {
        let dot = self.current_dot();
        match self.resolve_with_host(text, dot, true)? {
            Some(value) => Ok(value),
            None => Err(ProgramError::Expression {
                line: self.line,
                msg: format!("expression '{}' cannot be evaluated here", text.trim()),
            }),
        }
    }

    /// The expression rewrites of the dialect, then the host parser.
    /// `L,,R` forms the halfword pair; each half is truncated to 18
    /// bits.
    fn resolve_with_host(
        &mut self,
        text: &str,
        dot: u64,
        pass1: bool,
    ) -> Result<Option<i64>, ProgramError> {
        let rewritten = expr::rewrite_text_operators(text);
        let rewritten = expr::substitute_location(&rewritten, &self.host.format_word(dot as i64));
        if rewritten.trim().is_empty() {
            // A null expression is zero; this is what lets `A,,` and
            // `,,B` address single halves.
            return Ok(Some(0));
        }
        if let Some((left_text, right_text)) = expr::split_double_comma(&rewritten) {
            let left = self.resolve_with_host(&left_text, dot, pass1)?;
            let right = self.resolve_with_host(&right_text, dot, pass1)?;
            return Ok(match (left, right) {
                (Some(left), Some(right)) => {
                    let left =
                        Unsigned18Bit::truncating_from(self.host.truncate(left, 18, true) as u32);
                    let right =
                        Unsigned18Bit::truncating_from(self.host.truncate(right, 18, true) as u32);
                    Some(i64::from(join_halves(left, right)))
                }
                _ => None,
            });
        }
        let line = self.line;
        self.host
            .parse_expression(&rewritten, pass1)
            .map_err(|e| ProgramError::Expression {
                line,
                msg: e.to_string(),
            })
    }

    // ----- emission --------------------------------------------------

    fn emit(&mut self, word: Unsigned36Bit, fixup: Option<Fixup>) -> Result<(), ProgramError> {
        let line = self.line;
        self.stream
            .emit(word, fixup)
            .map_err(|msg| ProgramError::Expression { line, msg })
    }

    fn warn(&mut self, line: usize, msg: &str) {
        let text = format!("warning at line {line}: {msg}");
        event!(Level::WARN, "{text}");
        self.host.println(&text);
    }

    fn check_range(&mut self, value: i64) {
        if value < -INT_LIMIT || value as i128 >= WORD_LIMIT as i128 {
            let line = self.line;
            self.warn(
                line,
                &format!("value {value} does not fit in a word and was truncated"),
            );
        }
    }

    /// Add a resolved fixup value into an already-emitted word,
    /// truncating to 36 bits.
    fn fold_into(&mut self, word: Unsigned36Bit, value: i64) -> Unsigned36Bit {
        self.check_range(value);
        let sum = (i128::from(u64::from(word)) + i128::from(value))
            .rem_euclid(i128::from(WORD_LIMIT));
        Unsigned36Bit::truncating_from(sum as u64)
    }

    /// Emit one word whose entire value is a deferred expression.
    fn emit_expression_word(&mut self, tok: &TokenizedLine) -> Result<(), ProgramError> {
        let operands = self.rewrite_operands(tok)?;
        if operands.is_empty() {
            return Err(ProgramError::Expression {
                line: self.line,
                msg: "missing expression".to_string(),
            });
        }
        let line = self.line;
        self.emit(Unsigned36Bit::ZERO, Some(Fixup { text: operands, line }))
    }

    fn emit_instruction(&mut self, op: &str, tok: &TokenizedLine) -> Result<(), ProgramError> {
        let operands = self.rewrite_operands(tok)?;
        let operands = self.rewrite_for_host(&operands);
        let here = self.stream.location;
        let line = self.line;
        let encoded = self
            .host
            .parse_instruction(op, &operands, here as i64, true)
            .map_err(|e| ProgramError::Expression {
                line,
                msg: e.to_string(),
            })?;
        self.emit(
            encoded.word,
            encoded.deferred.map(|text| Fixup { text, line }),
        )
    }

    fn emit_text(&mut self, kind: TextKind, buf: &str) -> Result<(), ProgramError> {
        for word in text::words_for(kind, buf) {
            self.emit(word, None)?;
        }
        Ok(())
    }

    // ----- operand scanning -----------------------------------------

    /// Capture the first bracketed literal (from the raw tail, so it
    /// may hide `;`), then rewrite reserved `NAME#` symbols, and
    /// return the cleaned operand text.
    fn rewrite_operands(&mut self, tok: &TokenizedLine) -> Result<String, ProgramError> {
        let mut tail = tok.raw_tail.clone();
        match expr::extract_literal(&tail) {
            Ok(Some((start, end))) => {
                let inner = tail[start + 1..end].to_string();
                let name = self.capture_literal(&inner)?;
                tail.replace_range(start..=end, &name);
            }
            Ok(None) => {}
            Err(msg) => {
                return Err(ProgramError::Scope {
                    line: self.line,
                    msg,
                });
            }
        }
        let mut operands = match tail.find(';') {
            Some(pos) => tail[..pos].to_string(),
            None => tail,
        };
        while let Some((start, end, name)) = expr::find_reserved(&operands) {
            let symbol = symtab::normalise(&name);
            let key = format!("?{symbol}");
            if !self.macros.contains_key(&key) {
                let def = MacroDef {
                    name: key.clone(),
                    kind: MacroKind::Reserved,
                    params: Vec::new(),
                    defaults: Vec::new(),
                    body: format!("{symbol}: 0"),
                    line: self.line,
                };
                self.macros.insert(key, def);
                self.reserved_queue.push(symbol.clone());
            }
            operands.replace_range(start..end, &symbol);
        }
        Ok(operands.trim().to_string())
    }

    /// Assemble a bracketed literal into its own named scope, file it
    /// in the pool, and hand back the generated name that replaces it
    /// in the operand text.
    fn capture_literal(&mut self, body: &str) -> Result<String, ProgramError> {
        let name = format!("?{:05}", self.literal_seq);
        self.literal_seq += 1;
        let def = MacroDef {
            name: name.clone(),
            kind: MacroKind::Literal,
            params: Vec::new(),
            defaults: Vec::new(),
            body: body.to_string(),
            line: self.line,
        };
        self.macros.insert(name.clone(), def);

        self.push_scope(Some(name.clone()));
        let mut result = self.process_line(body);
        if result.is_ok() && (self.capture.is_some() || self.text_capture.is_some()) {
            self.capture = None;
            self.text_capture = None;
            result = Err(ProgramError::Scope {
                line: self.line,
                msg: "unterminated construct inside a literal".to_string(),
            });
        }
        let captured = self.pop_scope()?;
        result?;
        event!(
            Level::DEBUG,
            "literal {name} captured with {} words",
            captured.words.len()
        );
        self.literals
            .push(LiteralEntry::from_stream(name.clone(), captured));
        Ok(name)
    }

    // ----- scopes ----------------------------------------------------

    fn push_scope(&mut self, name: Option<String>) {
        let dot = self.current_dot();
        let mut fresh = OutputStream::new(0);
        fresh.scope_location = dot;
        let saved = std::mem::replace(&mut self.stream, fresh);
        self.scopes.push(ScopeFrame {
            name,
            saved,
            line: self.line,
        });
    }

    fn pop_scope(&mut self) -> Result<OutputStream, ProgramError> {
        match self.scopes.pop() {
            Some(frame) => {
                event!(
                    Level::TRACE,
                    "leaving scope {:?} opened at line {}",
                    frame.name,
                    frame.line
                );
                Ok(std::mem::replace(&mut self.stream, frame.saved))
            }
            None => Err(ProgramError::Scope {
                line: self.line,
                msg: "scope stack is empty".to_string(),
            }),
        }
    }

    // ----- pseudo-operators ------------------------------------------

    fn handle_end(&mut self, tok: &TokenizedLine) -> Result<(), ProgramError> {
        let text = tok.operands.trim();
        if !text.is_empty() {
            let value = self.resolve_now(text)?;
            self.start = Some(value as u64 & (ADDRESS_SPACE - 1));
        }
        self.ended = true;
        Ok(())
    }

    fn handle_loc(&mut self, tok: &TokenizedLine) -> Result<(), ProgramError> {
        let value = self.resolve_now(tok.operands.trim())?;
        if value < 0 || value as u64 >= ADDRESS_SPACE {
            return Err(ProgramError::Expression {
                line: self.line,
                msg: format!("location {value} is outside the address space"),
            });
        }
        self.stream.location = value as u64;
        Ok(())
    }

    fn handle_xwd(&mut self, tok: &TokenizedLine) -> Result<(), ProgramError> {
        let operands = self.rewrite_operands(tok)?;
        let halves = expr::split_value_list(&operands);
        if halves.len() != 2 {
            return Err(ProgramError::Expression {
                line: self.line,
                msg: format!("XWD wants two halfwords, got '{operands}'"),
            });
        }
        let line = self.line;
        self.emit(
            Unsigned36Bit::ZERO,
            Some(Fixup {
                text: format!("{},,{}", halves[0], halves[1]),
                line,
            }),
        )
    }

    fn begin_text(&mut self, kind: TextKind, tok: &TokenizedLine) -> Result<(), ProgramError> {
        match TextCapture::begin(kind, &tok.raw_tail, self.line) {
            TextStep::Done(kind, buf) => self.emit_text(kind, &buf),
            TextStep::More(capture) => {
                self.text_capture = Some(capture);
                Ok(())
            }
        }
    }

    // ----- macro capture ---------------------------------------------

    fn start_capture(&mut self, capture: MacroCapture, rest: &str) -> Result<(), ProgramError> {
        match capture.append(rest) {
            CaptureStep::Done(def) => self.finish_capture(def),
            CaptureStep::More(capture) => {
                self.capture = Some(capture);
                Ok(())
            }
        }
    }

    fn begin_define(&mut self, tok: &TokenizedLine) -> Result<(), ProgramError> {
        let (name, params, defaults, rest) =
            expr::parse_define_header(&tok.raw_tail).map_err(|msg| ProgramError::Definition {
                line: self.line,
                msg: format!("unrecognised DEFINE: {msg}"),
            })?;
        let def = MacroDef {
            name,
            kind: MacroKind::Define,
            params,
            defaults,
            body: String::new(),
            line: self.line,
        };
        self.start_capture(MacroCapture::new(def), rest)
    }

    fn begin_opdef(&mut self, tok: &TokenizedLine) -> Result<(), ProgramError> {
        let (name, rest) =
            expr::parse_name_header(&tok.raw_tail).map_err(|msg| ProgramError::Definition {
                line: self.line,
                msg: format!("unrecognised OPDEF: {msg}"),
            })?;
        let def = MacroDef {
            name,
            kind: MacroKind::Opdef,
            params: Vec::new(),
            defaults: Vec::new(),
            body: String::new(),
            line: self.line,
        };
        self.start_capture(MacroCapture::new(def), rest)
    }

    /// REPEAT and the IFx family: a count or condition expression,
    /// then an angle-bracketed body.
    fn begin_counted(
        &mut self,
        tok: &TokenizedLine,
        make: impl FnOnce(i64) -> MacroKind,
    ) -> Result<(), ProgramError> {
        let (head, rest) = match tok.raw_tail.find('<') {
            Some(pos) => (&tok.raw_tail[..pos], &tok.raw_tail[pos..]),
            None => (tok.operands.as_str(), ""),
        };
        let head = head.split(';').next().unwrap_or("").trim();
        let head = head.strip_suffix(',').unwrap_or(head).trim_end();
        let value = self.resolve_now(head)?;
        let def = MacroDef::anonymous(make(value), self.line);
        self.start_capture(MacroCapture::new(def), rest)
    }

    fn begin_irp(&mut self, tok: &TokenizedLine, kind: MacroKind) -> Result<(), ProgramError> {
        let (head, rest) = match tok.raw_tail.find('<') {
            Some(pos) => (&tok.raw_tail[..pos], &tok.raw_tail[pos..]),
            None => (tok.operands.as_str(), ""),
        };
        let head = head.split(';').next().unwrap_or("").trim();
        let param = head.strip_suffix(',').unwrap_or(head).trim_end();
        if param.is_empty() {
            return Err(ProgramError::Definition {
                line: self.line,
                msg: "IRP wants a macro parameter name".to_string(),
            });
        }
        let mut def = MacroDef::anonymous(kind, self.line);
        def.params.push(param.to_string());
        self.start_capture(MacroCapture::new(def), rest)
    }

    /// A completed body.  Named definitions are filed for later use;
    /// the anonymous forms run at once.
    fn finish_capture(&mut self, def: MacroDef) -> Result<(), ProgramError> {
        event!(
            Level::DEBUG,
            "captured macro {} ({:?}), body {} bytes",
            def.name,
            def.kind,
            def.body.len()
        );
        self.macros.insert(def.name.clone(), def.clone());
        match def.kind {
            MacroKind::Define | MacroKind::Opdef => Ok(()),
            MacroKind::Repeat(count) => {
                for _ in 0..count.max(0) {
                    if self.ended {
                        break;
                    }
                    self.run_body(&def.body, None)?;
                }
                Ok(())
            }
            MacroKind::If(condition, value) => {
                if condition.holds(value) {
                    self.run_body(&def.body, None)?;
                }
                Ok(())
            }
            MacroKind::Irp | MacroKind::Irpc => self.run_irp(&def),
            // Literals are captured inline and reserved variables are
            // synthesised, never collected by the appender.
            MacroKind::Literal | MacroKind::Reserved => Ok(()),
        }
    }

    // ----- macro invocation ------------------------------------------

    fn invoke_macro(&mut self, def: MacroDef, tok: &TokenizedLine) -> Result<(), ProgramError> {
        match def.kind {
            MacroKind::Define => {
                let values = expr::call_values(&tok.operands);
                let frame = ExpansionFrame {
                    params: def.params.clone(),
                    values,
                    defaults: def.defaults.clone(),
                };
                self.run_body(&def.body, Some(frame))
            }
            MacroKind::Opdef => self.invoke_opdef(&def, tok),
            _ => self.run_body(&def.body, None),
        }
    }

    /// OPDEF: the body gives a base word; the call's operands encode
    /// against opcode zero and their accumulator, index and address
    /// fields are added in, with the indirect bit simply or-ed.
    fn invoke_opdef(&mut self, def: &MacroDef, tok: &TokenizedLine) -> Result<(), ProgramError> {
        let (base, leftover) = self.assemble_side(&def.body)?;
        let operands = self.rewrite_operands(tok)?;
        let operands = self.rewrite_for_host(&operands);
        let here = self.stream.location;
        let line = self.line;
        let encoded = self
            .host
            .parse_instruction("", &operands, here as i64, true)
            .map_err(|e| ProgramError::Expression {
                line,
                msg: e.to_string(),
            })?;
        let operand_bits = u64::from(encoded.word);
        let merged = (u64::from(base) + (operand_bits & OPERAND_FIELD_MASK)) & (WORD_LIMIT - 1);
        let word = Unsigned36Bit::truncating_from(merged | (operand_bits & IND_BIT));
        self.emit(word, None)?;
        if let Some(text) = leftover {
            self.stream.append_fixup(here, &text, line);
        }
        if let Some(text) = encoded.deferred {
            self.stream.append_fixup(here, &text, line);
        }
        Ok(())
    }

    /// Assemble a body into an anonymous side scope and reduce it to
    /// a single word.  A deferred expression that still cannot be
    /// evaluated is handed back as text.
    fn assemble_side(&mut self, body: &str) -> Result<(Unsigned36Bit, Option<String>), ProgramError> {
        self.push_scope(None);
        let mut result = Ok(());
        for line in body.split('\n') {
            result = self.process_line(line);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() && (self.capture.is_some() || self.text_capture.is_some()) {
            self.capture = None;
            self.text_capture = None;
            result = Err(ProgramError::Scope {
                line: self.line,
                msg: "unterminated construct in OPDEF body".to_string(),
            });
        }
        let captured = self.pop_scope()?;
        result?;
        if captured.words.is_empty() {
            return Err(ProgramError::Definition {
                line: self.line,
                msg: "OPDEF body generated no word".to_string(),
            });
        }
        let word = captured.words[0];
        match captured.fixups.get(&0) {
            None => Ok((word, None)),
            Some(fixup) => {
                let dot = self.current_dot();
                match self.resolve_with_host(&fixup.text, dot, true)? {
                    Some(value) => Ok((self.fold_into(word, value), None)),
                    None => Ok((word, Some(fixup.text.clone()))),
                }
            }
        }
    }

    fn run_body(
        &mut self,
        body: &str,
        frame: Option<ExpansionFrame>,
    ) -> Result<(), ProgramError> {
        if self.depth >= MAX_EXPANSION_DEPTH {
            return Err(ProgramError::Definition {
                line: self.line,
                msg: "macro expansion is too deep".to_string(),
            });
        }
        self.depth += 1;
        let pushed = frame.is_some();
        if let Some(frame) = frame {
            self.expansions.push(frame);
        }
        let mut result = Ok(());
        for line in body.split('\n') {
            if self.ended {
                break;
            }
            result = self.process_line(line);
            if result.is_err() {
                break;
            }
        }
        if pushed {
            self.expansions.pop();
        }
        self.depth -= 1;
        result
    }

    fn run_irp(&mut self, def: &MacroDef) -> Result<(), ProgramError> {
        let param = def.params.first().cloned().unwrap_or_default();
        let bound = match self.lookup_binding(&param) {
            Some(value) => value,
            None => {
                return Err(ProgramError::Definition {
                    line: self.line,
                    msg: format!(
                        "IRP parameter '{param}' is not a parameter of an enclosing macro"
                    ),
                });
            }
        };
        let items: Vec<String> = match def.kind {
            MacroKind::Irp => expr::split_value_list(&bound),
            _ => bound.chars().map(|c| c.to_string()).collect(),
        };
        for item in items {
            if self.ended {
                break;
            }
            let frame = ExpansionFrame {
                params: vec![param.clone()],
                values: vec![item],
                defaults: vec![None],
            };
            self.run_body(&def.body, Some(frame))?;
        }
        Ok(())
    }

    /// The value bound to `param` by the nearest enclosing expansion.
    fn lookup_binding(&self, param: &str) -> Option<String> {
        for frame in self.expansions.iter().rev() {
            for (i, candidate) in frame.params.iter().enumerate() {
                if candidate.eq_ignore_ascii_case(param) {
                    let value = match frame.values.get(i) {
                        Some(v) if !v.is_empty() => v.clone(),
                        _ => frame
                            .defaults
                            .get(i)
                            .and_then(|d| d.clone())
                            .unwrap_or_default(),
                    };
                    return Some(value);
                }
            }
        }
        None
    }

    // ----- phase 2 ---------------------------------------------------

    fn finish(&mut self) -> Result<(), ProgramError> {
        if let Some(capture) = &self.capture {
            return Err(ProgramError::Scope {
                line: capture.line(),
                msg: format!(
                    "macro body opened here never found its closing '{}'",
                    capture.close_delimiter()
                ),
            });
        }
        if let Some(capture) = &self.text_capture {
            return Err(ProgramError::Scope {
                line: capture.line(),
                msg: "text string opened here never found its closing delimiter".to_string(),
            });
        }
        if let Some(frame) = self.scopes.last() {
            return Err(ProgramError::Scope {
                line: frame.line,
                msg: "scope opened here was never closed".to_string(),
            });
        }

        {
            let span = span!(Level::ERROR, "literal pool");
            let _enter = span.enter();
            let pool_base = self.stream.location;
            let pool = std::mem::take(&mut self.literals);
            for literal in pool {
                match self.find_collapse(&literal, pool_base) {
                    Some(at) => {
                        event!(
                            Level::DEBUG,
                            "literal {} collapses onto {at:o}",
                            literal.name
                        );
                        self.define_symbol_value(&literal.name, at as i64, SymbolFlags::label())?;
                    }
                    None => {
                        let at = self.stream.location;
                        self.define_symbol_value(&literal.name, at as i64, SymbolFlags::label())?;
                        for (word, fixup) in literal.words.iter().zip(literal.fixups.iter()) {
                            self.emit(*word, fixup.clone())?;
                        }
                    }
                }
            }
        }

        {
            let span = span!(Level::ERROR, "reserved variables");
            let _enter = span.enter();
            let queue = std::mem::take(&mut self.reserved_queue);
            for name in queue {
                let key = format!("?{name}");
                if let Some(def) = self.macros.get(&key).cloned() {
                    self.run_body(&def.body, None)?;
                }
            }
        }

        {
            let span = span!(Level::ERROR, "fixups");
            let _enter = span.enter();
            let pending: Vec<(u64, Fixup)> = self
                .stream
                .fixups
                .iter()
                .map(|(location, fixup)| (*location, fixup.clone()))
                .collect();
            for (location, fixup) in pending {
                self.line = fixup.line;
                let value = match self.resolve_with_host(&fixup.text, location, false)? {
                    Some(value) => value,
                    None => {
                        return Err(ProgramError::Expression {
                            line: fixup.line,
                            msg: format!("expression '{}' cannot be evaluated", fixup.text),
                        });
                    }
                };
                let word = match self.stream.word_at(location) {
                    Some(word) => word,
                    None => {
                        return Err(ProgramError::Expression {
                            line: fixup.line,
                            msg: format!("no word was emitted at {location:o} for its fixup"),
                        });
                    }
                };
                let folded = self.fold_into(word, value);
                let index = (location - self.stream.base) as usize;
                self.stream.words[index] = folded;
            }
            self.stream.fixups.clear();
        }
        Ok(())
    }

    /// A previously laid-down block with the same words and the same
    /// fixup texts serves for this literal too.
    fn find_collapse(&self, literal: &LiteralEntry, pool_base: u64) -> Option<u64> {
        let len = literal.words.len() as u64;
        if len == 0 {
            return None;
        }
        let mut at = pool_base;
        while at + len <= self.stream.location {
            if literal.matches(&self.stream, at) {
                return Some(at);
            }
            at += 1;
        }
        None
    }
}
