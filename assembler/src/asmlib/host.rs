//! The narrow interface the assembler needs from its host: an
//! expression parser, an instruction encoder, a mirror of the symbol
//! table, and a console.

use debugger::{Debugger, Encoded, EvalError};

pub trait Host {
    /// Evaluate an infix expression.  `Ok(None)` means an undefined
    /// symbol was referenced and `pass1` permits deferring the
    /// expression; with `pass1` false that is an error.
    fn parse_expression(&self, text: &str, pass1: bool) -> Result<Option<i64>, EvalError>;

    /// Encode one instruction.  An empty `op` encodes the operand
    /// fields against opcode zero.
    fn parse_instruction(
        &self,
        op: &str,
        operands: &str,
        location: i64,
        pass1: bool,
    ) -> Result<Encoded, EvalError>;

    /// Render a value the way `parse_expression` reads numbers.
    fn format_word(&self, n: i64) -> String;

    /// Keep the low `bits` bits of `n`, zero- or sign-extended.
    fn truncate(&self, n: i64, bits: u32, unsigned: bool) -> i64;

    fn set_variable(&mut self, name: &str, value: i64);

    /// Snapshot the variable table before an assembly.
    fn reset_variables(&mut self);

    /// Put the snapshot back, discarding the assembly's symbols.
    fn restore_variables(&mut self);

    /// One diagnostic or listing line.
    fn println(&mut self, line: &str);
}

impl Host for Debugger {
    fn parse_expression(&self, text: &str, pass1: bool) -> Result<Option<i64>, EvalError> {
        Debugger::parse_expression(self, text, pass1)
    }

    fn parse_instruction(
        &self,
        op: &str,
        operands: &str,
        location: i64,
        pass1: bool,
    ) -> Result<Encoded, EvalError> {
        Debugger::parse_instruction(self, op, operands, location, pass1)
    }

    fn format_word(&self, n: i64) -> String {
        Debugger::format_word(self, n)
    }

    fn truncate(&self, n: i64, bits: u32, unsigned: bool) -> i64 {
        Debugger::truncate(self, n, bits, unsigned)
    }

    fn set_variable(&mut self, name: &str, value: i64) {
        Debugger::set_variable(self, name, value);
    }

    fn reset_variables(&mut self) {
        Debugger::reset_variables(self);
    }

    fn restore_variables(&mut self) {
        Debugger::restore_variables(self);
    }

    fn println(&mut self, line: &str) {
        Debugger::println(self, line);
    }
}
