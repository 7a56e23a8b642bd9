use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io::Error as IoError;

/// A fatal error in the program being assembled.  Every variant
/// carries the source line it was detected on; rendering follows the
/// `error at line N: ...` convention so that messages can be matched
/// against the listings the original diagnostics shipped with.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ProgramError {
    /// The line did not have the label/operator/operand shape.
    Syntax { line: usize, msg: String },
    /// Unbalanced `<`/`>` or `[`/`]`, or a scope left open at end of
    /// input.
    Scope { line: usize, msg: String },
    /// A bad DEFINE/OPDEF header, a redefined label, a missing body.
    Definition { line: usize, msg: String },
    /// The host could not evaluate an expression.
    Expression { line: usize, msg: String },
}

impl ProgramError {
    pub fn line(&self) -> usize {
        match self {
            ProgramError::Syntax { line, .. }
            | ProgramError::Scope { line, .. }
            | ProgramError::Definition { line, .. }
            | ProgramError::Expression { line, .. } => *line,
        }
    }

    fn message(&self) -> &str {
        match self {
            ProgramError::Syntax { msg, .. }
            | ProgramError::Scope { msg, .. }
            | ProgramError::Definition { msg, .. }
            | ProgramError::Expression { msg, .. } => msg,
        }
    }
}

impl Display for ProgramError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "error at line {}: {}", self.line(), self.message())
    }
}

impl Error for ProgramError {}

#[derive(Debug)]
pub struct IoFailed {
    pub target: String,
    pub error: IoError,
}

impl Display for IoFailed {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "I/O error: read failed on {}: {}", self.target, self.error)
    }
}

impl PartialEq<IoFailed> for IoFailed {
    fn eq(&self, other: &IoFailed) -> bool {
        self.target == other.target && self.error.to_string() == other.error.to_string()
    }
}

/// Any way an assembly can fail.
#[derive(Debug, PartialEq)]
pub enum AssemblerFailure {
    Io(IoFailed),
    /// The source container was unusable (e.g. HTML with no
    /// `<pre>` section).
    BadSource {
        url: String,
        msg: String,
    },
    Program(ProgramError),
}

impl Display for AssemblerFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            AssemblerFailure::Io(e) => write!(f, "{e}"),
            AssemblerFailure::BadSource { url, msg } => {
                write!(f, "unusable source {url}: {msg}")
            }
            AssemblerFailure::Program(e) => write!(f, "{e}"),
        }
    }
}

impl Error for AssemblerFailure {}

impl From<ProgramError> for AssemblerFailure {
    fn from(e: ProgramError) -> AssemblerFailure {
        AssemblerFailure::Program(e)
    }
}

#[derive(Debug)]
pub enum Fail {
    AsmFail(AssemblerFailure),
    InitialisationFailure(String),
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fail::AsmFail(assembler_failure) => assembler_failure.fmt(f),
            Fail::InitialisationFailure(msg) => f.write_str(msg.as_str()),
        }
    }
}

impl Error for Fail {}
