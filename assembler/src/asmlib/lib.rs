#![deny(unreachable_pub)]
#![deny(unsafe_code)]

mod driver;
mod expr;
mod host;
mod lexer;
mod macrodef;
mod source;
mod stream;
mod symtab;
mod text;
#[cfg(test)]
mod tests;
mod types;

pub use driver::{assemble_source, assemble_urls, Assembly, Options};
pub use host::Host;
pub use source::{FileLoader, SourceLoader};
pub use types::{AssemblerFailure, Fail, IoFailed, ProgramError};
