use std::collections::BTreeMap;

use base::prelude::Unsigned36Bit;

use super::types::ProgramError;

/// How a symbol was introduced.  `==` assignments are private and
/// `=:` assignments internal; a trailing `::` on a label also marks
/// it internal.  The distinction is carried through for listings but
/// does not change code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SymbolFlags {
    pub(crate) label: bool,
    pub(crate) private: bool,
    pub(crate) internal: bool,
}

impl SymbolFlags {
    pub(crate) fn label() -> SymbolFlags {
        SymbolFlags {
            label: true,
            ..SymbolFlags::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Symbol {
    pub(crate) value: Unsigned36Bit,
    pub(crate) flags: SymbolFlags,
    pub(crate) line: usize,
}

/// Symbol names are significant to six characters, upper case.
pub(crate) fn normalise(name: &str) -> String {
    name.trim()
        .chars()
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase()
}

#[derive(Debug, Default)]
pub(crate) struct SymbolTable {
    definitions: BTreeMap<String, Symbol>,
}

impl SymbolTable {
    pub(crate) fn new() -> SymbolTable {
        SymbolTable::default()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, name: &str) -> Option<&Symbol> {
        self.definitions.get(&normalise(name))
    }

    /// Define or re-assign a symbol.  Redefining a label is an
    /// error; re-assigning a non-label symbol overwrites it.
    pub(crate) fn define(
        &mut self,
        name: &str,
        value: Unsigned36Bit,
        flags: SymbolFlags,
        line: usize,
    ) -> Result<(), ProgramError> {
        let key = normalise(name);
        if let Some(existing) = self.definitions.get(&key) {
            if existing.flags.label {
                return Err(ProgramError::Definition {
                    line,
                    msg: format!("label {key} redefined"),
                });
            }
        }
        self.definitions.insert(key, Symbol { value, flags, line });
        Ok(())
    }
}
