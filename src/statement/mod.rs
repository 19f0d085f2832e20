//! Statements issued inside a logical transaction
//!
//! A statement is opaque text plus an ordered set of named parameters and a
//! kind tag. The core never interprets the text; it only records, buffers and
//! replays statements.

pub mod value;
pub mod statement_log;
pub mod batch;

pub use self::value::DataValue;
pub use self::statement_log::{StatementLog, LogEntry, result_checksum};
pub use self::batch::MutationBatch;

use std::fmt;

use linked_hash_map::LinkedHashMap;

/// Ordered, named parameter set
pub type Params = LinkedHashMap<String, DataValue>;

/// Whether a statement reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Read,
    Write,
}

/// An immutable statement as supplied by the query layer
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: String,
    params: Params,
    kind: StatementKind,
}

impl Statement {
    pub fn new(text: impl Into<String>, kind: StatementKind) -> Self {
        Self {
            text: text.into(),
            params: Params::new(),
            kind,
        }
    }

    /// Create a read statement
    pub fn read(text: impl Into<String>) -> Self {
        Self::new(text, StatementKind::Read)
    }

    /// Create a write statement
    pub fn write(text: impl Into<String>) -> Self {
        Self::new(text, StatementKind::Write)
    }

    /// Bind a named parameter, keeping bind order
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&DataValue> {
        self.params.get(name)
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn is_write(&self) -> bool {
        self.kind == StatementKind::Write
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)?;
        if !self.params.is_empty() {
            let rendered: Vec<String> = self.params
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            write!(f, " [{}]", rendered.join(", "))?;
        }
        Ok(())
    }
}
