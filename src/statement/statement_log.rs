use crate::statement::{Statement, StatementKind};
use crate::transport::Row;

/// One recorded statement
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// The statement as issued
    pub statement: Statement,

    /// Checksum of the rows a read returned, used to verify replays
    pub checksum: Option<u32>,

    /// Number of flushed writes the read could observe
    pub writes_visible: usize,
}

impl LogEntry {
    pub fn kind(&self) -> StatementKind {
        self.statement.kind()
    }
}

/// Ordered record of every statement issued by one logical transaction.
///
/// Append-only while an attempt runs. Retries replay it from position 0;
/// it is cleared only once the logical transaction is resolved or restarted.
#[derive(Debug, Default, Clone)]
pub struct StatementLog {
    entries: Vec<LogEntry>,
}

impl StatementLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a statement in issue order
    pub fn append(&mut self, statement: Statement) {
        self.entries.push(LogEntry { statement, checksum: None, writes_visible: 0 });
    }

    /// Record an executed read, the checksum of its result and how many
    /// of the logged writes had been flushed when it ran
    pub fn append_read(&mut self, statement: Statement, checksum: Option<u32>, writes_visible: usize) {
        self.entries.push(LogEntry { statement, checksum, writes_visible });
    }

    /// Full log in issue order
    pub fn replay(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn get(&self, position: usize) -> Option<&LogEntry> {
        self.entries.get(position)
    }

    /// Write statements only, in issue order
    pub fn writes(&self) -> impl Iterator<Item = &Statement> {
        self.entries
            .iter()
            .filter(|entry| entry.kind() == StatementKind::Write)
            .map(|entry| &entry.statement)
    }

    /// Remove the entries at the given positions (ascending)
    pub(crate) fn discard(&mut self, positions: &[usize]) {
        for &position in positions.iter().rev() {
            if position < self.entries.len() {
                self.entries.remove(position);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checksum of a read result.
///
/// Rows are encoded column by column with bincode, so two results compare
/// equal only if they hold the same columns and values in the same order.
pub fn result_checksum(rows: &[Row]) -> Option<u32> {
    let encoded: Vec<Vec<(&str, &crate::statement::DataValue)>> = rows
        .iter()
        .map(|row| row.values_with_names().map(|(name, value)| (name.as_str(), value)).collect())
        .collect();

    bincode::serialize(&encoded)
        .ok()
        .map(|bytes| crc32fast::hash(&bytes))
}
