use std::collections::BTreeMap;

use crate::common::types::Version;
use crate::transport::Row;

/// A column that must name an existing row of another table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub column: String,
    pub parent: String,
}

/// Table definition: rows are keyed by the integer `id` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    references: Vec<Reference>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: Vec::new(),
        }
    }

    /// Require `column` to hold the id of an existing `parent` row (or NULL)
    pub fn with_reference(mut self, column: impl Into<String>, parent: impl Into<String>) -> Self {
        self.references.push(Reference {
            column: column.into(),
            parent: parent.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }
}

/// Committed versions of one row, oldest first. `None` marks a delete.
#[derive(Debug, Default)]
pub(crate) struct VersionChain {
    versions: Vec<(Version, Option<Row>)>,
}

impl VersionChain {
    /// Row as seen by a snapshot taken at `snapshot`
    pub fn visible_at(&self, snapshot: Version) -> Option<&Row> {
        self.versions
            .iter()
            .rev()
            .find(|(version, _)| *version <= snapshot)
            .and_then(|(_, row)| row.as_ref())
    }

    pub fn latest(&self) -> Option<&Row> {
        self.versions.last().and_then(|(_, row)| row.as_ref())
    }

    pub fn latest_version(&self) -> Version {
        self.versions.last().map(|(version, _)| *version).unwrap_or(0)
    }

    pub fn push(&mut self, version: Version, row: Option<Row>) {
        self.versions.push((version, row));
    }
}

/// Schema plus committed rows of one table
#[derive(Debug)]
pub(crate) struct TableData {
    pub schema: TableSchema,
    pub rows: BTreeMap<i64, VersionChain>,
    /// Version of the last commit that touched this table
    pub last_commit: Version,
}

impl TableData {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            last_commit: 0,
        }
    }

    pub fn visible_at(&self, key: i64, snapshot: Version) -> Option<&Row> {
        self.rows.get(&key).and_then(|chain| chain.visible_at(snapshot))
    }

    pub fn latest_version(&self, key: i64) -> Version {
        self.rows.get(&key).map(VersionChain::latest_version).unwrap_or(0)
    }

    /// Rows visible at a snapshot, by key
    pub fn snapshot_rows(&self, snapshot: Version) -> BTreeMap<i64, Row> {
        self.rows
            .iter()
            .filter_map(|(key, chain)| chain.visible_at(snapshot).map(|row| (*key, row.clone())))
            .collect()
    }
}
