//! In-process transactional store with optimistic concurrency control
//!
//! Every transaction reads from the snapshot taken when it began, overlaid
//! with its own uncommitted writes. Conflicts are detected optimistically:
//! a write to a row committed by someone else after the snapshot aborts at
//! once, and commit validates every row read or written (and every table
//! scanned) against later commits. Batches apply all-or-nothing.

mod command;
pub mod table;

pub use self::table::{Reference, TableSchema};

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, warn};
use parking_lot::Mutex;

use self::command::{Command, Verb};
use self::table::TableData;
use crate::common::types::{HandleRef, Version};
use crate::statement::{DataValue, Statement};
use crate::transport::{BatchOutcome, QueryOutput, Row, Transport, TransportError};

type RowKey = (String, i64);

type StoreResult<T> = std::result::Result<T, TransportError>;

/// Server-side state of one open transaction
#[derive(Debug, Clone, Default)]
struct ServerTxn {
    snapshot: Version,
    point_reads: HashSet<RowKey>,
    scanned: HashSet<String>,
    writes: BTreeMap<RowKey, Option<Row>>,
}

/// Counters of transaction outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub commits: u64,
    pub aborts: u64,
    pub rollbacks: u64,
}

/// Failures to inject into upcoming operations
#[derive(Debug, Default)]
struct FaultPlan {
    abort_commits: u32,
    abort_batches: u32,
    refuse_begins: u32,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<String, TableData>,
    clock: Version,
    next_handle: HandleRef,
    txns: HashMap<HandleRef, ServerTxn>,
    /// Handles the store aborted that were not rolled back yet
    aborted: HashSet<HandleRef>,
    faults: FaultPlan,
    disconnected: bool,
    stats: StoreStats,
}

/// In-memory backing store implementing `Transport`
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table; an existing table of the same name is kept
    pub fn create_table(&self, schema: TableSchema) {
        let mut state = self.state.lock();
        let name = schema.name().to_string();
        state.tables.entry(name).or_insert_with(|| TableData::new(schema));
    }

    /// Latest committed version of a row
    pub fn committed_row(&self, table: &str, id: i64) -> Option<Row> {
        let state = self.state.lock();
        state.tables.get(table)?.rows.get(&id)?.latest().cloned()
    }

    /// All committed rows of a table, by id
    pub fn committed_rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock();
        match state.tables.get(table) {
            Some(data) => data.snapshot_rows(state.clock).into_values().collect(),
            None => Vec::new(),
        }
    }

    /// Number of open server-side transactions
    pub fn active_transactions(&self) -> usize {
        self.state.lock().txns.len()
    }

    /// Make the next `count` commits fail with an abort
    pub fn abort_next_commits(&self, count: u32) {
        self.state.lock().faults.abort_commits = count;
    }

    /// Make the next `count` batches fail with an abort
    pub fn abort_next_batches(&self, count: u32) {
        self.state.lock().faults.abort_batches = count;
    }

    /// Make the next `count` begins fail as if the session dropped
    pub fn refuse_next_begins(&self, count: u32) {
        self.state.lock().faults.refuse_begins = count;
    }

    /// Simulate a lost session; every call fails while set
    pub fn set_disconnected(&self, disconnected: bool) {
        self.state.lock().disconnected = disconnected;
    }

    pub fn stats(&self) -> StoreStats {
        self.state.lock().stats
    }
}

impl StoreState {
    fn check_connected(&self) -> StoreResult<()> {
        if self.disconnected {
            return Err(TransportError::Disconnected("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn table(&self, name: &str) -> StoreResult<&TableData> {
        self.tables
            .get(name)
            .ok_or_else(|| TransportError::InvalidStatement(format!("unknown table {}", name)))
    }

    /// Take a transaction out of the open set
    fn take_txn(&mut self, handle: HandleRef) -> StoreResult<ServerTxn> {
        if self.aborted.contains(&handle) {
            return Err(TransportError::Aborted(format!("transaction {} was already aborted", handle)));
        }
        self.txns.remove(&handle).ok_or(TransportError::UnknownHandle(handle))
    }

    fn mark_aborted(&mut self, handle: HandleRef) {
        self.aborted.insert(handle);
        self.stats.aborts += 1;
    }

    /// Put a transaction back unless the store aborted it
    fn settle<T>(&mut self, handle: HandleRef, txn: ServerTxn, result: &StoreResult<T>) {
        if let Err(TransportError::Aborted(reason)) = result {
            warn!("Server transaction {} aborted: {}", handle, reason);
            self.mark_aborted(handle);
        } else {
            self.txns.insert(handle, txn);
        }
    }

    /// Row as seen by a transaction: own writes first, then its snapshot
    fn visible(&self, txn: &ServerTxn, table: &str, key: i64) -> Option<Row> {
        if let Some(written) = txn.writes.get(&(table.to_string(), key)) {
            return written.clone();
        }
        self.tables.get(table)?.visible_at(key, txn.snapshot).cloned()
    }

    fn apply(&self, txn: &mut ServerTxn, command: &Command<'_>) -> StoreResult<QueryOutput> {
        match command.verb {
            Verb::Select => self.read(txn, command).map(QueryOutput::Rows),
            _ => self.write(txn, command).map(QueryOutput::Count),
        }
    }

    fn read(&self, txn: &mut ServerTxn, command: &Command<'_>) -> StoreResult<Vec<Row>> {
        let data = self.table(command.table)?;

        if let Some(key) = command.key {
            txn.point_reads.insert((command.table.to_string(), key));
            return Ok(self.visible(txn, command.table, key).into_iter().collect());
        }

        txn.scanned.insert(command.table.to_string());
        let mut rows = data.snapshot_rows(txn.snapshot);
        for ((table, key), written) in txn.writes.iter() {
            if table != command.table {
                continue;
            }
            match written {
                Some(row) => { rows.insert(*key, row.clone()); }
                None => { rows.remove(key); }
            }
        }

        Ok(rows
            .into_values()
            .filter(|row| command.params.iter().all(|(column, value)| row.get(column) == Some(value)))
            .collect())
    }

    fn write(&self, txn: &mut ServerTxn, command: &Command<'_>) -> StoreResult<u64> {
        let data = self.table(command.table)?;
        let key = command
            .key
            .ok_or_else(|| TransportError::InvalidStatement("write without id".to_string()))?;

        // First committer wins
        if data.latest_version(key) > txn.snapshot {
            return Err(TransportError::Aborted(format!(
                "write-write conflict on {}/{}", command.table, key
            )));
        }

        txn.point_reads.insert((command.table.to_string(), key));
        let current = self.visible(txn, command.table, key);

        let next = match (command.verb, current) {
            (Verb::Insert, Some(_)) => {
                return Err(TransportError::Constraint(format!(
                    "duplicate key {} in {}", key, command.table
                )));
            }
            (Verb::Insert, None) => Some(Row::from_params(command.params)),
            (Verb::Upsert, current) => {
                let mut row = current.unwrap_or_default();
                row.merge(command.params);
                Some(row)
            }
            (Verb::Update, Some(mut row)) => {
                row.merge(command.params);
                Some(row)
            }
            (Verb::Delete, Some(_)) => None,
            (Verb::Update, None) | (Verb::Delete, None) => return Ok(0),
            (Verb::Select, _) => {
                return Err(TransportError::InvalidStatement("read executed as write".to_string()));
            }
        };

        if let Some(row) = &next {
            self.check_references(txn, data, row)?;
        }
        txn.writes.insert((command.table.to_string(), key), next);
        Ok(1)
    }

    fn check_references(&self, txn: &mut ServerTxn, data: &TableData, row: &Row) -> StoreResult<()> {
        for reference in data.schema.references() {
            let parent_key = match row.get(&reference.column) {
                None | Some(DataValue::Null) => continue,
                Some(DataValue::Integer(id)) => *id,
                Some(other) => {
                    return Err(TransportError::Constraint(format!(
                        "{}.{} must hold an integer id, got {}",
                        data.schema.name(), reference.column, other
                    )));
                }
            };

            self.table(&reference.parent)?;
            txn.point_reads.insert((reference.parent.clone(), parent_key));
            if self.visible(txn, &reference.parent, parent_key).is_none() {
                return Err(TransportError::Constraint(format!(
                    "{}.{} references missing {} row {}",
                    data.schema.name(), reference.column, reference.parent, parent_key
                )));
            }
        }
        Ok(())
    }

    /// Reason a transaction may not commit, if any
    fn conflict(&self, txn: &ServerTxn) -> Option<String> {
        for (table, key) in txn.point_reads.iter().chain(txn.writes.keys()) {
            let changed = self
                .tables
                .get(table)
                .is_some_and(|data| data.latest_version(*key) > txn.snapshot);
            if changed {
                return Some(format!("{}/{} changed after snapshot {}", table, key, txn.snapshot));
            }
        }

        for table in &txn.scanned {
            let changed = self
                .tables
                .get(table)
                .is_some_and(|data| data.last_commit > txn.snapshot);
            if changed {
                return Some(format!("table {} changed after snapshot {}", table, txn.snapshot));
            }
        }
        None
    }
}

impl Transport for MemoryStore {
    fn begin_transaction(&self) -> StoreResult<HandleRef> {
        let mut state = self.state.lock();
        state.check_connected()?;
        if state.faults.refuse_begins > 0 {
            state.faults.refuse_begins -= 1;
            return Err(TransportError::Disconnected("injected begin refusal".to_string()));
        }

        state.next_handle += 1;
        let handle = state.next_handle;
        let snapshot = state.clock;
        state.txns.insert(handle, ServerTxn { snapshot, ..Default::default() });
        Ok(handle)
    }

    fn execute(&self, handle: HandleRef, statement: &Statement) -> StoreResult<QueryOutput> {
        let mut state = self.state.lock();
        state.check_connected()?;
        let command = command::parse(statement)?;

        let txn = state.take_txn(handle)?;
        let mut working = txn.clone();
        let result = state.apply(&mut working, &command);
        let keep = if result.is_ok() { working } else { txn };
        state.settle(handle, keep, &result);
        result
    }

    fn execute_batch(&self, handle: HandleRef, statements: &[Statement]) -> StoreResult<BatchOutcome> {
        let mut state = self.state.lock();
        state.check_connected()?;

        let txn = state.take_txn(handle)?;
        if state.faults.abort_batches > 0 {
            state.faults.abort_batches -= 1;
            let result: StoreResult<BatchOutcome> = Err(TransportError::Aborted("injected batch abort".to_string()));
            state.settle(handle, txn, &result);
            return result;
        }

        let mut working = txn.clone();
        let mut update_counts = Vec::with_capacity(statements.len());
        let mut result = Ok(());
        for statement in statements {
            match command::parse(statement).and_then(|command| state.apply(&mut working, &command)) {
                Ok(output) => update_counts.push(output.count()),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let result = result.map(|()| BatchOutcome { update_counts });
        let keep = if result.is_ok() { working } else { txn };
        state.settle(handle, keep, &result);
        result
    }

    fn commit(&self, handle: HandleRef) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_connected()?;
        let txn = state.take_txn(handle)?;

        if state.faults.abort_commits > 0 {
            state.faults.abort_commits -= 1;
            state.mark_aborted(handle);
            return Err(TransportError::Aborted("injected commit abort".to_string()));
        }

        if let Some(reason) = state.conflict(&txn) {
            debug!("Server transaction {} failed validation: {}", handle, reason);
            state.mark_aborted(handle);
            return Err(TransportError::Aborted(reason));
        }

        if !txn.writes.is_empty() {
            state.clock += 1;
            let version = state.clock;
            for ((table, key), row) in txn.writes {
                if let Some(data) = state.tables.get_mut(&table) {
                    data.rows.entry(key).or_default().push(version, row);
                    data.last_commit = version;
                }
            }
        }

        state.stats.commits += 1;
        Ok(())
    }

    fn rollback(&self, handle: HandleRef) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_connected()?;
        state.aborted.remove(&handle);
        if state.txns.remove(&handle).is_some() {
            state.stats.rollbacks += 1;
        }
        Ok(())
    }
}
