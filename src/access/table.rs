//! Primary table contract consumed by secondary indexes, plus a simple
//! in-memory table used by tests and the command line tool.

use crate::access::row::{Row, SearchRow};
use crate::access::value::{DataType, Value};
use crate::storage::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a secondary index needs from the table that owns the rows.
pub trait TableRows: Send + Sync {
    fn id(&self) -> TableId;

    fn column_count(&self) -> usize;

    fn column_type(&self, column_id: usize) -> Option<DataType>;

    /// Whether the table is backed by the page store.
    fn is_persistent(&self) -> bool;

    /// Resolve a row by its primary key.
    fn row(&self, key: i64) -> StorageResult<Row>;

    fn row_count_approximation(&self) -> u64;

    fn disk_space_used(&self) -> u64;

    fn contains_large_object(&self) -> bool;

    fn set_row_count(&self, count: u64);

    /// Release every large object owned by this table.
    fn remove_all_large_objects(&self);

    /// An empty search row shaped for this table.
    fn template_row(&self) -> SearchRow {
        SearchRow::template(self.column_count())
    }
}

/// Table rows kept in an ordered map, keyed by primary key.
pub struct MemoryTable {
    id: TableId,
    name: String,
    column_types: Vec<DataType>,
    persistent: bool,
    rows: RwLock<BTreeMap<i64, Row>>,
    row_count: AtomicU64,
    large_object_bytes: AtomicU64,
}

impl MemoryTable {
    pub fn new(id: TableId, name: impl Into<String>, column_types: Vec<DataType>) -> Self {
        Self {
            id,
            name: name.into(),
            column_types,
            persistent: true,
            rows: RwLock::new(BTreeMap::new()),
            row_count: AtomicU64::new(0),
            large_object_bytes: AtomicU64::new(0),
        }
    }

    /// Mark the table as living outside the page store.
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&self, row: Row) -> StorageResult<()> {
        if row.values.len() != self.column_types.len() {
            return Err(StorageError::Internal(format!(
                "table {} expects {} values, got {}",
                self.name,
                self.column_types.len(),
                row.values.len()
            )));
        }
        let mut lob_bytes = 0u64;
        for (value, data_type) in row.values.iter().zip(&self.column_types) {
            if !value.is_compatible_with(*data_type) {
                return Err(StorageError::Internal(format!(
                    "value {} is not compatible with {}",
                    value,
                    data_type.sql_name()
                )));
            }
            if data_type.is_large_object() {
                lob_bytes += match value {
                    Value::String(s) => s.len() as u64,
                    Value::Bytes(b) => b.len() as u64,
                    _ => 0,
                };
            }
        }
        if self.rows.write().insert(row.key, row).is_none() {
            self.row_count.fetch_add(1, Ordering::SeqCst);
        }
        self.large_object_bytes.fetch_add(lob_bytes, Ordering::SeqCst);
        Ok(())
    }

    pub fn delete(&self, key: i64) -> Option<Row> {
        let removed = self.rows.write().remove(&key);
        if removed.is_some() {
            let _ = self
                .row_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        }
        removed
    }

    pub fn clear(&self) {
        self.rows.write().clear();
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.read().values().cloned().collect()
    }

    pub fn large_object_bytes(&self) -> u64 {
        self.large_object_bytes.load(Ordering::SeqCst)
    }
}

impl TableRows for MemoryTable {
    fn id(&self) -> TableId {
        self.id
    }

    fn column_count(&self) -> usize {
        self.column_types.len()
    }

    fn column_type(&self, column_id: usize) -> Option<DataType> {
        self.column_types.get(column_id).copied()
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn row(&self, key: i64) -> StorageResult<Row> {
        self.rows
            .read()
            .get(&key)
            .cloned()
            .ok_or(StorageError::RowNotFound {
                table: self.id.0,
                key,
            })
    }

    fn row_count_approximation(&self) -> u64 {
        self.row_count.load(Ordering::SeqCst)
    }

    fn disk_space_used(&self) -> u64 {
        self.rows
            .read()
            .values()
            .map(|r| SearchRow::from(r).memory() as u64)
            .sum()
    }

    fn contains_large_object(&self) -> bool {
        self.column_types.iter().any(DataType::is_large_object)
    }

    fn set_row_count(&self, count: u64) {
        self.row_count.store(count, Ordering::SeqCst);
    }

    fn remove_all_large_objects(&self) {
        self.large_object_bytes.store(0, Ordering::SeqCst);
    }
}
