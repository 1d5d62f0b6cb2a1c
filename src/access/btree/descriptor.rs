//! Index definition and the shared per-index state b-tree pages refer to.

use crate::access::btree::memory::MemoryEstimator;
use crate::access::row::{Row, SearchRow};
use crate::access::table::TableRows;
use crate::access::value::{DataType, Value};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sort flags of an indexed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortType(u8);

impl SortType {
    pub const ASCENDING: SortType = SortType(0);
    pub const DESCENDING: SortType = SortType(1);
    pub const NULLS_FIRST: SortType = SortType(2);
    pub const NULLS_LAST: SortType = SortType(4);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_descending(self) -> bool {
        self.0 & Self::DESCENDING.0 != 0
    }

    pub fn with(self, other: SortType) -> SortType {
        SortType(self.0 | other.0)
    }

    /// Order of a NULL against a non-NULL value, from the NULL's point of view.
    fn null_ordering(self) -> Ordering {
        if self.0 & Self::NULLS_FIRST.0 != 0 {
            Ordering::Less
        } else if self.0 & Self::NULLS_LAST.0 != 0 {
            Ordering::Greater
        } else if self.is_descending() {
            // NULL is the smallest value, so it comes last when descending
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// Compare two column values in this sort order.
    pub fn compare(self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => self.null_ordering(),
            (false, true) => self.null_ordering().reverse(),
            (false, false) => {
                let comp = a.compare_type_safe(b);
                if self.is_descending() {
                    comp.reverse()
                } else {
                    comp
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub column_id: usize,
    pub name: String,
    pub data_type: DataType,
    pub sort_type: SortType,
    /// Percentage of distinct values, 1 to 100.
    pub selectivity: u32,
}

impl IndexColumn {
    pub fn new(column_id: usize, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            column_id,
            name: name.into(),
            data_type,
            sort_type: SortType::ASCENDING,
            selectivity: 50,
        }
    }

    pub fn descending(mut self) -> Self {
        self.sort_type = self.sort_type.with(SortType::DESCENDING);
        self
    }

    pub fn nulls_first(mut self) -> Self {
        self.sort_type = self.sort_type.with(SortType::NULLS_FIRST);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.sort_type = self.sort_type.with(SortType::NULLS_LAST);
        self
    }

    pub fn with_selectivity(mut self, selectivity: u32) -> Self {
        self.selectivity = selectivity.clamp(1, 100);
        self
    }
}

/// What is declared about an index when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub id: IndexId,
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(id: IndexId, name: impl Into<String>, columns: Vec<IndexColumn>) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Per-index state shared by the controller and every page of the tree.
pub struct IndexDescriptor {
    definition: IndexDefinition,
    table: Arc<dyn TableRows>,
    memory: Mutex<MemoryEstimator>,
}

impl IndexDescriptor {
    pub fn new(definition: IndexDefinition, table: Arc<dyn TableRows>, page_size: usize) -> Self {
        Self {
            definition,
            table,
            memory: Mutex::new(MemoryEstimator::new(page_size)),
        }
    }

    pub fn id(&self) -> IndexId {
        self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.definition.columns
    }

    pub fn is_unique(&self) -> bool {
        self.definition.unique
    }

    pub fn table(&self) -> &Arc<dyn TableRows> {
        &self.table
    }

    /// Compare a stored row against a search bound, column by column.
    ///
    /// Comparison stops at the first column `compare` does not set, so a
    /// partial bound matches every row sharing its prefix.
    pub fn compare_rows(&self, row: &SearchRow, compare: &SearchRow) -> Ordering {
        for column in self.columns() {
            let Some(b) = compare.value(column.column_id) else {
                return Ordering::Equal;
            };
            let a = row.value(column.column_id).unwrap_or(&Value::Null);
            let comp = column.sort_type.compare(a, b);
            if comp != Ordering::Equal {
                return comp;
            }
        }
        Ordering::Equal
    }

    /// Tie-break on the primary row key.
    pub fn compare_keys(&self, a: &SearchRow, b: &SearchRow) -> Ordering {
        a.key.cmp(&b.key)
    }

    /// Whether any indexed column of `row` is NULL. Such rows never collide
    /// in a unique index.
    pub fn contains_null(&self, row: &SearchRow) -> bool {
        self.columns()
            .iter()
            .any(|c| matches!(row.value(c.column_id), Some(Value::Null)))
    }

    /// Project a table row onto the indexed columns.
    pub fn search_row(&self, row: &Row) -> SearchRow {
        let mut search = SearchRow::template(self.table.column_count());
        search.key = row.key;
        for column in self.columns() {
            let value = row.value(column.column_id).cloned().unwrap_or(Value::Null);
            search.set_value(column.column_id, value);
        }
        search
    }

    pub fn memory_per_page(&self) -> usize {
        self.memory.lock().memory_per_page()
    }

    /// Feed a page's current size into the estimate, on the sampling schedule.
    pub(crate) fn page_changed(&self, page_size: usize, rows: &[SearchRow]) {
        let mut memory = self.memory.lock();
        if memory.is_change_required() {
            memory.change(MemoryEstimator::page_sample(page_size, rows));
        }
    }
}

impl fmt::Debug for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("definition", &self.definition)
            .field("table", &self.table.id())
            .finish()
    }
}
