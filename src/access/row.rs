use crate::access::value::Value;
use std::fmt;

/// Estimated fixed overhead of a row object, in bytes.
pub const MEMORY_ROW: usize = 40;

/// A full table row, identified by its primary row key.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: i64,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(key: i64, values: Vec<Value>) -> Self {
        Self { key, values }
    }

    pub fn value(&self, column_id: usize) -> Option<&Value> {
        self.values.get(column_id)
    }
}

/// A projection of a row: the primary key plus some of the column values.
///
/// `None` means the column is not part of this projection; a search bound
/// stops comparing at the first such column. `Some(Value::Null)` is SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRow {
    pub key: i64,
    pub values: Vec<Option<Value>>,
}

impl SearchRow {
    /// An empty shell with room for `column_count` values.
    pub fn template(column_count: usize) -> Self {
        Self {
            key: 0,
            values: vec![None; column_count],
        }
    }

    pub fn value(&self, column_id: usize) -> Option<&Value> {
        self.values.get(column_id).and_then(|v| v.as_ref())
    }

    pub fn set_value(&mut self, column_id: usize, value: Value) {
        if column_id >= self.values.len() {
            self.values.resize(column_id + 1, None);
        }
        self.values[column_id] = Some(value);
    }

    /// Estimated heap footprint, used for page memory accounting.
    pub fn memory(&self) -> usize {
        MEMORY_ROW
            + self.values.len() * 8
            + self
                .values
                .iter()
                .flatten()
                .map(Value::memory)
                .sum::<usize>()
    }
}

impl From<&Row> for SearchRow {
    fn from(row: &Row) -> Self {
        Self {
            key: row.key,
            values: row.values.iter().cloned().map(Some).collect(),
        }
    }
}

impl fmt::Display for SearchRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "( /* key:{} */ ", self.key)?;
        let mut first = true;
        for value in self.values.iter().flatten() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}
