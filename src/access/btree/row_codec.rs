//! Encoding of index rows inside b-tree pages.
//!
//! A row is the primary key as a variable-length long followed by the value
//! of each indexed column. Pages in only-position mode store the key alone
//! and go back to the table for the column values.

use crate::access::btree::descriptor::IndexDescriptor;
use crate::access::row::SearchRow;
use crate::access::value::Value;
use crate::storage::data::Data;
use crate::storage::error::StorageResult;

impl IndexDescriptor {
    /// Read the row stored at `offset`.
    ///
    /// With `need_data` unset an only-position row comes back as a bare key.
    pub fn read_row(
        &self,
        data: &mut Data,
        offset: usize,
        only_position: bool,
        need_data: bool,
    ) -> StorageResult<SearchRow> {
        data.set_pos(offset);
        let key = data.read_var_long()?;
        if only_position {
            if need_data {
                let row = self.table().row(key)?;
                return Ok(self.search_row(&row));
            }
            let mut row = self.table().template_row();
            row.key = key;
            return Ok(row);
        }
        let mut row = self.table().template_row();
        row.key = key;
        for column in self.columns() {
            let value = data.read_value()?;
            row.set_value(column.column_id, value);
        }
        Ok(row)
    }

    pub fn write_row(&self, data: &mut Data, offset: usize, row: &SearchRow, only_position: bool) {
        data.set_pos(offset);
        data.write_var_long(row.key);
        if !only_position {
            for column in self.columns() {
                data.write_value(self.column_value(row, column.column_id));
            }
        }
    }

    /// Encoded size of `row`.
    pub fn row_size(&self, row: &SearchRow, only_position: bool) -> usize {
        let mut size = Data::var_long_len(row.key);
        if !only_position {
            for column in self.columns() {
                size += Data::value_len(self.column_value(row, column.column_id));
            }
        }
        size
    }

    fn column_value<'a>(&self, row: &'a SearchRow, column_id: usize) -> &'a Value {
        static NULL: Value = Value::Null;
        row.value(column_id).unwrap_or(&NULL)
    }
}
