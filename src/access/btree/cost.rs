//! Cost estimate for range lookups through an index.

use crate::access::btree::descriptor::{IndexColumn, SortType};

/// The column is compared with `=`.
pub const EQUALITY: u8 = 1;
/// The column has a lower bound.
pub const START: u8 = 2;
/// The column has an upper bound.
pub const END: u8 = 4;
/// Both bounds.
pub const RANGE: u8 = START | END;

/// Added to every row count so an empty table still has a cost.
pub const COST_ROW_OFFSET: u64 = 1000;

/// The requested ORDER BY, as (column id, sort type) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOrder {
    pub columns: Vec<(usize, SortType)>,
}

impl SortOrder {
    pub fn new(columns: Vec<(usize, SortType)>) -> Self {
        Self { columns }
    }
}

/// Estimate how many rows a lookup with `masks` touches.
///
/// `masks[column_id]` holds the condition bits for each table column. An
/// equality on a leading column narrows the estimate by that column's
/// selectivity; the first range condition ends the prefix. Every leading
/// index column that already delivers `sort_order` lowers the cost by one.
pub fn range_index_cost(
    columns: &[IndexColumn],
    unique: bool,
    masks: Option<&[u8]>,
    row_count: u64,
    sort_order: Option<&SortOrder>,
) -> f64 {
    let row_count = row_count + COST_ROW_OFFSET;
    let Some(masks) = masks else {
        return row_count as f64;
    };
    let mut cost = row_count;
    let mut rows = row_count;
    let mut total_selectivity: u64 = 0;
    for (i, column) in columns.iter().enumerate() {
        let mask = masks.get(column.column_id).copied().unwrap_or(0);
        if mask & EQUALITY == EQUALITY {
            if i == columns.len() - 1 && unique {
                cost = 3;
                break;
            }
            let selectivity = u64::from(column.selectivity.min(100));
            total_selectivity = 100 - (100 - total_selectivity) * (100 - selectivity) / 100;
            let distinct_rows = (row_count * total_selectivity / 100).max(1);
            rows = (row_count / distinct_rows).max(1);
            cost = 2 + rows;
        } else if mask & RANGE == RANGE {
            cost = 2 + rows / 4;
            break;
        } else if mask & START == START {
            cost = 2 + rows / 3;
            break;
        } else if mask & END == END {
            cost = rows / 3;
            break;
        } else {
            break;
        }
    }
    if let Some(sort_order) = sort_order {
        let sorted = columns
            .iter()
            .zip(&sort_order.columns)
            .take_while(|(column, (id, sort_type))| {
                column.column_id == *id && column.sort_type.is_descending() == sort_type.is_descending()
            })
            .count() as u64;
        cost = cost.saturating_sub(sorted).max(1);
    }
    cost as f64
}
