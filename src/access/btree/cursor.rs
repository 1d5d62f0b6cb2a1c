//! Ordered iteration over the leaves of a b-tree index.

use crate::access::btree::context::BtreeContext;
use crate::access::row::{Row, SearchRow};
use crate::storage::error::StorageResult;
use crate::storage::page::BtreeLeaf;
use std::cmp::Ordering;
use std::sync::Arc;

/// A position inside the leaf level of an index.
///
/// The cursor walks forward with [`next`](Self::next) until it passes its
/// upper bound, or backward with [`previous`](Self::previous). It holds a
/// snapshot of the current leaf and moves to neighbours through the parent
/// chain. Once it runs off either end it stays exhausted.
pub struct PageBtreeCursor {
    ctx: BtreeContext,
    last: Option<SearchRow>,
    current: Option<Arc<BtreeLeaf>>,
    // entry of `current` the cursor is on, or the gap before it when
    // `on_entry` is unset
    i: isize,
    on_entry: bool,
    current_search_row: Option<SearchRow>,
    current_row: Option<Row>,
}

impl PageBtreeCursor {
    pub(crate) fn new(ctx: BtreeContext, last: Option<SearchRow>) -> Self {
        Self {
            ctx,
            last,
            current: None,
            i: 0,
            on_entry: false,
            current_search_row: None,
            current_row: None,
        }
    }

    /// Place the cursor in the gap before entry `i` of `leaf`: `next` reads
    /// entry `i`, `previous` reads entry `i - 1`.
    pub(crate) fn set_current(&mut self, leaf: Option<Arc<BtreeLeaf>>, i: isize) {
        self.current = leaf;
        self.i = i;
        self.on_entry = false;
    }

    /// The index projection of the current row.
    pub fn search_row(&self) -> Option<&SearchRow> {
        self.current_search_row.as_ref()
    }

    /// The full table row at the cursor, looked up by primary key.
    pub fn row(&mut self) -> StorageResult<Option<Row>> {
        if self.current_row.is_none() {
            if let Some(search) = &self.current_search_row {
                self.current_row = Some(self.ctx.index().table().row(search.key)?);
            }
        }
        Ok(self.current_row.clone())
    }

    pub fn next(&mut self) -> StorageResult<bool> {
        let mut i = if self.on_entry { self.i + 1 } else { self.i };
        let leaf = loop {
            let Some(leaf) = self.current.clone() else {
                return Ok(self.exhausted());
            };
            if i >= 0 && i < leaf.entry_count() as isize {
                break leaf;
            }
            self.current = match leaf.parent_page_id() {
                None => None,
                Some(parent) => self.ctx.node(parent)?.next_leaf(&self.ctx, leaf.page_id())?,
            };
            i = 0;
        };
        let row = leaf.rows()[i as usize].clone();
        if let Some(last) = &self.last {
            if self.ctx.index().compare_rows(&row, last) == Ordering::Greater {
                return Ok(self.exhausted());
            }
        }
        self.i = i;
        self.on_entry = true;
        self.current_search_row = Some(row);
        self.current_row = None;
        Ok(true)
    }

    pub fn previous(&mut self) -> StorageResult<bool> {
        let mut i = self.i - 1;
        let leaf = loop {
            let Some(leaf) = self.current.clone() else {
                return Ok(self.exhausted());
            };
            if i >= 0 && i < leaf.entry_count() as isize {
                break leaf;
            }
            self.current = match leaf.parent_page_id() {
                None => None,
                Some(parent) => self.ctx.node(parent)?.previous_leaf(&self.ctx, leaf.page_id())?,
            };
            i = self.current.as_ref().map_or(-1, |l| l.entry_count() as isize - 1);
        };
        self.i = i;
        self.on_entry = true;
        self.current_search_row = Some(leaf.rows()[i as usize].clone());
        self.current_row = None;
        Ok(true)
    }

    fn exhausted(&mut self) -> bool {
        self.current = None;
        self.current_search_row = None;
        self.current_row = None;
        false
    }
}

impl Iterator for PageBtreeCursor {
    type Item = StorageResult<SearchRow>;

    fn next(&mut self) -> Option<Self::Item> {
        match PageBtreeCursor::next(self) {
            Ok(true) => self.current_search_row.clone().map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
