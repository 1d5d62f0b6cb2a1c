//! B-tree leaf page.
//!
//! Layout:
//! ```text
//! type (1) | flags (1) | index id (4) | parent page id (4) | entry count (2)
//! offset of each row (2 each)
//! free space
//! rows, packed from the end of the page
//! ```

use super::btree_page::{self, RemoveOutcome, FLAG_ONLY_POSITION, OFFSET_LENGTH};
use super::{PageId, PageType, ROOT};
use crate::access::btree::context::BtreeContext;
use crate::access::btree::descriptor::IndexDescriptor;
use crate::access::row::SearchRow;
use crate::storage::data::Data;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::undo::UndoImage;
use log::trace;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub const LEAF_HEADER_SIZE: usize = 12;

#[derive(Clone)]
pub struct BtreeLeaf {
    index: Arc<IndexDescriptor>,
    page_id: PageId,
    parent_page_id: Option<PageId>,
    only_position: bool,
    rows: Vec<SearchRow>,
    /// Encoded size: header, offsets and row data.
    used: usize,
}

impl BtreeLeaf {
    /// An empty leaf.
    pub fn create(index: Arc<IndexDescriptor>, page_id: PageId, parent: Option<PageId>) -> Self {
        Self {
            index,
            page_id,
            parent_page_id: parent,
            only_position: false,
            rows: Vec::new(),
            used: LEAF_HEADER_SIZE,
        }
    }

    pub fn read(index: Arc<IndexDescriptor>, page_id: PageId, image: Vec<u8>) -> StorageResult<Self> {
        let mut data = Data::from_bytes(image);
        let page_type = data.read_u8()?;
        if page_type != PageType::BtreeLeaf as u8 {
            return Err(StorageError::corrupted(page_id, format!("type {} is not a b-tree leaf", page_type)));
        }
        let flags = data.read_u8()?;
        let index_id = data.read_u32()?;
        if index_id != index.id().0 {
            return Err(StorageError::corrupted(
                page_id,
                format!("belongs to index {}, expected {}", index_id, index.id()),
            ));
        }
        let parent = data.read_u32()?;
        let entry_count = data.read_u16()? as usize;
        let mut offsets = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            offsets.push(data.read_u16()? as usize);
        }
        let only_position = flags & FLAG_ONLY_POSITION != 0;
        let rows = offsets
            .into_iter()
            .map(|offset| index.read_row(&mut data, offset, only_position, true))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut leaf = Self {
            index,
            page_id,
            parent_page_id: (parent != ROOT).then_some(PageId(parent)),
            only_position,
            rows,
            used: 0,
        };
        leaf.used = leaf.compute_used();
        Ok(leaf)
    }

    pub fn write_image(&self, page_size: usize) -> StorageResult<Vec<u8>> {
        if self.used > page_size {
            return Err(StorageError::Internal(format!(
                "leaf {} needs {} bytes, page size is {}",
                self.page_id, self.used, page_size
            )));
        }
        let mut data = Data::new(page_size);
        data.write_u8(PageType::BtreeLeaf as u8);
        data.write_u8(if self.only_position { FLAG_ONLY_POSITION } else { 0 });
        data.write_u32(self.index.id().0);
        data.write_u32(self.parent_page_id.map_or(ROOT, |p| p.0));
        data.write_u16(self.rows.len() as u16);

        let mut offsets = Vec::with_capacity(self.rows.len());
        let mut last = page_size;
        for row in &self.rows {
            last -= self.index.row_size(row, self.only_position);
            offsets.push(last);
        }
        for offset in &offsets {
            data.write_u16(*offset as u16);
        }
        for (row, offset) in self.rows.iter().zip(offsets) {
            self.index.write_row(&mut data, offset, row, self.only_position);
        }
        Ok(data.into_bytes())
    }

    pub fn index(&self) -> &Arc<IndexDescriptor> {
        &self.index
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn parent_page_id(&self) -> Option<PageId> {
        self.parent_page_id
    }

    pub fn entry_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[SearchRow] {
        &self.rows
    }

    pub fn row(&self, at: usize) -> Option<&SearchRow> {
        self.rows.get(at)
    }

    pub fn is_only_position(&self) -> bool {
        self.only_position
    }

    fn compute_used(&self) -> usize {
        LEAF_HEADER_SIZE
            + self
                .rows
                .iter()
                .map(|r| OFFSET_LENGTH + self.index.row_size(r, self.only_position))
                .sum::<usize>()
    }

    pub(crate) fn find(
        &self,
        compare: Option<&SearchRow>,
        bigger: bool,
        add: bool,
        compare_keys: bool,
    ) -> StorageResult<usize> {
        btree_page::find_row(&self.index, &self.rows, compare, bigger, add, compare_keys)
    }

    /// Insert `row`, or report where the page should be split first.
    pub(crate) fn add_row_try(&mut self, ctx: &BtreeContext, row: &SearchRow) -> StorageResult<Option<usize>> {
        let page_size = ctx.page_size();
        let row_len = self.index.row_size(row, self.only_position) + OFFSET_LENGTH;
        if self.used + row_len > page_size {
            let n = self.rows.len();
            if n > 1 {
                let x = self.find(Some(row), false, true, true)?;
                if n < 5 {
                    return Ok(Some(n / 2));
                }
                // split near the insertion point, but keep both halves sizable
                let third = n / 3;
                return Ok(Some(x.clamp(third, 2 * third)));
            }
            self.switch_to_only_position();
        }
        let x = self.find(Some(row), false, true, true)?;
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        self.insert_row(x, row.clone(), page_size)?;
        ctx.write_leaf(self)?;
        Ok(None)
    }

    fn switch_to_only_position(&mut self) {
        if !self.only_position {
            trace!("leaf {} switches to only-position rows", self.page_id);
            self.only_position = true;
            self.used = self.compute_used();
        }
    }

    fn insert_row(&mut self, at: usize, row: SearchRow, page_size: usize) -> StorageResult<()> {
        let row_len = self.index.row_size(&row, self.only_position) + OFFSET_LENGTH;
        if self.used + row_len > page_size {
            return Err(StorageError::RowTooLarge {
                page_id: self.page_id,
                size: row_len,
                page_size,
            });
        }
        self.rows.insert(at, row);
        self.used += row_len;
        self.index.page_changed(page_size, &self.rows);
        Ok(())
    }

    /// Append a row during a split, falling back to only-position rows if it
    /// does not fit.
    fn append_row(&mut self, row: SearchRow, page_size: usize) -> StorageResult<()> {
        let row_len = self.index.row_size(&row, self.only_position) + OFFSET_LENGTH;
        if self.used + row_len > page_size {
            self.switch_to_only_position();
        }
        let at = self.rows.len();
        self.insert_row(at, row, page_size)
    }

    /// Move rows `split_point..` into a new leaf with a freshly allocated id.
    pub(crate) fn split(&mut self, ctx: &BtreeContext, split_point: usize) -> StorageResult<BtreeLeaf> {
        let page_size = ctx.page_size();
        let new_page_id = ctx.store().allocate_page()?;
        let mut p2 = BtreeLeaf::create(self.index.clone(), new_page_id, self.parent_page_id);
        for row in self.rows.split_off(split_point) {
            p2.append_row(row, page_size)?;
        }
        self.used = self.compute_used();
        self.index.page_changed(page_size, &self.rows);
        Ok(p2)
    }

    pub(crate) fn remove(&mut self, ctx: &BtreeContext, row: &SearchRow) -> StorageResult<RemoveOutcome> {
        let at = self.find(Some(row), false, false, true)?;
        let found = self
            .rows
            .get(at)
            .is_some_and(|r| self.index.compare_rows(row, r) == Ordering::Equal && r.key == row.key);
        if !found {
            return Err(StorageError::RowNotFoundWhenDeleting {
                index: self.index.name().to_string(),
                row: row.to_string(),
            });
        }
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        if self.rows.len() == 1 {
            return Ok(RemoveOutcome::Emptied);
        }
        self.rows.remove(at);
        self.used = self.compute_used();
        self.index.page_changed(ctx.page_size(), &self.rows);
        ctx.write_leaf(self)?;
        if at == self.rows.len() {
            return Ok(RemoveOutcome::LastChanged(self.rows[at - 1].clone()));
        }
        Ok(RemoveOutcome::Unchanged)
    }

    pub(crate) fn free_recursive(&self, ctx: &BtreeContext) -> StorageResult<()> {
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        ctx.store().free(self.page_id)
    }

    pub(crate) fn set_page_id(&mut self, ctx: &BtreeContext, page_id: PageId) -> StorageResult<()> {
        ctx.store().remove_record(self.page_id)?;
        self.page_id = page_id;
        ctx.store().log_undo(page_id, UndoImage::Fresh)
    }

    pub(crate) fn set_parent_page_id(&mut self, ctx: &BtreeContext, parent: Option<PageId>) -> StorageResult<()> {
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        self.parent_page_id = parent;
        Ok(())
    }

    /// Copy this leaf to `new_page_id`, repoint the parent and free the old page.
    /// Returns true if the leaf was the root.
    pub(crate) fn move_to(&self, ctx: &BtreeContext, new_page_id: PageId) -> StorageResult<bool> {
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        ctx.store().log_undo(new_page_id, UndoImage::Fresh)?;
        let mut p2 = self.clone();
        p2.page_id = new_page_id;
        ctx.write_leaf(&p2)?;
        let is_root = match self.parent_page_id {
            None => true,
            Some(parent) => {
                ctx.move_child(parent, self.page_id, new_page_id)?;
                false
            }
        };
        ctx.store().free(self.page_id)?;
        Ok(is_root)
    }
}

impl fmt::Display for BtreeLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page[{}] b-tree leaf index:{} entries:{}",
            self.page_id,
            self.index.id(),
            self.rows.len()
        )
    }
}

impl fmt::Debug for BtreeLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtreeLeaf")
            .field("page_id", &self.page_id)
            .field("parent_page_id", &self.parent_page_id)
            .field("only_position", &self.only_position)
            .field("rows", &self.rows)
            .finish()
    }
}
