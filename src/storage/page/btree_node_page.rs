//! B-tree inner node page.
//!
//! Layout:
//! ```text
//! type (1) | flags (1) | index id (4) | parent page id (4)
//! stored row count (4, -1 if unknown) | entry count (2)
//! child page ids (4 each, entry count + 1 of them)
//! offset of each separator row (2 each)
//! free space
//! separator rows, packed from the end of the page
//! ```
//!
//! Separator `i` is the last row of child `i`. Child `entry_count` holds
//! everything bigger than the last separator.

use super::btree_page::{self, BtreePage, RemoveOutcome, FLAG_ONLY_POSITION, OFFSET_LENGTH};
use super::{PageId, PageType, ROOT};
use crate::access::btree::context::BtreeContext;
use crate::access::btree::descriptor::IndexDescriptor;
use crate::access::row::SearchRow;
use crate::storage::data::Data;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::undo::UndoImage;
use log::trace;
use std::fmt;
use std::sync::Arc;

pub const NODE_HEADER_SIZE: usize = 16;

const CHILD_LENGTH: usize = 4;

/// A new separator costs its offset and one more child pointer.
const CHILD_OFFSET_PAIR_LENGTH: usize = OFFSET_LENGTH + CHILD_LENGTH;

const UNKNOWN_ROW_COUNT: i32 = -1;

#[derive(Clone)]
pub struct BtreeNode {
    index: Arc<IndexDescriptor>,
    page_id: PageId,
    parent_page_id: Option<PageId>,
    only_position: bool,
    rows: Vec<SearchRow>,
    children: Vec<PageId>,
    /// Rows in this subtree, if known.
    row_count: Option<u64>,
    /// Row count as written in the page header.
    row_count_stored: Option<u32>,
    used: usize,
}

impl BtreeNode {
    fn create(index: Arc<IndexDescriptor>, page_id: PageId, parent: Option<PageId>) -> Self {
        Self {
            index,
            page_id,
            parent_page_id: parent,
            only_position: false,
            rows: Vec::new(),
            children: Vec::new(),
            row_count: None,
            row_count_stored: None,
            used: NODE_HEADER_SIZE,
        }
    }

    /// A node with the two children `left` and `right`, separated by `pivot`.
    pub(crate) fn init(
        ctx: &BtreeContext,
        page_id: PageId,
        parent: Option<PageId>,
        left: &BtreePage,
        pivot: SearchRow,
        right: &BtreePage,
    ) -> StorageResult<Self> {
        let mut node = Self::create(ctx.index().clone(), page_id, parent);
        node.children.push(left.page_id());
        node.used = node.compute_used();
        node.add_child(ctx.page_size(), 0, right.page_id(), pivot)?;
        node.row_count = Some(left.row_count(ctx)? + right.row_count(ctx)?);
        Ok(node)
    }

    pub fn read(index: Arc<IndexDescriptor>, page_id: PageId, image: Vec<u8>) -> StorageResult<Self> {
        let mut data = Data::from_bytes(image);
        let page_type = data.read_u8()?;
        if page_type != PageType::BtreeNode as u8 {
            return Err(StorageError::corrupted(page_id, format!("type {} is not a b-tree node", page_type)));
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
        let stored = data.read_i32()?;
        let entry_count = data.read_u16()? as usize;
        let mut children = Vec::with_capacity(entry_count + 1);
        for _ in 0..=entry_count {
            children.push(PageId(data.read_u32()?));
        }
        let mut offsets = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            offsets.push(data.read_u16()? as usize);
        }
        let only_position = flags & FLAG_ONLY_POSITION != 0;
        let rows = offsets
            .into_iter()
            .map(|offset| index.read_row(&mut data, offset, only_position, true))
            .collect::<StorageResult<Vec<_>>>()?;

        let row_count_stored = u32::try_from(stored).ok();
        let mut node = Self {
            index,
            page_id,
            parent_page_id: (parent != ROOT).then_some(PageId(parent)),
            only_position,
            rows,
            children,
            row_count: row_count_stored.map(u64::from),
            row_count_stored,
            used: 0,
        };
        node.used = node.compute_used();
        Ok(node)
    }

    pub fn write_image(&self, page_size: usize) -> StorageResult<Vec<u8>> {
        if self.used > page_size {
            return Err(StorageError::Internal(format!(
                "node {} needs {} bytes, page size is {}",
                self.page_id, self.used, page_size
            )));
        }
        let mut data = Data::new(page_size);
        data.write_u8(PageType::BtreeNode as u8);
        data.write_u8(if self.only_position { FLAG_ONLY_POSITION } else { 0 });
        data.write_u32(self.index.id().0);
        data.write_u32(self.parent_page_id.map_or(ROOT, |p| p.0));
        // counts past i32::MAX go to disk as unknown and are recounted on read
        let stored = self.row_count_stored.and_then(|c| i32::try_from(c).ok());
        data.write_i32(stored.unwrap_or(UNKNOWN_ROW_COUNT));
        data.write_u16(self.rows.len() as u16);
        for child in &self.children {
            data.write_u32(child.0);
        }

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

    pub fn row(&self, at: usize) -> Option<&SearchRow> {
        self.rows.get(at)
    }

    pub fn child(&self, at: usize) -> PageId {
        self.children[at]
    }

    pub fn children(&self) -> &[PageId] {
        &self.children
    }

    pub fn row_count_stored(&self) -> Option<u32> {
        self.row_count_stored
    }

    fn compute_used(&self) -> usize {
        NODE_HEADER_SIZE
            + self.children.len() * CHILD_LENGTH
            + self
                .rows
                .iter()
                .map(|r| OFFSET_LENGTH + self.index.row_size(r, self.only_position))
                .sum::<usize>()
    }

    fn switch_to_only_position(&mut self) {
        if !self.only_position {
            trace!("node {} switches to only-position rows", self.page_id);
            self.only_position = true;
            self.used = self.compute_used();
        }
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

    /// `Some(split_point)` if this node must split before it can take `pivot`.
    /// Nodes with fewer than four entries never ask to split.
    fn add_child_try(&self, page_size: usize, pivot: &SearchRow) -> Option<usize> {
        if self.rows.len() < 4 {
            return None;
        }
        let row_len = self.index.row_size(pivot, self.only_position);
        if self.used + row_len + CHILD_OFFSET_PAIR_LENGTH > page_size {
            return Some(self.rows.len() / 2);
        }
        None
    }

    /// Insert separator `row` at `x` with `child` to its right.
    fn add_child(&mut self, page_size: usize, x: usize, child: PageId, row: SearchRow) -> StorageResult<()> {
        if self.used + self.index.row_size(&row, self.only_position) + CHILD_OFFSET_PAIR_LENGTH > page_size {
            self.switch_to_only_position();
        }
        let row_len = self.index.row_size(&row, self.only_position) + CHILD_OFFSET_PAIR_LENGTH;
        if self.used + row_len > page_size {
            return Err(StorageError::RowTooLarge {
                page_id: self.page_id,
                size: row_len,
                page_size,
            });
        }
        self.rows.insert(x, row);
        self.children.insert(x + 1, child);
        self.used += row_len;
        self.index.page_changed(page_size, &self.rows);
        Ok(())
    }

    /// Drop child `i` together with the separator next to it.
    fn remove_child(&mut self, i: usize) {
        let separator = i.min(self.rows.len() - 1);
        self.rows.remove(separator);
        self.children.remove(i);
        self.used = self.compute_used();
    }

    fn update_row_count(&mut self, offset: i64) {
        if let Some(count) = self.row_count {
            self.row_count = Some(count.saturating_add_signed(offset));
        }
        self.row_count_stored = None;
    }

    pub(crate) fn add_row_try(&mut self, ctx: &BtreeContext, row: &SearchRow) -> StorageResult<Option<usize>> {
        let page_size = ctx.page_size();
        loop {
            let x = self.find(Some(row), false, true, true)?;
            let mut page = ctx.page(self.children[x])?;
            let Some(split_point) = page.add_row_try(ctx, row)? else {
                break;
            };
            let pivot = page.row(split_point - 1)?.clone();
            ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
            if let Some(split_point) = self.add_child_try(page_size, &pivot) {
                return Ok(Some(split_point));
            }
            let page2 = page.split(ctx, split_point)?;
            trace!("split child {} of {} into {}", page.page_id(), self.page_id, page2.page_id());
            self.add_child(page_size, x, page2.page_id(), pivot)?;
            ctx.write(&page)?;
            ctx.write(&page2)?;
            ctx.write_node(self)?;
        }
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        self.update_row_count(1);
        ctx.write_node(self)?;
        Ok(None)
    }

    /// Keep separators before `split_point - 1` and the children left of
    /// them; the rest go to a new node. Separator `split_point - 1` is the
    /// pivot the caller promotes, and is dropped from both halves.
    pub(crate) fn split(&mut self, ctx: &BtreeContext, split_point: usize) -> StorageResult<BtreeNode> {
        let new_page_id = ctx.store().allocate_page()?;
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        let mut p2 = BtreeNode::create(self.index.clone(), new_page_id, self.parent_page_id);
        p2.only_position = self.only_position;
        p2.rows = self.rows.split_off(split_point);
        p2.children = self.children.split_off(split_point);
        self.rows.pop();
        self.row_count = None;
        self.row_count_stored = None;
        self.used = self.compute_used();
        p2.used = p2.compute_used();
        p2.remap_children(ctx)?;
        self.index.page_changed(ctx.page_size(), &self.rows);
        Ok(p2)
    }

    /// Point every child's parent at this node.
    fn remap_children(&self, ctx: &BtreeContext) -> StorageResult<()> {
        for child in &self.children {
            let mut page = ctx.page(*child)?;
            page.set_parent_page_id(ctx, Some(self.page_id))?;
            ctx.write(&page)?;
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, ctx: &BtreeContext, row: &SearchRow) -> StorageResult<RemoveOutcome> {
        let at = self.find(Some(row), false, false, true)?;
        let mut page = ctx.page(self.children[at])?;
        let outcome = page.remove(ctx, row)?;
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        self.update_row_count(-1);
        match outcome {
            RemoveOutcome::Unchanged => {
                ctx.write_node(self)?;
                Ok(RemoveOutcome::Unchanged)
            }
            RemoveOutcome::Emptied => {
                ctx.store().free(page.page_id())?;
                if self.rows.is_empty() {
                    return Ok(RemoveOutcome::Emptied);
                }
                let last = (at == self.rows.len()).then(|| self.rows[at - 1].clone());
                self.remove_child(at);
                ctx.write_node(self)?;
                Ok(last.map_or(RemoveOutcome::Unchanged, RemoveOutcome::LastChanged))
            }
            RemoveOutcome::LastChanged(last) => {
                if at == self.rows.len() {
                    ctx.write_node(self)?;
                    return Ok(RemoveOutcome::LastChanged(last));
                }
                self.set_separator(ctx.page_size(), at, last)?;
                ctx.write_node(self)?;
                Ok(RemoveOutcome::Unchanged)
            }
        }
    }

    fn set_separator(&mut self, page_size: usize, at: usize, row: SearchRow) -> StorageResult<()> {
        self.rows[at] = row;
        self.used = self.compute_used();
        if self.used > page_size {
            self.switch_to_only_position();
        }
        self.index.page_changed(page_size, &self.rows);
        Ok(())
    }

    pub(crate) fn free_recursive(&self, ctx: &BtreeContext) -> StorageResult<()> {
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        ctx.store().free(self.page_id)?;
        for child in &self.children {
            ctx.page(*child)?.free_recursive(ctx)?;
        }
        Ok(())
    }

    pub(crate) fn row_count(&self, ctx: &BtreeContext) -> StorageResult<u64> {
        if let Some(count) = self.row_count {
            return Ok(count);
        }
        let mut count = 0;
        for child in &self.children {
            count += ctx.page(*child)?.row_count(ctx)?;
        }
        Ok(count)
    }

    pub(crate) fn set_row_count_stored(&mut self, ctx: &BtreeContext, count: Option<u32>) -> StorageResult<()> {
        let row_count = count.map(u64::from);
        if self.row_count == row_count && self.row_count_stored == count {
            return Ok(());
        }
        self.row_count = row_count;
        if self.row_count_stored != count {
            ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
            self.row_count_stored = count;
        }
        ctx.write_node(self)
    }

    pub(crate) fn set_page_id(&mut self, ctx: &BtreeContext, page_id: PageId) -> StorageResult<()> {
        ctx.store().remove_record(self.page_id)?;
        self.page_id = page_id;
        ctx.store().log_undo(page_id, UndoImage::Fresh)?;
        self.remap_children(ctx)
    }

    pub(crate) fn set_parent_page_id(&mut self, ctx: &BtreeContext, parent: Option<PageId>) -> StorageResult<()> {
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        self.parent_page_id = parent;
        Ok(())
    }

    /// Replace the child pointer `old` with `new`.
    pub(crate) fn move_child(&mut self, ctx: &BtreeContext, old: PageId, new: PageId) -> StorageResult<()> {
        let at = self
            .children
            .iter()
            .position(|c| *c == old)
            .ok_or_else(|| StorageError::corrupted(self.page_id, format!("child {} not found", old)))?;
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        self.children[at] = new;
        ctx.write_node(self)
    }

    /// The leftmost leaf to the right of child `page_id`, walking up as needed.
    pub(crate) fn next_leaf(
        &self,
        ctx: &BtreeContext,
        page_id: PageId,
    ) -> StorageResult<Option<Arc<super::BtreeLeaf>>> {
        let next = self.children.iter().position(|c| *c == page_id).map(|i| i + 1);
        match next {
            Some(i) if i < self.children.len() => Ok(Some(ctx.page(self.children[i])?.first_leaf(ctx)?)),
            _ => match self.parent_page_id {
                None => Ok(None),
                Some(parent) => ctx.node(parent)?.next_leaf(ctx, self.page_id),
            },
        }
    }

    /// The rightmost leaf to the left of child `page_id`, walking up as needed.
    pub(crate) fn previous_leaf(
        &self,
        ctx: &BtreeContext,
        page_id: PageId,
    ) -> StorageResult<Option<Arc<super::BtreeLeaf>>> {
        let previous = self.children.iter().position(|c| *c == page_id);
        match previous {
            Some(i) if i > 0 => Ok(Some(ctx.page(self.children[i - 1])?.last_leaf(ctx)?)),
            _ => match self.parent_page_id {
                None => Ok(None),
                Some(parent) => ctx.node(parent)?.previous_leaf(ctx, self.page_id),
            },
        }
    }

    /// Copy this node to `new_page_id`, repoint parent and children, and free
    /// the old page. Returns true if the node was the root.
    pub(crate) fn move_to(&self, ctx: &BtreeContext, new_page_id: PageId) -> StorageResult<bool> {
        ctx.store().log_undo(self.page_id, UndoImage::Prior)?;
        ctx.store().log_undo(new_page_id, UndoImage::Fresh)?;
        let mut p2 = self.clone();
        p2.page_id = new_page_id;
        ctx.write_node(&p2)?;
        let is_root = match self.parent_page_id {
            None => true,
            Some(parent) => {
                ctx.move_child(parent, self.page_id, new_page_id)?;
                false
            }
        };
        p2.remap_children(ctx)?;
        ctx.store().free(self.page_id)?;
        Ok(is_root)
    }
}

impl fmt::Display for BtreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page[{}] b-tree node index:{} entries:{}",
            self.page_id,
            self.index.id(),
            self.rows.len()
        )
    }
}

impl fmt::Debug for BtreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtreeNode")
            .field("page_id", &self.page_id)
            .field("parent_page_id", &self.parent_page_id)
            .field("only_position", &self.only_position)
            .field("children", &self.children)
            .field("rows", &self.rows)
            .field("row_count", &self.row_count)
            .field("row_count_stored", &self.row_count_stored)
            .finish()
    }
}
