//! Operations shared by b-tree leaf and node pages.

use super::btree_leaf_page::BtreeLeaf;
use super::btree_node_page::BtreeNode;
use super::{PageId, PageType};
use crate::access::btree::context::BtreeContext;
use crate::access::btree::cursor::PageBtreeCursor;
use crate::access::btree::descriptor::{IndexDescriptor, IndexId};
use crate::access::row::SearchRow;
use crate::storage::error::{StorageError, StorageResult};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Flag bit: rows hold only the primary key.
pub const FLAG_ONLY_POSITION: u8 = 1;

/// Size of one row offset entry.
pub const OFFSET_LENGTH: usize = 2;

/// What a removal did to the last row of the page it happened in.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    /// The last row is the same as before.
    Unchanged,
    /// The page now ends with this row.
    LastChanged(SearchRow),
    /// The page held only the removed row and must be freed by its parent.
    Emptied,
}

#[derive(Clone)]
pub enum BtreePage {
    Leaf(Arc<BtreeLeaf>),
    Node(Arc<BtreeNode>),
}

/// Read the owning index id out of a b-tree page header.
pub(crate) fn peek_index_id(page_id: PageId, image: &[u8]) -> StorageResult<IndexId> {
    image
        .get(2..6)
        .map(|b| IndexId(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
        .ok_or_else(|| StorageError::corrupted(page_id, "truncated b-tree header"))
}

/// Binary search for `compare` among the sorted `rows`.
///
/// Returns the first position whose row is not smaller than `compare`, or
/// with `bigger` set, the first position whose row is strictly bigger. A
/// missing bound yields 0. With `compare_keys` set equal column values are
/// ordered by primary key. With `add` set an equal row in a unique index is
/// a duplicate key error, unless `compare` holds a NULL.
pub(crate) fn find_row(
    index: &IndexDescriptor,
    rows: &[SearchRow],
    compare: Option<&SearchRow>,
    bigger: bool,
    add: bool,
    compare_keys: bool,
) -> StorageResult<usize> {
    let Some(compare) = compare else {
        return Ok(0);
    };
    let mut l = 0;
    let mut r = rows.len();
    while l < r {
        let i = (l + r) >> 1;
        let row = &rows[i];
        let mut comp = index.compare_rows(row, compare);
        if comp == Ordering::Equal {
            if add && index.is_unique() && !index.contains_null(compare) {
                return Err(StorageError::DuplicateKey {
                    index: index.name().to_string(),
                    row: compare.to_string(),
                });
            }
            if compare_keys {
                comp = index.compare_keys(row, compare);
                if comp == Ordering::Equal {
                    return Ok(i);
                }
            }
        }
        if comp == Ordering::Greater || (!bigger && comp == Ordering::Equal) {
            r = i;
        } else {
            l = i + 1;
        }
    }
    Ok(l)
}

impl BtreePage {
    pub fn read(index: Arc<IndexDescriptor>, page_id: PageId, image: Vec<u8>) -> StorageResult<Self> {
        match image.first().copied().and_then(PageType::from_u8) {
            Some(PageType::BtreeLeaf) => Ok(BtreePage::Leaf(Arc::new(BtreeLeaf::read(index, page_id, image)?))),
            Some(PageType::BtreeNode) => Ok(BtreePage::Node(Arc::new(BtreeNode::read(index, page_id, image)?))),
            _ => Err(StorageError::corrupted(page_id, "not a b-tree page")),
        }
    }

    pub fn write_image(&self, page_size: usize) -> StorageResult<Vec<u8>> {
        match self {
            BtreePage::Leaf(leaf) => leaf.write_image(page_size),
            BtreePage::Node(node) => node.write_image(page_size),
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            BtreePage::Leaf(leaf) => leaf.page_id(),
            BtreePage::Node(node) => node.page_id(),
        }
    }

    pub fn parent_page_id(&self) -> Option<PageId> {
        match self {
            BtreePage::Leaf(leaf) => leaf.parent_page_id(),
            BtreePage::Node(node) => node.parent_page_id(),
        }
    }

    pub fn index(&self) -> &Arc<IndexDescriptor> {
        match self {
            BtreePage::Leaf(leaf) => leaf.index(),
            BtreePage::Node(node) => node.index(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, BtreePage::Leaf(_))
    }

    pub fn entry_count(&self) -> usize {
        match self {
            BtreePage::Leaf(leaf) => leaf.entry_count(),
            BtreePage::Node(node) => node.entry_count(),
        }
    }

    /// Row `at` of a leaf, or separator `at` of a node.
    pub fn row(&self, at: usize) -> StorageResult<&SearchRow> {
        let row = match self {
            BtreePage::Leaf(leaf) => leaf.row(at),
            BtreePage::Node(node) => node.row(at),
        };
        row.ok_or_else(|| {
            StorageError::Internal(format!("page {} has no row {}", self.page_id(), at))
        })
    }

    /// Try to insert `row` into this subtree. `Some(split_point)` means this
    /// page is full and must be split before the insert is retried.
    pub(crate) fn add_row_try(&mut self, ctx: &BtreeContext, row: &SearchRow) -> StorageResult<Option<usize>> {
        match self {
            BtreePage::Leaf(leaf) => Arc::make_mut(leaf).add_row_try(ctx, row),
            BtreePage::Node(node) => Arc::make_mut(node).add_row_try(ctx, row),
        }
    }

    /// Move the entries from `split_point` on into a new page. The new page
    /// gets a fresh id and the same parent.
    pub(crate) fn split(&mut self, ctx: &BtreeContext, split_point: usize) -> StorageResult<BtreePage> {
        match self {
            BtreePage::Leaf(leaf) => Ok(BtreePage::Leaf(Arc::new(Arc::make_mut(leaf).split(ctx, split_point)?))),
            BtreePage::Node(node) => Ok(BtreePage::Node(Arc::new(Arc::make_mut(node).split(ctx, split_point)?))),
        }
    }

    pub(crate) fn remove(&mut self, ctx: &BtreeContext, row: &SearchRow) -> StorageResult<RemoveOutcome> {
        match self {
            BtreePage::Leaf(leaf) => Arc::make_mut(leaf).remove(ctx, row),
            BtreePage::Node(node) => Arc::make_mut(node).remove(ctx, row),
        }
    }

    /// Free this page and everything below it.
    pub(crate) fn free_recursive(&self, ctx: &BtreeContext) -> StorageResult<()> {
        match self {
            BtreePage::Leaf(leaf) => leaf.free_recursive(ctx),
            BtreePage::Node(node) => node.free_recursive(ctx),
        }
    }

    pub(crate) fn set_page_id(&mut self, ctx: &BtreeContext, page_id: PageId) -> StorageResult<()> {
        match self {
            BtreePage::Leaf(leaf) => Arc::make_mut(leaf).set_page_id(ctx, page_id),
            BtreePage::Node(node) => Arc::make_mut(node).set_page_id(ctx, page_id),
        }
    }

    pub(crate) fn set_parent_page_id(&mut self, ctx: &BtreeContext, parent: Option<PageId>) -> StorageResult<()> {
        match self {
            BtreePage::Leaf(leaf) => Arc::make_mut(leaf).set_parent_page_id(ctx, parent),
            BtreePage::Node(node) => Arc::make_mut(node).set_parent_page_id(ctx, parent),
        }
    }

    /// Persist a row count in the page header. Leaves do not store one.
    pub(crate) fn set_row_count_stored(&mut self, ctx: &BtreeContext, count: Option<u32>) -> StorageResult<()> {
        match self {
            BtreePage::Leaf(_) => Ok(()),
            BtreePage::Node(node) => Arc::make_mut(node).set_row_count_stored(ctx, count),
        }
    }

    pub(crate) fn row_count(&self, ctx: &BtreeContext) -> StorageResult<u64> {
        match self {
            BtreePage::Leaf(leaf) => Ok(leaf.entry_count() as u64),
            BtreePage::Node(node) => node.row_count(ctx),
        }
    }

    /// Position `cursor` on the first row not smaller than `first` (or
    /// bigger than it, with `bigger` set).
    pub(crate) fn find(
        &self,
        ctx: &BtreeContext,
        cursor: &mut PageBtreeCursor,
        first: Option<&SearchRow>,
        bigger: bool,
    ) -> StorageResult<()> {
        match self {
            BtreePage::Leaf(leaf) => {
                let i = leaf.find(first, bigger, false, false)?;
                cursor.set_current(Some(leaf.clone()), i as isize);
                Ok(())
            }
            BtreePage::Node(node) => {
                let i = node.find(first, bigger, false, false)?;
                ctx.page(node.child(i))?.find(ctx, cursor, first, bigger)
            }
        }
    }

    /// Position `cursor` after the last row of this subtree.
    pub(crate) fn last(&self, ctx: &BtreeContext, cursor: &mut PageBtreeCursor) -> StorageResult<()> {
        let leaf = self.last_leaf(ctx)?;
        let i = leaf.entry_count() as isize;
        cursor.set_current(Some(leaf), i);
        Ok(())
    }

    pub(crate) fn first_leaf(&self, ctx: &BtreeContext) -> StorageResult<Arc<BtreeLeaf>> {
        match self {
            BtreePage::Leaf(leaf) => Ok(leaf.clone()),
            BtreePage::Node(node) => ctx.page(node.child(0))?.first_leaf(ctx),
        }
    }

    pub(crate) fn last_leaf(&self, ctx: &BtreeContext) -> StorageResult<Arc<BtreeLeaf>> {
        match self {
            BtreePage::Leaf(leaf) => Ok(leaf.clone()),
            BtreePage::Node(node) => ctx.page(node.child(node.entry_count()))?.last_leaf(ctx),
        }
    }

    /// Relocate this page to `new_page_id`. Returns true if it was the root.
    pub(crate) fn move_to(&self, ctx: &BtreeContext, new_page_id: PageId) -> StorageResult<bool> {
        match self {
            BtreePage::Leaf(leaf) => leaf.move_to(ctx, new_page_id),
            BtreePage::Node(node) => node.move_to(ctx, new_page_id),
        }
    }
}

impl fmt::Display for BtreePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BtreePage::Leaf(leaf) => write!(f, "{}", leaf),
            BtreePage::Node(node) => write!(f, "{}", node),
        }
    }
}

impl fmt::Debug for BtreePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BtreePage::Leaf(leaf) => leaf.fmt(f),
            BtreePage::Node(node) => node.fmt(f),
        }
    }
}
