//! Secondary index stored as a b-tree in the page store.
//!
//! Leaves hold the indexed column values of each row plus its primary key,
//! nodes hold child page ids and separator rows. The root keeps its page id
//! for the lifetime of the index: when it overflows, its content moves to two
//! new pages and a node replaces it in place.

pub mod context;
pub mod cost;
pub mod cursor;
pub mod descriptor;
pub mod memory;
pub mod row_codec;

use self::context::BtreeContext;
use self::cost::SortOrder;
use self::cursor::PageBtreeCursor;
use self::descriptor::{IndexDefinition, IndexDescriptor, IndexId};
use crate::access::row::{Row, SearchRow};
use crate::access::table::TableRows;
use crate::access::value::Value;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::meta::IndexMeta;
use crate::storage::page::{BtreeLeaf, BtreeNode, BtreePage, Page, PageId, RemoveOutcome};
use crate::storage::store::PageStore;
use crate::storage::undo::UndoImage;
use log::debug;
use std::sync::Arc;

pub struct PageBtreeIndex {
    store: PageStore,
    index: Arc<IndexDescriptor>,
    ctx: BtreeContext,
    root_page_id: PageId,
    row_count: u64,
    need_rebuild: bool,
}

impl PageBtreeIndex {
    /// Create a new, empty index over `table`.
    pub fn create(store: PageStore, table: Arc<dyn TableRows>, definition: IndexDefinition) -> StorageResult<Self> {
        Self::new(store, table, definition, true)
    }

    /// Open an index whose metadata is already in the store.
    pub fn open(store: PageStore, table: Arc<dyn TableRows>, definition: IndexDefinition) -> StorageResult<Self> {
        Self::new(store, table, definition, false)
    }

    pub fn new(
        store: PageStore,
        table: Arc<dyn TableRows>,
        definition: IndexDefinition,
        create: bool,
    ) -> StorageResult<Self> {
        if create {
            if let Some(column) = definition.columns.iter().find(|c| c.data_type.is_large_object()) {
                return Err(StorageError::FeatureNotSupported(format!(
                    "index on {} column {}",
                    column.data_type.sql_name(),
                    column.name
                )));
            }
        }
        if !table.is_persistent() {
            return Err(StorageError::Internal(format!(
                "index {} on table {} that is not persistent",
                definition.name,
                table.id()
            )));
        }
        if definition.columns.is_empty() {
            return Err(StorageError::Internal(format!("index {} has no columns", definition.name)));
        }

        let index = Arc::new(IndexDescriptor::new(definition, table, store.page_size()));
        let ctx = BtreeContext::new(store.clone(), index.clone());
        store.add_index(index.clone());

        let mut this = Self {
            store,
            index,
            ctx,
            root_page_id: PageId(0),
            row_count: 0,
            need_rebuild: create,
        };
        if create {
            this.root_page_id = this.store.allocate_page()?;
            this.store.add_meta(this.meta())?;
            let root = BtreeLeaf::create(this.index.clone(), this.root_page_id, None);
            this.store.log_undo(this.root_page_id, UndoImage::Fresh)?;
            this.ctx.write_leaf(&root)?;
        } else {
            this.root_page_id = this.store.root_page_id(this.index.id())?.ok_or_else(|| {
                StorageError::Internal(format!("index {} has no metadata", this.index.name()))
            })?;
            this.row_count = this.ctx.page(this.root_page_id)?.row_count(&this.ctx)?;
            this.need_rebuild = this.row_count == 0 && this.store.is_recovery_running();
        }
        debug!("opened {} rows: {}", this.index.name(), this.row_count);
        Ok(this)
    }

    pub fn id(&self) -> IndexId {
        self.index.id()
    }

    pub fn name(&self) -> &str {
        self.index.name()
    }

    pub fn descriptor(&self) -> &Arc<IndexDescriptor> {
        &self.index
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &BtreeContext {
        &self.ctx
    }

    fn meta(&self) -> IndexMeta {
        let definition = self.index.definition();
        IndexMeta {
            index_id: definition.id,
            table_id: self.index.table().id(),
            name: definition.name.clone(),
            root_page_id: self.root_page_id,
            columns: definition.columns.clone(),
            unique: definition.unique,
        }
    }

    fn root(&self) -> StorageResult<BtreePage> {
        self.ctx.page(self.root_page_id)
    }

    pub fn add(&mut self, row: &Row) -> StorageResult<()> {
        let store = self.store.clone();
        let _change = store.change_scope();
        let row = self.index.search_row(row);
        debug!("{} add {}", self.index.name(), row);
        self.add_row(&row)
    }

    fn add_row(&mut self, row: &SearchRow) -> StorageResult<()> {
        loop {
            let mut root = self.root()?;
            let Some(split_point) = root.add_row_try(&self.ctx, row)? else {
                break;
            };
            debug!("split {} at {}", self.index.name(), split_point);
            let pivot = root.row(split_point - 1)?.clone();
            self.store.log_undo(self.root_page_id, UndoImage::Prior)?;
            let mut page1 = root;
            let mut page2 = page1.split(&self.ctx, split_point)?;
            self.store.log_undo(page2.page_id(), UndoImage::Fresh)?;
            let id = self.store.allocate_page()?;
            page1.set_page_id(&self.ctx, id)?;
            // both halves sit right below the root for now; deeper levels
            // were remapped by the page moves above
            page1.set_parent_page_id(&self.ctx, Some(self.root_page_id))?;
            page2.set_parent_page_id(&self.ctx, Some(self.root_page_id))?;
            let new_root = BtreeNode::init(&self.ctx, self.root_page_id, None, &page1, pivot, &page2)?;
            self.ctx.write(&page1)?;
            self.ctx.write(&page2)?;
            self.ctx.write_node(&new_root)?;
        }
        self.invalidate_row_count()?;
        self.row_count += 1;
        Ok(())
    }

    pub fn remove(&mut self, row: &Row) -> StorageResult<()> {
        debug!("{} remove {}", self.index.name(), row.key);
        if self.row_count == 1 {
            return self.remove_all_rows();
        }
        let store = self.store.clone();
        let _change = store.change_scope();
        let row = self.index.search_row(row);
        let mut root = self.root()?;
        if root.remove(&self.ctx, &row)? == RemoveOutcome::Emptied {
            // the stored count was off and the tree is empty now
            self.reset_root()?;
            self.row_count = 0;
            return Ok(());
        }
        self.invalidate_row_count()?;
        self.row_count = self.row_count.saturating_sub(1);
        Ok(())
    }

    /// Drop the index: free all of its pages and its metadata.
    pub fn remove_index(mut self) -> StorageResult<()> {
        debug!("remove {}", self.index.name());
        self.remove_all_rows()?;
        self.store.free(self.root_page_id)?;
        self.store.remove_meta(self.index.id())?;
        self.store.remove_index(self.index.id());
        Ok(())
    }

    /// Remove all rows, for TRUNCATE TABLE. The table loses its large
    /// objects and its row count too.
    pub fn truncate(&mut self) -> StorageResult<()> {
        debug!("truncate {}", self.index.name());
        self.remove_all_rows()?;
        let table = self.index.table();
        if table.contains_large_object() {
            table.remove_all_large_objects();
        }
        table.set_row_count(0);
        Ok(())
    }

    fn remove_all_rows(&mut self) -> StorageResult<()> {
        let store = self.store.clone();
        let _change = store.change_scope();
        self.root()?.free_recursive(&self.ctx)?;
        self.reset_root()?;
        self.row_count = 0;
        Ok(())
    }

    /// Put an empty leaf at the root page id.
    fn reset_root(&mut self) -> StorageResult<()> {
        let root = BtreeLeaf::create(self.index.clone(), self.root_page_id, None);
        self.store.remove_record(self.root_page_id)?;
        self.ctx.write_leaf(&root)
    }

    /// Rows from `first` up to and including `last`. A missing bound is
    /// open.
    pub fn find(&self, first: Option<&SearchRow>, last: Option<&SearchRow>) -> StorageResult<PageBtreeCursor> {
        self.find_from(first, false, last)
    }

    /// Like [`find`](Self::find), but skipping rows equal to `first`.
    pub fn find_next(&self, first: Option<&SearchRow>, last: Option<&SearchRow>) -> StorageResult<PageBtreeCursor> {
        self.find_from(first, true, last)
    }

    fn find_from(
        &self,
        first: Option<&SearchRow>,
        bigger: bool,
        last: Option<&SearchRow>,
    ) -> StorageResult<PageBtreeCursor> {
        let root = self.root()?;
        let mut cursor = PageBtreeCursor::new(self.ctx.clone(), last.cloned());
        root.find(&self.ctx, &mut cursor, first, bigger)?;
        Ok(cursor)
    }

    /// A cursor positioned on the smallest (or largest) row whose first
    /// indexed column is not NULL. The cursor has no current row if there
    /// is none.
    pub fn find_first_or_last(&self, first: bool) -> StorageResult<PageBtreeCursor> {
        let column_id = self.index.columns()[0].column_id;
        let is_null = |row: &SearchRow| matches!(row.value(column_id), Some(Value::Null));
        if first {
            // TODO: seek to the first non-NULL key instead of stepping over NULLs
            let mut cursor = self.find_from(None, false, None)?;
            while cursor.next()? {
                if cursor.search_row().is_some_and(|row| !is_null(row)) {
                    return Ok(cursor);
                }
            }
            return Ok(cursor);
        }
        let mut cursor = PageBtreeCursor::new(self.ctx.clone(), None);
        self.root()?.last(&self.ctx, &mut cursor)?;
        cursor.previous()?;
        loop {
            match cursor.search_row() {
                None => break,
                Some(row) if !is_null(row) => return Ok(cursor),
                Some(_) => {}
            }
            if !cursor.previous()? {
                break;
            }
        }
        Ok(cursor)
    }

    /// Estimated cost of a lookup, for the planner.
    pub fn get_cost(&self, masks: Option<&[u8]>, sort_order: Option<&SortOrder>) -> f64 {
        10.0 * cost::range_index_cost(
            self.index.columns(),
            self.index.is_unique(),
            masks,
            self.index.table().row_count_approximation(),
            sort_order,
        )
    }

    /// Whether the index must be filled by a table scan before it can be used.
    pub fn need_rebuild(&self) -> bool {
        self.need_rebuild
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn row_count_approximation(&self) -> u64 {
        self.index.table().row_count_approximation()
    }

    pub fn disk_space_used(&self) -> u64 {
        self.index.table().disk_space_used()
    }

    /// The full table row for a primary key.
    pub fn row(&self, key: i64) -> StorageResult<Row> {
        self.index.table().row(key)
    }

    /// Whether `row` carries a value for the first indexed column.
    pub fn has_data(&self, row: &SearchRow) -> bool {
        row.value(self.index.columns()[0].column_id).is_some()
    }

    pub fn can_get_first_or_last(&self) -> bool {
        true
    }

    pub fn can_find_next(&self) -> bool {
        true
    }

    pub fn check_rename(&self) -> StorageResult<()> {
        Ok(())
    }

    pub fn memory_per_page(&self) -> usize {
        self.index.memory_per_page()
    }

    /// Store the row count in the root page. The index stays usable.
    pub fn close(&mut self) -> StorageResult<()> {
        debug!("close {}", self.index.name());
        let store = self.store.clone();
        let _change = store.change_scope();
        self.write_row_count()
    }

    /// Persist the row count in the root. A count past `i32::MAX` does not
    /// fit the header and is left unknown, so the next open recounts.
    pub fn write_row_count(&mut self) -> StorageResult<()> {
        let count = i32::try_from(self.row_count).ok().map(|c| c as u32);
        let mut root = self.root()?;
        root.set_row_count_stored(&self.ctx, count)
    }

    fn invalidate_row_count(&mut self) -> StorageResult<()> {
        let mut root = self.root()?;
        root.set_row_count_stored(&self.ctx, None)
    }

    /// The root moved to `page_id`.
    pub fn set_root_page_id(&mut self, page_id: PageId) -> StorageResult<()> {
        self.store.remove_meta(self.index.id())?;
        self.root_page_id = page_id;
        self.store.add_meta(self.meta())?;
        self.store.add_index(self.index.clone());
        Ok(())
    }

    /// Move page `from` of this index to the unused page `to`.
    pub fn relocate_page(&mut self, from: PageId, to: PageId) -> StorageResult<()> {
        let store = self.store.clone();
        let _change = store.change_scope();
        if store.get_page(to)?.is_some() {
            return Err(StorageError::Internal(format!("page {} is in use", to)));
        }
        let page = match store.get_page(from)? {
            Some(Page::Btree(page)) if page.index().id() == self.index.id() => page,
            _ => {
                return Err(StorageError::Internal(format!(
                    "page {} is not part of index {}",
                    from,
                    self.index.name()
                )))
            }
        };
        debug!("{} move page {} to {}", self.index.name(), from, to);
        if page.move_to(&self.ctx, to)? {
            self.set_root_page_id(to)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::descriptor::{IndexColumn, SortType};
    use super::*;
    use crate::access::table::{MemoryTable, TableId};
    use crate::access::value::DataType;
    use crate::storage::page::OpaquePage;
    use crate::storage::store::StoreConfig;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::cmp::Ordering;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        store: PageStore,
        table: Arc<MemoryTable>,
    }

    fn fixture(page_size: usize, column_types: Vec<DataType>) -> Fixture {
        let dir = tempdir().unwrap();
        let config = StoreConfig::default().with_page_size(page_size);
        let store = PageStore::create(&dir.path().join("test.db"), config).unwrap();
        let table = Arc::new(MemoryTable::new(TableId(1), "t", column_types));
        Fixture {
            _dir: dir,
            store,
            table,
        }
    }

    fn int_index(f: &Fixture, column: IndexColumn) -> PageBtreeIndex {
        let def = IndexDefinition::new(IndexId(1), "idx_a", vec![column]);
        PageBtreeIndex::create(f.store.clone(), f.table.clone(), def).unwrap()
    }

    fn int_row(key: i64, a: Option<i32>) -> Row {
        Row::new(key, vec![a.map_or(Value::Null, Value::Int32)])
    }

    fn insert(f: &Fixture, index: &mut PageBtreeIndex, row: Row) {
        f.table.insert(row.clone()).unwrap();
        index.add(&row).unwrap();
    }

    fn bound(a: i32) -> SearchRow {
        let mut row = SearchRow::template(1);
        row.set_value(0, Value::Int32(a));
        row
    }

    fn collect(cursor: PageBtreeCursor) -> Vec<SearchRow> {
        cursor.collect::<StorageResult<Vec<_>>>().unwrap()
    }

    fn values(rows: &[SearchRow]) -> Vec<i32> {
        rows.iter()
            .map(|r| match r.value(0) {
                Some(Value::Int32(v)) => *v,
                other => panic!("unexpected value {:?}", other),
            })
            .collect()
    }

    fn full_compare(index: &IndexDescriptor, a: &SearchRow, b: &SearchRow) -> Ordering {
        index.compare_rows(a, b).then_with(|| index.compare_keys(a, b))
    }

    /// Check parent links, child counts and separator bounds below
    /// `page_id`, and return the number of rows in the subtree.
    fn check_subtree(
        ctx: &BtreeContext,
        page_id: PageId,
        parent: Option<PageId>,
        lower: Option<&SearchRow>,
        upper: Option<&SearchRow>,
    ) -> u64 {
        let index = ctx.index();
        let page = ctx.page(page_id).unwrap();
        assert_eq!(page.parent_page_id(), parent, "parent of {}", page_id);
        match page {
            BtreePage::Leaf(leaf) => {
                for row in leaf.rows() {
                    if let Some(lower) = lower {
                        assert_eq!(full_compare(index, row, lower), Ordering::Greater);
                    }
                    if let Some(upper) = upper {
                        assert_ne!(full_compare(index, row, upper), Ordering::Greater);
                    }
                }
                for pair in leaf.rows().windows(2) {
                    assert_eq!(full_compare(index, &pair[0], &pair[1]), Ordering::Less);
                }
                leaf.entry_count() as u64
            }
            BtreePage::Node(node) => {
                assert_eq!(node.children().len(), node.entry_count() + 1);
                let mut count = 0;
                for (i, child) in node.children().iter().enumerate() {
                    let lo = if i == 0 { lower } else { node.row(i - 1) };
                    let hi = if i == node.entry_count() { upper } else { node.row(i) };
                    count += check_subtree(ctx, *child, Some(page_id), lo, hi);
                }
                count
            }
        }
    }

    #[test]
    fn test_create_index() {
        let f = fixture(256, vec![DataType::Int32]);
        let index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        assert!(index.need_rebuild());
        assert_eq!(index.row_count(), 0);
        assert!(index.root().unwrap().is_leaf());
        assert_eq!(
            f.store.index_meta(IndexId(1)).unwrap().unwrap().root_page_id,
            index.root_page_id()
        );
        assert!(collect(index.find(None, None).unwrap()).is_empty());
    }

    #[test]
    fn test_large_object_column_rejected() {
        let f = fixture(256, vec![DataType::Clob]);
        let def = IndexDefinition::new(IndexId(1), "idx_c", vec![IndexColumn::new(0, "c", DataType::Clob)]);
        let result = PageBtreeIndex::create(f.store.clone(), f.table.clone(), def);
        assert!(matches!(result, Err(StorageError::FeatureNotSupported(_))));
    }

    #[test]
    fn test_transient_table_rejected() {
        let f = fixture(256, vec![DataType::Int32]);
        let table = Arc::new(MemoryTable::new(TableId(2), "tmp", vec![DataType::Int32]).transient());
        let def = IndexDefinition::new(IndexId(1), "idx_a", vec![IndexColumn::new(0, "a", DataType::Int32)]);
        let result = PageBtreeIndex::create(f.store.clone(), table, def);
        assert!(matches!(result, Err(StorageError::Internal(_))));
    }

    #[test]
    fn test_rows_come_back_in_order() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        let mut keys: Vec<i64> = (1..=500).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(7));
        for key in &keys {
            insert(&f, &mut index, int_row(*key, Some((*key % 97) as i32)));
        }
        assert_eq!(index.row_count(), 500);

        let rows = collect(index.find(None, None).unwrap());
        assert_eq!(rows.len(), 500);
        for pair in rows.windows(2) {
            assert_eq!(full_compare(index.descriptor(), &pair[0], &pair[1]), Ordering::Less);
        }
        let root = index.root_page_id();
        assert_eq!(check_subtree(index.context(), root, None, None, None), 500);
    }

    #[test]
    fn test_descending_order() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32).descending());
        for key in 1..=200 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        let rows = collect(index.find(None, None).unwrap());
        let expected: Vec<i32> = (1..=200).rev().collect();
        assert_eq!(values(&rows), expected);
        let root = index.root_page_id();
        assert_eq!(check_subtree(index.context(), root, None, None, None), 200);
    }

    #[test]
    fn test_root_split_scenario() {
        let f = fixture(128, vec![DataType::Varchar]);
        let def = IndexDefinition::new(IndexId(1), "idx_a", vec![IndexColumn::new(0, "a", DataType::Varchar)]);
        let mut index = PageBtreeIndex::create(f.store.clone(), f.table.clone(), def).unwrap();
        let row = |key: i64, a: i32| Row::new(key, vec![Value::String(format!("{:013}", a))]);

        // six of these rows fill a 128 byte leaf
        let size = index.descriptor().row_size(&index.descriptor().search_row(&row(1, 1)), false);
        assert_eq!((128 - 12) / (size + 2), 6);

        for (key, a) in [(1, 5), (2, 3), (3, 8), (4, 1)] {
            insert(&f, &mut index, row(key, a));
        }
        let first = index.find_first_or_last(true).unwrap();
        assert_eq!(first.search_row().unwrap().key, 4);
        assert!(index.root().unwrap().is_leaf());

        for (key, a) in [(5, 9), (6, 10), (7, 11)] {
            insert(&f, &mut index, row(key, a));
        }
        match index.root().unwrap() {
            BtreePage::Node(node) => assert_eq!(node.children().len(), 2),
            BtreePage::Leaf(_) => panic!("root should have split"),
        }
        assert_eq!(index.row_count(), 7);
        let root = index.root_page_id();
        assert_eq!(check_subtree(index.context(), root, None, None, None), 7);
        let keys: Vec<i64> = collect(index.find(None, None).unwrap()).iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![4, 2, 1, 3, 5, 6, 7]);
    }

    #[test]
    fn test_find_range() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        for key in 1..=100 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        let rows = collect(index.find(Some(&bound(10)), Some(&bound(20))).unwrap());
        assert_eq!(values(&rows), (10..=20).collect::<Vec<_>>());

        let rows = collect(index.find_next(Some(&bound(10)), Some(&bound(20))).unwrap());
        assert_eq!(values(&rows), (11..=20).collect::<Vec<_>>());

        let rows = collect(index.find(Some(&bound(95)), None).unwrap());
        assert_eq!(values(&rows), (95..=100).collect::<Vec<_>>());

        assert!(collect(index.find(Some(&bound(200)), None).unwrap()).is_empty());
    }

    #[test]
    fn test_cursor_resolves_table_row() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        insert(&f, &mut index, int_row(42, Some(7)));
        let mut cursor = index.find(Some(&bound(7)), Some(&bound(7))).unwrap();
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.row().unwrap(), Some(int_row(42, Some(7))));
        assert!(!cursor.next().unwrap());
        assert_eq!(index.row(42).unwrap(), int_row(42, Some(7)));
    }

    #[test]
    fn test_cursor_stops_at_both_ends() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        insert(&f, &mut index, int_row(1, Some(1)));

        let mut last = index.find_first_or_last(false).unwrap();
        assert_eq!(last.search_row().map(|r| r.key), Some(1));
        assert!(!last.next().unwrap());
        assert!(last.search_row().is_none());
        assert!(!last.previous().unwrap());

        let mut first = index.find_first_or_last(true).unwrap();
        assert_eq!(first.search_row().map(|r| r.key), Some(1));
        assert!(!first.previous().unwrap());
        assert!(!first.next().unwrap());
    }

    #[test]
    fn test_cursor_changes_direction_across_leaves() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        for key in 1..=100 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        assert!(!index.root().unwrap().is_leaf());
        let current = |cursor: &PageBtreeCursor| values(&[cursor.search_row().unwrap().clone()])[0];

        let mut cursor = index.find_first_or_last(false).unwrap();
        assert_eq!(current(&cursor), 100);
        assert!(!cursor.next().unwrap());

        let mut cursor = index.find_first_or_last(false).unwrap();
        for expected in (1..100).rev() {
            assert!(cursor.previous().unwrap());
            assert_eq!(current(&cursor), expected);
        }
        assert!(cursor.next().unwrap());
        assert_eq!(current(&cursor), 2);

        let mut cursor = index.find_first_or_last(true).unwrap();
        assert_eq!(current(&cursor), 1);
        assert!(!cursor.previous().unwrap());

        let mut cursor = index.find_first_or_last(true).unwrap();
        for expected in 2..=60 {
            assert!(cursor.next().unwrap());
            assert_eq!(current(&cursor), expected);
        }
        assert!(cursor.previous().unwrap());
        assert_eq!(current(&cursor), 59);

        // a fresh seek sits between rows
        let mut cursor = index.find(Some(&bound(50)), None).unwrap();
        assert!(cursor.previous().unwrap());
        assert_eq!(current(&cursor), 49);
    }

    #[test]
    fn test_find_first_or_last_skips_nulls() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32).nulls_last());
        for key in 1..=60 {
            insert(&f, &mut index, int_row(key, None));
        }
        assert!(index.find_first_or_last(true).unwrap().search_row().is_none());
        assert!(index.find_first_or_last(false).unwrap().search_row().is_none());

        for key in 61..=70 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        let first = index.find_first_or_last(true).unwrap();
        assert_eq!(first.search_row().unwrap().key, 61);
        let last = index.find_first_or_last(false).unwrap();
        assert_eq!(last.search_row().unwrap().key, 70);
    }

    #[test]
    fn test_find_last_on_empty_index() {
        let f = fixture(256, vec![DataType::Int32]);
        let index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        assert!(index.find_first_or_last(false).unwrap().search_row().is_none());
        assert!(index.find_first_or_last(true).unwrap().search_row().is_none());
    }

    #[test]
    fn test_unique_index() {
        let f = fixture(256, vec![DataType::Int32]);
        let def = IndexDefinition::new(IndexId(1), "uq_a", vec![IndexColumn::new(0, "a", DataType::Int32)]).unique();
        let mut index = PageBtreeIndex::create(f.store.clone(), f.table.clone(), def).unwrap();
        index.add(&int_row(1, Some(10))).unwrap();

        let before = f.store.change_count();
        let err = index.add(&int_row(2, Some(10))).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
        // the change is counted on the error path too
        assert_eq!(f.store.change_count(), before + 1);
        assert_eq!(index.row_count(), 1);

        index.add(&int_row(3, None)).unwrap();
        index.add(&int_row(4, None)).unwrap();
        assert_eq!(index.row_count(), 3);
    }

    #[test]
    fn test_remove_rows() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        for key in 1..=300 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        let mut keys: Vec<i64> = (1..=300).filter(|k| k % 3 != 0).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(11));
        for key in keys {
            index.remove(&int_row(key, Some(key as i32))).unwrap();
        }
        assert_eq!(index.row_count(), 100);
        let rows = collect(index.find(None, None).unwrap());
        assert_eq!(values(&rows), (1..=100).map(|i| i * 3).collect::<Vec<_>>());
        let root = index.root_page_id();
        assert_eq!(check_subtree(index.context(), root, None, None, None), 100);

        let err = index.remove(&int_row(1, Some(1))).unwrap_err();
        assert!(matches!(err, StorageError::RowNotFoundWhenDeleting { .. }));
    }

    #[test]
    fn test_remove_last_row_leaves_empty_root() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        let root_page_id = index.root_page_id();
        for key in 1..=100 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        assert!(!index.root().unwrap().is_leaf());
        for key in 1..=100 {
            index.remove(&int_row(key, Some(key as i32))).unwrap();
        }
        assert_eq!(index.row_count(), 0);
        assert_eq!(index.root_page_id(), root_page_id);
        let root = index.root().unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.entry_count(), 0);
        assert!(collect(index.find(None, None).unwrap()).is_empty());
    }

    #[test]
    fn test_truncate() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        for key in 1..=200 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        index.truncate().unwrap();
        assert_eq!(index.row_count(), 0);
        assert_eq!(f.table.row_count_approximation(), 0);
        assert!(f.store.free_page_count().unwrap() > 0);

        index.add(&int_row(500, Some(5))).unwrap();
        let rows = collect(index.find(None, None).unwrap());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, 500);
    }

    #[test]
    fn test_remove_index() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        for key in 1..=100 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        let pages = f.store.page_count().unwrap() as usize;
        index.remove_index().unwrap();
        assert!(f.store.index_meta(IndexId(1)).unwrap().is_none());
        assert_eq!(f.store.free_page_count().unwrap(), pages);
    }

    #[test]
    fn test_missing_page_is_an_empty_leaf() {
        let f = fixture(256, vec![DataType::Int32]);
        let index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        let id = f.store.allocate_page().unwrap();
        let page = index.context().page(id).unwrap();
        assert!(page.is_leaf());
        assert_eq!(page.entry_count(), 0);
        assert!(f.store.get_page(id).unwrap().is_some());
    }

    #[test]
    fn test_foreign_page_is_corruption() {
        let f = fixture(256, vec![DataType::Int32]);
        let index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        let id = f.store.allocate_page().unwrap();
        f.store.update(Page::from(OpaquePage::new(id, 1, b"data", 256))).unwrap();
        let err = index.context().page(id).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_relocate_root() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        for key in 1..=150 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        let old_root = index.root_page_id();
        let target = f.store.allocate_page().unwrap();
        index.relocate_page(old_root, target).unwrap();
        assert_eq!(index.root_page_id(), target);
        assert_eq!(f.store.index_meta(IndexId(1)).unwrap().unwrap().root_page_id, target);
        assert_eq!(check_subtree(index.context(), target, None, None, None), 150);

        // moving a leaf keeps the parent pointing at it
        let leaf = index.root().unwrap().first_leaf(index.context()).unwrap().page_id();
        let target = f.store.allocate_page().unwrap();
        index.relocate_page(leaf, target).unwrap();
        assert_eq!(check_subtree(index.context(), index.root_page_id(), None, None, None), 150);
        assert_eq!(values(&collect(index.find(None, None).unwrap())), (1..=150).collect::<Vec<_>>());

        let err = index.relocate_page(target, index.root_page_id()).unwrap_err();
        assert!(matches!(err, StorageError::Internal(_)));
    }

    #[test]
    fn test_close_and_reopen() {
        let f = fixture(256, vec![DataType::Int32]);
        let def = IndexDefinition::new(IndexId(1), "idx_a", vec![IndexColumn::new(0, "a", DataType::Int32)]);
        let mut index = PageBtreeIndex::create(f.store.clone(), f.table.clone(), def.clone()).unwrap();
        for key in 1..=120 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        index.close().unwrap();
        f.store.checkpoint().unwrap();

        let reopened = PageBtreeIndex::open(f.store.clone(), f.table.clone(), def).unwrap();
        assert!(!reopened.need_rebuild());
        assert_eq!(reopened.row_count(), 120);
        assert_eq!(collect(reopened.find(None, None).unwrap()).len(), 120);
    }

    #[test]
    fn test_get_cost() {
        let f = fixture(256, vec![DataType::Int32]);
        let index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        let base = cost::range_index_cost(index.descriptor().columns(), false, Some(&[cost::START]), 0, None);
        assert_eq!(index.get_cost(Some(&[cost::START]), None), 10.0 * base);
        let order = SortOrder::new(vec![(0, SortType::ASCENDING)]);
        assert!(index.get_cost(Some(&[0]), Some(&order)) < index.get_cost(Some(&[0]), None));
    }

    #[test]
    fn test_has_data() {
        let f = fixture(256, vec![DataType::Int32]);
        let index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        assert!(index.has_data(&bound(1)));
        assert!(!index.has_data(&SearchRow::template(1)));
        assert!(index.can_get_first_or_last());
        assert!(index.can_find_next());
        assert!(index.check_rename().is_ok());
    }

    #[test]
    fn test_memory_estimate_follows_pages() {
        let f = fixture(256, vec![DataType::Int32]);
        let mut index = int_index(&f, IndexColumn::new(0, "a", DataType::Int32));
        let initial = index.memory_per_page();
        for key in 1..=50 {
            insert(&f, &mut index, int_row(key, Some(key as i32)));
        }
        assert_ne!(index.memory_per_page(), initial);
    }
}
