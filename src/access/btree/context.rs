use crate::access::btree::descriptor::IndexDescriptor;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{BtreeLeaf, BtreeNode, BtreePage, Page, PageId};
use crate::storage::store::PageStore;
use crate::storage::undo::UndoImage;
use std::sync::Arc;

/// The store and index a b-tree operation works against. Pages refer to
/// each other by id only and resolve those ids through here.
#[derive(Clone)]
pub struct BtreeContext {
    store: PageStore,
    index: Arc<IndexDescriptor>,
}

impl BtreeContext {
    pub fn new(store: PageStore, index: Arc<IndexDescriptor>) -> Self {
        Self { store, index }
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn index(&self) -> &Arc<IndexDescriptor> {
        &self.index
    }

    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    /// Load a page of this index.
    ///
    /// A page that does not exist is taken to be an empty leaf; it may have
    /// been allocated before a crash without ever being written. It is
    /// created on the spot.
    pub fn page(&self, page_id: PageId) -> StorageResult<BtreePage> {
        match self.store.get_page(page_id)? {
            None => {
                let leaf = BtreeLeaf::create(self.index.clone(), page_id, None);
                self.store.log_undo(page_id, UndoImage::Fresh)?;
                let page = BtreePage::Leaf(Arc::new(leaf));
                self.write(&page)?;
                Ok(page)
            }
            Some(Page::Btree(page)) => {
                if page.index().id() != self.index.id() {
                    return Err(StorageError::corrupted(
                        page_id,
                        format!("belongs to index {}, not {}", page.index().id(), self.index.id()),
                    ));
                }
                Ok(page)
            }
            Some(other) => Err(StorageError::corrupted(
                page_id,
                format!("expected a b-tree page, found {}", other),
            )),
        }
    }

    pub fn node(&self, page_id: PageId) -> StorageResult<Arc<BtreeNode>> {
        match self.page(page_id)? {
            BtreePage::Node(node) => Ok(node),
            BtreePage::Leaf(_) => Err(StorageError::corrupted(page_id, "expected a b-tree node")),
        }
    }

    pub fn write(&self, page: &BtreePage) -> StorageResult<()> {
        self.store.update(Page::Btree(page.clone()))
    }

    pub fn write_leaf(&self, leaf: &BtreeLeaf) -> StorageResult<()> {
        self.write(&BtreePage::Leaf(Arc::new(leaf.clone())))
    }

    pub fn write_node(&self, node: &BtreeNode) -> StorageResult<()> {
        self.write(&BtreePage::Node(Arc::new(node.clone())))
    }

    /// Repoint the child pointer of `parent` from `old` to `new`.
    pub fn move_child(&self, parent: PageId, old: PageId, new: PageId) -> StorageResult<()> {
        let mut node = self.node(parent)?;
        Arc::make_mut(&mut node).move_child(self, old, new)
    }
}
