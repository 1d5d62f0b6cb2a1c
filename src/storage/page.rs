pub mod btree_leaf_page;
pub mod btree_node_page;
pub mod btree_page;

use crate::access::btree::descriptor::{IndexDescriptor, IndexId};
use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use btree_leaf_page::BtreeLeaf;
pub use btree_node_page::BtreeNode;
pub use btree_page::{BtreePage, RemoveOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-disk parent pointer of a root page.
pub const ROOT: u32 = u32::MAX;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 128;

/// First byte of every page.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Empty = 0,
    Data = 1,
    BtreeLeaf = 4,
    BtreeNode = 5,
}

impl PageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageType::Empty),
            1 => Some(PageType::Data),
            4 => Some(PageType::BtreeLeaf),
            5 => Some(PageType::BtreeNode),
            _ => None,
        }
    }
}

/// A page the index layer does not interpret, such as table data.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaquePage {
    page_id: PageId,
    image: Vec<u8>,
}

impl OpaquePage {
    /// A page of `page_type` whose image starts with `payload` after the type byte.
    pub fn new(page_id: PageId, page_type: u8, payload: &[u8], page_size: usize) -> Self {
        let mut image = vec![0; page_size.max(payload.len() + 1)];
        image[0] = page_type;
        image[1..=payload.len()].copy_from_slice(payload);
        Self { page_id, image }
    }

    pub fn page_type(&self) -> u8 {
        self.image[0]
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }
}

/// A decoded page as held by the page cache.
///
/// Cloning is cheap; a page is changed by cloning it, mutating the copy and
/// handing it back to the store.
#[derive(Clone)]
pub enum Page {
    Btree(BtreePage),
    Opaque(Arc<OpaquePage>),
}

impl Page {
    pub fn page_id(&self) -> PageId {
        match self {
            Page::Btree(page) => page.page_id(),
            Page::Opaque(page) => page.page_id,
        }
    }

    /// Encode into a full page image.
    pub fn write_image(&self, page_size: usize) -> StorageResult<Vec<u8>> {
        match self {
            Page::Btree(page) => page.write_image(page_size),
            Page::Opaque(page) => {
                let mut image = page.image.clone();
                image.resize(page_size, 0);
                Ok(image)
            }
        }
    }

    /// Estimated memory the page occupies in the cache.
    pub fn memory(&self, page_size: usize) -> usize {
        match self {
            Page::Btree(page) => page.index().memory_per_page(),
            Page::Opaque(_) => page_size,
        }
    }

    /// Decode a page image. Returns `None` for an empty page.
    ///
    /// B-tree pages are decoded against the index named in their header,
    /// which `lookup` must know about.
    pub fn read(
        page_id: PageId,
        image: Vec<u8>,
        lookup: &dyn Fn(IndexId) -> Option<Arc<IndexDescriptor>>,
    ) -> StorageResult<Option<Page>> {
        let Some(&type_byte) = image.first() else {
            return Ok(None);
        };
        match PageType::from_u8(type_byte) {
            Some(PageType::Empty) => Ok(None),
            Some(PageType::BtreeLeaf) | Some(PageType::BtreeNode) => {
                let index_id = btree_page::peek_index_id(page_id, &image)?;
                let index = lookup(index_id).ok_or_else(|| {
                    StorageError::corrupted(page_id, format!("no index {} is open", index_id))
                })?;
                Ok(Some(Page::Btree(BtreePage::read(index, page_id, image)?)))
            }
            _ => Ok(Some(Page::Opaque(Arc::new(OpaquePage {
                page_id,
                image,
            })))),
        }
    }
}

impl From<BtreePage> for Page {
    fn from(page: BtreePage) -> Self {
        Page::Btree(page)
    }
}

impl From<OpaquePage> for Page {
    fn from(page: OpaquePage) -> Self {
        Page::Opaque(Arc::new(page))
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Page::Btree(page) => write!(f, "{}", page),
            Page::Opaque(page) => write!(f, "page[{}] type {}", page.page_id, page.page_type()),
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Page::Btree(page) => fmt::Debug::fmt(page, f),
            Page::Opaque(page) => fmt::Debug::fmt(page, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_page_image() -> StorageResult<()> {
        let page = Page::from(OpaquePage::new(PageId(3), 1, b"abc", 128));
        let image = page.write_image(128)?;
        assert_eq!(image.len(), 128);
        assert_eq!(&image[..4], &[1, b'a', b'b', b'c']);

        let decoded = Page::read(PageId(3), image, &|_| None)?.unwrap();
        assert!(matches!(decoded, Page::Opaque(ref p) if p.page_type() == 1));
        assert_eq!(decoded.page_id(), PageId(3));
        Ok(())
    }

    #[test]
    fn test_empty_page_reads_as_none() -> StorageResult<()> {
        assert!(Page::read(PageId(1), vec![0; 128], &|_| None)?.is_none());
        assert!(Page::read(PageId(1), vec![], &|_| None)?.is_none());
        Ok(())
    }

    #[test]
    fn test_btree_page_of_unknown_index_is_corrupt() {
        let mut image = vec![0; 128];
        image[0] = PageType::BtreeLeaf as u8;
        let err = Page::read(PageId(2), image, &|_| None).unwrap_err();
        assert!(err.is_corruption());
    }
}
