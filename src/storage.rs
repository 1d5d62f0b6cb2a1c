//! Storage layer for pagebtree.
//!
//! Pages are fixed-size blocks in a single database file. Key components:
//!
//! - **PageStore**: allocation, the page cache, the undo log and checkpoints
//! - **PageManager**: reads and writes pages of the database file
//! - **PageCache**: decoded pages bounded by estimated memory, LRU eviction
//! - **UndoLog**: prior page images for rolling back to the last checkpoint
//! - **BtreeLeaf / BtreeNode**: the byte layouts of index pages

pub mod cache;
pub mod data;
pub mod disk;
pub mod error;
pub mod meta;
pub mod page;
pub mod store;
pub mod undo;

pub use disk::PageManager;
pub use error::{StorageError, StorageResult};
pub use page::{BtreePage, Page, PageId};
pub use store::{PageStore, StoreConfig};
