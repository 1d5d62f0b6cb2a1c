//! Store state persisted next to the database file.
//!
//! The state file holds the page count, the free list and the metadata of
//! every index. It is replaced atomically at each checkpoint, and its epoch
//! tells which undo log generation is still pending.

use crate::access::btree::descriptor::{IndexColumn, IndexDefinition, IndexId};
use crate::access::table::TableId;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

const STATE_MAGIC: u32 = 0x5042_5354;

/// Metadata the store keeps for each index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub index_id: IndexId,
    pub table_id: TableId,
    pub name: String,
    pub root_page_id: PageId,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
}

impl From<&IndexMeta> for IndexDefinition {
    fn from(meta: &IndexMeta) -> Self {
        IndexDefinition {
            id: meta.index_id,
            name: meta.name.clone(),
            columns: meta.columns.clone(),
            unique: meta.unique,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    magic: u32,
    pub epoch: u64,
    pub page_count: u32,
    pub free_pages: BTreeSet<PageId>,
    pub indexes: BTreeMap<IndexId, IndexMeta>,
}

impl StoreState {
    pub fn new() -> Self {
        Self {
            magic: STATE_MAGIC,
            epoch: 1,
            page_count: 0,
            free_pages: BTreeSet::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> StorageResult<Self> {
        let bytes = fs::read(path)?;
        let state: StoreState = bincode::deserialize(&bytes)?;
        if state.magic != STATE_MAGIC {
            return Err(StorageError::FileCorrupted(format!(
                "{} is not a store state file",
                path.display()
            )));
        }
        Ok(state)
    }

    /// Write the state to a temporary file and rename it into place.
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        let tmp = path.with_extension("state.tmp");
        let bytes = bincode::serialize(self)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn is_free(&self, page_id: PageId) -> bool {
        self.free_pages.contains(&page_id)
    }
}

impl Default for StoreState {
    fn default() -> Self {
        Self::new()
    }
}
