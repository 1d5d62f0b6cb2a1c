//! The page store: page allocation, the page cache, the undo log and
//! checkpoint-based recovery, plus the registry of open indexes.
//!
//! Pages are cached decoded and shared as cheap handles. To change a page a
//! caller copies it, edits the copy and passes it to [`PageStore::update`];
//! the first change to a page after a checkpoint records its prior image in
//! the undo log.
//!
//! A checkpoint flushes the undo log, writes all dirty pages, and then
//! atomically replaces the state file with a new epoch. Opening a store whose
//! undo log belongs to the current epoch rolls the database file back to the
//! last checkpoint.

use crate::access::btree::descriptor::{IndexDescriptor, IndexId};
use crate::storage::cache::lru::LruReplacer;
use crate::storage::cache::PageCache;
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::meta::{IndexMeta, StoreState};
use crate::storage::page::{Page, PageId, MIN_PAGE_SIZE};
use crate::storage::undo::{UndoImage, UndoLog, UndoRecord};
use dashmap::DashMap;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

pub const MAX_PAGE_SIZE: usize = 32 * 1024;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Page size in bytes, a power of two.
    pub page_size: usize,
    /// Memory budget of the page cache in bytes.
    pub cache_size: usize,
    /// Whether to sync the database file before a checkpoint commits.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: 16 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl StoreConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn validate(&self) -> StorageResult<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(StorageError::InvalidConfig(format!(
                "page size {} must be a power of two between {} and {}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.cache_size < self.page_size {
            return Err(StorageError::InvalidConfig(format!(
                "cache size {} is smaller than one page",
                self.cache_size
            )));
        }
        Ok(())
    }
}

fn sibling_path(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

type IndexRegistry = DashMap<IndexId, Arc<IndexDescriptor>>;

#[derive(Clone)]
pub struct PageStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    state_path: PathBuf,
    config: StoreConfig,
    core: Mutex<StoreCore>,
    indexes: IndexRegistry,
    change_count: AtomicU64,
    recovery_running: AtomicBool,
}

struct StoreCore {
    disk: PageManager,
    cache: PageCache,
    undo: UndoLog,
    state: StoreState,
    /// Allocated pages that have not been written since.
    unwritten: HashSet<PageId>,
    closed: bool,
}

impl StoreCore {
    fn exists(&self, page_id: PageId) -> bool {
        page_id.0 < self.state.page_count
            && !self.state.is_free(page_id)
            && !self.unwritten.contains(&page_id)
    }

    fn load(&mut self, page_id: PageId, indexes: &IndexRegistry, page_size: usize) -> StorageResult<Option<Page>> {
        if !self.exists(page_id) {
            return Ok(None);
        }
        if let Some(page) = self.cache.get(page_id) {
            return Ok(Some(page));
        }
        let mut buf = vec![0; page_size];
        if !self.disk.read_page(page_id, &mut buf)? {
            return Ok(None);
        }
        let lookup = |id: IndexId| indexes.get(&id).map(|e| Arc::clone(e.value()));
        let page = Page::read(page_id, buf, &lookup)?;
        if let Some(page) = &page {
            self.cache.put(page.clone(), false, page.memory(page_size));
            self.evict(page_size)?;
        }
        Ok(page)
    }

    /// The image a page has right now, before any pending change.
    fn current_image(&mut self, page_id: PageId, page_size: usize) -> StorageResult<Option<Vec<u8>>> {
        if !self.exists(page_id) {
            return Ok(None);
        }
        if let Some(page) = self.cache.get(page_id) {
            return Ok(Some(page.write_image(page_size)?));
        }
        let mut buf = vec![0; page_size];
        if self.disk.read_page(page_id, &mut buf)? {
            Ok(Some(buf))
        } else {
            Ok(None)
        }
    }

    fn log_undo(&mut self, page_id: PageId, image: UndoImage, page_size: usize) -> StorageResult<()> {
        if self.undo.is_logged(page_id) {
            return Ok(());
        }
        let bytes = match image {
            UndoImage::Fresh => None,
            UndoImage::Prior => self.current_image(page_id, page_size)?,
        };
        self.undo.log_page(page_id, bytes)
    }

    fn log_state(&mut self) -> StorageResult<()> {
        self.undo.log_state(&self.state)
    }

    fn evict(&mut self, page_size: usize) -> StorageResult<()> {
        while self.cache.is_over_capacity() {
            let Some(entry) = self.cache.evict() else {
                break;
            };
            if entry.dirty {
                let page_id = entry.page.page_id();
                trace!("writing back evicted page {}", page_id);
                // the undo image must be durable before the page is overwritten
                self.undo.flush(true)?;
                self.disk.write_page(page_id, &entry.page.write_image(page_size)?)?;
            }
        }
        Ok(())
    }
}

/// Increments the store's change count when dropped, so it fires on every
/// exit path of a modifying operation.
pub struct ChangeScope<'a> {
    store: &'a PageStore,
}

impl Drop for ChangeScope<'_> {
    fn drop(&mut self) {
        self.store.increment_change_count();
    }
}

impl PageStore {
    /// Create a new, empty store at `path`, replacing any existing one.
    pub fn create(path: &Path, config: StoreConfig) -> StorageResult<Self> {
        config.validate()?;
        let disk = PageManager::create(path, config.page_size)?;
        let state = StoreState::new();
        let state_path = sibling_path(path, "state");
        state.save(&state_path)?;
        let undo = UndoLog::create(&sibling_path(path, "undo"), state.epoch)?;
        info!("created page store {} with {} byte pages", path.display(), config.page_size);
        Ok(Self::assemble(path, state_path, config, disk, undo, state, false))
    }

    /// Open an existing store, rolling back to the last checkpoint if the
    /// previous session did not close cleanly.
    pub fn open(path: &Path, config: StoreConfig) -> StorageResult<Self> {
        config.validate()?;
        let mut disk = PageManager::open(path, config.page_size)?;
        let state_path = sibling_path(path, "state");
        let undo_path = sibling_path(path, "undo");
        let mut state = StoreState::load(&state_path)?;

        let mut recovered = false;
        match UndoLog::read(&undo_path)? {
            Some((epoch, records)) if epoch == state.epoch && !records.is_empty() => {
                Self::recover(&mut disk, &mut state, records, config.page_size)?;
                state.epoch += 1;
                state.save(&state_path)?;
                recovered = true;
            }
            Some((epoch, records)) if epoch != state.epoch && !records.is_empty() => {
                debug!("discarding {} undo records of committed epoch {}", records.len(), epoch);
            }
            _ => {}
        }
        let undo = UndoLog::create(&undo_path, state.epoch)?;
        info!(
            "opened page store {}: {} pages, {} free, epoch {}",
            path.display(),
            state.page_count,
            state.free_pages.len(),
            state.epoch
        );
        Ok(Self::assemble(path, state_path, config, disk, undo, state, recovered))
    }

    fn assemble(
        path: &Path,
        state_path: PathBuf,
        config: StoreConfig,
        disk: PageManager,
        undo: UndoLog,
        state: StoreState,
        recovered: bool,
    ) -> Self {
        let cache = PageCache::new(Box::new(LruReplacer::new()), config.cache_size);
        PageStore {
            inner: Arc::new(StoreInner {
                path: path.to_path_buf(),
                state_path,
                config,
                core: Mutex::new(StoreCore {
                    disk,
                    cache,
                    undo,
                    state,
                    unwritten: HashSet::new(),
                    closed: false,
                }),
                indexes: DashMap::new(),
                change_count: AtomicU64::new(0),
                recovery_running: AtomicBool::new(recovered),
            }),
        }
    }

    fn recover(
        disk: &mut PageManager,
        state: &mut StoreState,
        records: Vec<UndoRecord>,
        page_size: usize,
    ) -> StorageResult<()> {
        warn!("store was not closed cleanly, rolling back {} undo records", records.len());
        let mut restored = None;
        let mut pages = 0;
        for record in records {
            match record {
                UndoRecord::Page { page_id, image } => {
                    match image {
                        Some(image) => disk.write_page(page_id, &image)?,
                        None if page_id.0 < disk.num_pages()? => {
                            disk.write_page(page_id, &vec![0; page_size])?
                        }
                        None => {}
                    }
                    pages += 1;
                }
                UndoRecord::State(snapshot) => {
                    restored.get_or_insert(snapshot);
                }
            }
        }
        if let Some(snapshot) = restored {
            let epoch = state.epoch;
            *state = snapshot;
            state.epoch = epoch;
        }
        disk.truncate(state.page_count)?;
        disk.sync()?;
        info!("restored {} pages, {} pages in use", pages, state.page_count);
        Ok(())
    }

    fn core(&self) -> StorageResult<MutexGuard<'_, StoreCore>> {
        let core = self.inner.core.lock();
        if core.closed {
            return Err(StorageError::ObjectClosed);
        }
        Ok(core)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn page_size(&self) -> usize {
        self.inner.config.page_size
    }

    /// Load a page, or `None` if it does not exist.
    pub fn get_page(&self, page_id: PageId) -> StorageResult<Option<Page>> {
        self.core()?.load(page_id, &self.inner.indexes, self.page_size())
    }

    /// Store a changed page. The page becomes dirty and is in use afterwards.
    pub fn update(&self, page: Page) -> StorageResult<()> {
        let page_size = self.page_size();
        let mut core = self.core()?;
        let page_id = page.page_id();
        core.log_undo(page_id, UndoImage::Prior, page_size)?;
        if page_id.0 >= core.state.page_count || core.state.is_free(page_id) {
            core.log_state()?;
            core.state.page_count = core.state.page_count.max(page_id.0 + 1);
            core.state.free_pages.remove(&page_id);
        }
        core.unwritten.remove(&page_id);
        let memory = page.memory(page_size);
        core.cache.put(page, true, memory);
        core.evict(page_size)
    }

    /// Record the checkpoint image of a page, if not done yet in this epoch.
    pub fn log_undo(&self, page_id: PageId, image: UndoImage) -> StorageResult<()> {
        let page_size = self.page_size();
        self.core()?.log_undo(page_id, image, page_size)
    }

    /// Reserve a page id, reusing freed pages first.
    pub fn allocate_page(&self) -> StorageResult<PageId> {
        let mut core = self.core()?;
        core.log_state()?;
        let page_id = match core.state.free_pages.pop_first() {
            Some(page_id) => page_id,
            None => {
                let page_id = PageId(core.state.page_count);
                core.state.page_count += 1;
                page_id
            }
        };
        core.unwritten.insert(page_id);
        trace!("allocated page {}", page_id);
        Ok(page_id)
    }

    pub fn free(&self, page_id: PageId) -> StorageResult<()> {
        let page_size = self.page_size();
        let mut core = self.core()?;
        core.log_undo(page_id, UndoImage::Prior, page_size)?;
        core.log_state()?;
        core.state.free_pages.insert(page_id);
        core.unwritten.remove(&page_id);
        core.cache.remove(page_id);
        trace!("freed page {}", page_id);
        Ok(())
    }

    /// Drop the cached copy of a page that is about to be replaced.
    pub fn remove_record(&self, page_id: PageId) -> StorageResult<()> {
        self.core()?.cache.remove(page_id);
        Ok(())
    }

    pub fn add_meta(&self, meta: IndexMeta) -> StorageResult<()> {
        let mut core = self.core()?;
        core.log_state()?;
        core.state.indexes.insert(meta.index_id, meta);
        Ok(())
    }

    pub fn remove_meta(&self, index_id: IndexId) -> StorageResult<Option<IndexMeta>> {
        let mut core = self.core()?;
        core.log_state()?;
        Ok(core.state.indexes.remove(&index_id))
    }

    pub fn index_meta(&self, index_id: IndexId) -> StorageResult<Option<IndexMeta>> {
        Ok(self.core()?.state.indexes.get(&index_id).cloned())
    }

    /// Root page of an index, as recorded in its metadata.
    pub fn root_page_id(&self, index_id: IndexId) -> StorageResult<Option<PageId>> {
        Ok(self.core()?.state.indexes.get(&index_id).map(|m| m.root_page_id))
    }

    pub fn index_metas(&self) -> StorageResult<Vec<IndexMeta>> {
        Ok(self.core()?.state.indexes.values().cloned().collect())
    }

    /// Make an index's pages decodable by this store.
    pub fn add_index(&self, index: Arc<IndexDescriptor>) {
        self.inner.indexes.insert(index.id(), index);
    }

    pub fn remove_index(&self, index_id: IndexId) {
        self.inner.indexes.remove(&index_id);
    }

    pub fn increment_change_count(&self) {
        self.inner.change_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn change_count(&self) -> u64 {
        self.inner.change_count.load(Ordering::SeqCst)
    }

    /// A guard that counts one change when it goes out of scope.
    pub fn change_scope(&self) -> ChangeScope<'_> {
        ChangeScope { store: self }
    }

    /// Whether the store was rolled back on open and indexes still need to
    /// be rebuilt.
    pub fn is_recovery_running(&self) -> bool {
        self.inner.recovery_running.load(Ordering::SeqCst)
    }

    pub fn finish_recovery(&self) -> StorageResult<()> {
        self.checkpoint()?;
        self.inner.recovery_running.store(false, Ordering::SeqCst);
        info!("recovery of {} finished", self.inner.path.display());
        Ok(())
    }

    pub fn page_count(&self) -> StorageResult<u32> {
        Ok(self.core()?.state.page_count)
    }

    pub fn free_page_count(&self) -> StorageResult<usize> {
        Ok(self.core()?.state.free_pages.len())
    }

    pub fn cache_memory(&self) -> StorageResult<usize> {
        Ok(self.core()?.cache.used_memory())
    }

    /// Write all changes to the database file and start a new epoch.
    pub fn checkpoint(&self) -> StorageResult<()> {
        let page_size = self.page_size();
        let mut core = self.core()?;
        let core = &mut *core;
        core.undo.flush(true)?;
        let dirty = core.cache.dirty_pages();
        for page in &dirty {
            core.disk.write_page(page.page_id(), &page.write_image(page_size)?)?;
            core.cache.mark_clean(page.page_id());
        }
        // allocated but never written pages may still hold stale images
        let file_pages = core.disk.num_pages()?;
        for page_id in core.unwritten.drain() {
            if page_id.0 < file_pages {
                core.disk.write_page(page_id, &vec![0; page_size])?;
            }
        }
        if self.inner.config.sync_writes {
            core.disk.sync()?;
        }
        core.state.epoch += 1;
        core.state.save(&self.inner.state_path)?;
        core.undo.reset(core.state.epoch)?;
        debug!("checkpoint wrote {} pages, now at epoch {}", dirty.len(), core.state.epoch);
        Ok(())
    }

    /// Checkpoint and close. Further use fails with `ObjectClosed`.
    pub fn close(&self) -> StorageResult<()> {
        self.checkpoint()?;
        let mut core = self.core()?;
        core.cache.clear();
        core.closed = true;
        info!("closed page store {}", self.inner.path.display());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.core.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::OpaquePage;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 128;

    fn config() -> StoreConfig {
        StoreConfig::default().with_page_size(PAGE_SIZE)
    }

    fn data_page(page_id: PageId, payload: &[u8]) -> Page {
        Page::from(OpaquePage::new(page_id, 1, payload, PAGE_SIZE))
    }

    fn payload(page: Option<Page>) -> Vec<u8> {
        match page {
            Some(Page::Opaque(page)) => page.image()[1..4].to_vec(),
            _ => panic!("expected a data page"),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(config().validate().is_ok());
        assert!(StoreConfig::default().with_page_size(64).validate().is_err());
        assert!(StoreConfig::default().with_page_size(1000).validate().is_err());
        assert!(StoreConfig::default().with_cache_size(10).validate().is_err());
    }

    #[test]
    fn test_allocate_update_get() -> StorageResult<()> {
        let dir = tempdir()?;
        let store = PageStore::create(&dir.path().join("db"), config())?;

        let p0 = store.allocate_page()?;
        let p1 = store.allocate_page()?;
        assert_eq!((p0, p1), (PageId(0), PageId(1)));
        // allocated but unwritten pages do not exist yet
        assert!(store.get_page(p0)?.is_none());

        store.update(data_page(p0, b"abc"))?;
        assert_eq!(payload(store.get_page(p0)?), b"abc");

        store.free(p0)?;
        assert!(store.get_page(p0)?.is_none());
        assert_eq!(store.allocate_page()?, p0);
        assert_eq!(store.page_count()?, 2);
        Ok(())
    }

    #[test]
    fn test_reopen_after_close() -> StorageResult<()> {
        let dir = tempdir()?;
        let path = dir.path().join("db");
        {
            let store = PageStore::create(&path, config())?;
            let id = store.allocate_page()?;
            store.update(data_page(id, b"xyz"))?;
            store.close()?;
            assert!(matches!(store.get_page(id), Err(StorageError::ObjectClosed)));
        }
        let store = PageStore::open(&path, config())?;
        assert!(!store.is_recovery_running());
        assert_eq!(payload(store.get_page(PageId(0))?), b"xyz");
        Ok(())
    }

    #[test]
    fn test_rollback_to_last_checkpoint() -> StorageResult<()> {
        let dir = tempdir()?;
        let path = dir.path().join("db");
        {
            let store = PageStore::create(&path, config())?;
            let id = store.allocate_page()?;
            store.update(data_page(id, b"old"))?;
            store.checkpoint()?;

            store.update(data_page(id, b"new"))?;
            let extra = store.allocate_page()?;
            store.update(data_page(extra, b"tmp"))?;
            // force the dirty pages out without committing
            store.core()?.evict_all_for_test(PAGE_SIZE)?;
            // dropped without close
        }
        let store = PageStore::open(&path, config())?;
        assert!(store.is_recovery_running());
        assert_eq!(payload(store.get_page(PageId(0))?), b"old");
        assert_eq!(store.page_count()?, 1);
        assert!(store.get_page(PageId(1))?.is_none());

        store.finish_recovery()?;
        assert!(!store.is_recovery_running());
        Ok(())
    }

    #[test]
    fn test_eviction_respects_budget() -> StorageResult<()> {
        let dir = tempdir()?;
        let store = PageStore::create(
            &dir.path().join("db"),
            config().with_cache_size(4 * PAGE_SIZE),
        )?;
        for i in 0..20u8 {
            let id = store.allocate_page()?;
            store.update(data_page(id, &[i, i, i]))?;
        }
        assert!(store.cache_memory()? <= 4 * PAGE_SIZE);
        for i in 0..20u8 {
            assert_eq!(payload(store.get_page(PageId(i as u32))?), vec![i, i, i]);
        }
        Ok(())
    }

    #[test]
    fn test_change_scope() {
        let dir = tempdir().unwrap();
        let store = PageStore::create(&dir.path().join("db"), config()).unwrap();
        {
            let _scope = store.change_scope();
            assert_eq!(store.change_count(), 0);
        }
        assert_eq!(store.change_count(), 1);
    }

    #[test]
    fn test_meta() -> StorageResult<()> {
        use crate::access::table::TableId;
        let dir = tempdir()?;
        let store = PageStore::create(&dir.path().join("db"), config())?;
        let meta = IndexMeta {
            index_id: IndexId(4),
            table_id: TableId(1),
            name: "idx".into(),
            root_page_id: PageId(2),
            columns: vec![],
            unique: false,
        };
        store.add_meta(meta.clone())?;
        assert_eq!(store.index_meta(IndexId(4))?, Some(meta.clone()));
        assert_eq!(store.root_page_id(IndexId(4))?, Some(PageId(2)));
        assert_eq!(store.remove_meta(IndexId(4))?, Some(meta));
        assert!(store.index_meta(IndexId(4))?.is_none());
        Ok(())
    }

    impl StoreCore {
        fn evict_all_for_test(&mut self, page_size: usize) -> StorageResult<()> {
            while let Some(entry) = self.cache.evict() {
                if entry.dirty {
                    self.undo.flush(true)?;
                    self.disk
                        .write_page(entry.page.page_id(), &entry.page.write_image(page_size)?)?;
                }
            }
            Ok(())
        }
    }
}
