//! Memory-bounded page cache.
//!
//! The cache only tracks pages and their dirty state. Writing an evicted
//! dirty page back is the store's job, since it must flush the undo log first.

pub mod lru;
pub mod replacer;

use crate::storage::page::{Page, PageId};
use replacer::Replacer;
use std::collections::HashMap;

pub struct CacheEntry {
    pub page: Page,
    pub dirty: bool,
    memory: usize,
}

pub struct PageCache {
    entries: HashMap<PageId, CacheEntry>,
    replacer: Box<dyn Replacer>,
    used_memory: usize,
    max_memory: usize,
}

impl PageCache {
    pub fn new(replacer: Box<dyn Replacer>, max_memory: usize) -> Self {
        Self {
            entries: HashMap::new(),
            replacer,
            used_memory: 0,
            max_memory,
        }
    }

    pub fn get(&mut self, page_id: PageId) -> Option<Page> {
        let page = self.entries.get(&page_id)?.page.clone();
        self.replacer.touch(page_id);
        Some(page)
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.contains_key(&page_id)
    }

    /// Insert or replace a page. A page stays dirty until `mark_clean`.
    pub fn put(&mut self, page: Page, dirty: bool, memory: usize) {
        let page_id = page.page_id();
        let dirty = match self.entries.remove(&page_id) {
            Some(old) => {
                self.used_memory -= old.memory;
                old.dirty || dirty
            }
            None => dirty,
        };
        self.used_memory += memory;
        self.entries.insert(
            page_id,
            CacheEntry {
                page,
                dirty,
                memory,
            },
        );
        self.replacer.touch(page_id);
    }

    pub fn remove(&mut self, page_id: PageId) -> Option<CacheEntry> {
        let entry = self.entries.remove(&page_id)?;
        self.used_memory -= entry.memory;
        self.replacer.remove(page_id);
        Some(entry)
    }

    pub fn is_over_capacity(&self) -> bool {
        self.used_memory > self.max_memory && self.entries.len() > 1
    }

    /// Take the least recently used page out of the cache.
    pub fn evict(&mut self) -> Option<CacheEntry> {
        loop {
            let page_id = self.replacer.evict()?;
            if let Some(entry) = self.entries.remove(&page_id) {
                self.used_memory -= entry.memory;
                return Some(entry);
            }
        }
    }

    pub fn dirty_pages(&self) -> Vec<Page> {
        let mut pages: Vec<Page> = self
            .entries
            .values()
            .filter(|e| e.dirty)
            .map(|e| e.page.clone())
            .collect();
        pages.sort_by_key(Page::page_id);
        pages
    }

    pub fn mark_clean(&mut self, page_id: PageId) {
        if let Some(entry) = self.entries.get_mut(&page_id) {
            entry.dirty = false;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        while self.replacer.evict().is_some() {}
        self.used_memory = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_memory(&self) -> usize {
        self.used_memory
    }
}
