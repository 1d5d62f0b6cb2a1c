use super::replacer::Replacer;
use crate::storage::page::PageId;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Access tick to page, least recently used first
    order: BTreeMap<u64, PageId>,
    /// Last access tick of each tracked page
    ticks: HashMap<PageId, u64>,
    clock: u64,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<PageId> {
        let (_, page_id) = self.order.pop_first()?;
        self.ticks.remove(&page_id);
        Some(page_id)
    }

    fn touch(&mut self, page_id: PageId) {
        self.clock += 1;
        if let Some(old) = self.ticks.insert(page_id, self.clock) {
            self.order.remove(&old);
        }
        self.order.insert(self.clock, page_id);
    }

    fn remove(&mut self, page_id: PageId) {
        if let Some(tick) = self.ticks.remove(&page_id) {
            self.order.remove(&tick);
        }
    }

    fn size(&self) -> usize {
        self.ticks.len()
    }
}
