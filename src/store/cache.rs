//! # Clean-Page Cache
//!
//! Two independently capped LRU tiers sit in front of the file: one for tree
//! and metadata pages, one for data (overflow) pages, so a bulk value scan
//! cannot evict the hot tree interior. Each tier is a plain LRU keyed by
//! page address.
//!
//! Only clean pages live here. Dirty pages are owned by the store's dirty
//! map until commit, which makes the "never evict a page being written"
//! rule structural: by the time a page enters a cache tier its bytes are
//! already captured in the commit's write set.
//!
//! Entries are `Arc<PageContent>` — a cache hit is a pointer clone, and an
//! evicted page stays alive for any reader still holding it.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::page::PageContent;

#[derive(Debug)]
pub struct LruCache {
    map: HashMap<u32, (Arc<PageContent>, u64)>,
    order: BTreeMap<u64, u32>,
    tick: u64,
    capacity: usize,
}

impl LruCache {
    /// Capacity is given in bytes and converted to a page budget.
    pub fn new(capacity_bytes: usize, page_size: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
            capacity: (capacity_bytes / page_size).max(8),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn get(&mut self, addr: u32) -> Option<Arc<PageContent>> {
        self.tick += 1;
        let tick = self.tick;
        let (page, slot) = self.map.get_mut(&addr)?;
        self.order.remove(slot);
        self.order.insert(tick, addr);
        *slot = tick;
        Some(Arc::clone(page))
    }

    pub fn insert(&mut self, addr: u32, page: Arc<PageContent>) {
        self.tick += 1;
        if let Some((_, old_slot)) = self.map.insert(addr, (page, self.tick)) {
            self.order.remove(&old_slot);
        }
        self.order.insert(self.tick, addr);
        while self.map.len() > self.capacity {
            let Some((&oldest, &victim)) = self.order.iter().next() else {
                break;
            };
            self.order.remove(&oldest);
            self.map.remove(&victim);
        }
    }

    pub fn remove(&mut self, addr: u32) {
        if let Some((_, slot)) = self.map.remove(&addr) {
            self.order.remove(&slot);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}
