//! # Page Storage
//!
//! `PageStore` is the copy-on-write engine. It exclusively owns the page
//! address space: the next-address counter, the reusable free-address set,
//! the dirty-page map, two clean-page cache tiers, and the pending
//! refcount-delta map. Tree cursors and the set layer only ever operate on
//! pages borrowed from here and route every structural change back through
//! the three mutation primitives:
//!
//! - [`PageStore::alloc_dirty`] — create a fresh dirty page; records a `+1`
//!   delta for every address the new page references.
//! - [`PageStore::make_dirty`] — the copy-on-write contract: identity for an
//!   already-dirty page, otherwise a clone at a fresh address (again `+1`
//!   for everything the clone references). The caller rewrites the parent
//!   pointer; that rewrite's `update_dirty` diff produces the balancing
//!   `-1`/`+1` for the old and new addresses.
//! - [`PageStore::update_dirty`] — replace a dirty page's content; the
//!   multiset difference of referenced addresses becomes refcount deltas.
//!
//! Deriving every refcount consequence from content diffs inside the store
//! is what replaces the original engine's forwarding-pointer discipline: a
//! stale page handle cannot exist, because nobody holds page handles —
//! only addresses, and every access revalidates through the store.
//!
//! ## Commit Protocol
//!
//! Two phases. `commit_mark` (under the exclusive commit lock) reconciles
//! all pending refcount deltas against the persistent ref-count and
//! free-space trees (see [`gc`]), stamps the dirty RootPage (revision,
//! previous root, tree tops, allocation high-water mark), serializes the
//! dirty set, and flips the in-memory clean state. `commit_write` then
//! writes the page images grouped into contiguous-address runs, fsyncs,
//! overwrites the SuperPage in place, and fsyncs again — so a crash leaves
//! either the old generation or the new one fully intact, never a torn mix.
//! The SuperPage is always the last page physically written.
//!
//! Addresses freed by a commit become allocatable only after that commit's
//! write completes: until the SuperPage flip is durable, the previous
//! generation still references them, and overwriting one early would tear
//! the old generation on crash. Addresses that were already free in the
//! last durable generation are safe to reuse immediately.
//!
//! ## Recovery
//!
//! Open reads the SuperPage, loads the RootPage at its primary address, and
//! on failure logs a recovery event and makes one fallback attempt against
//! the previous RootPage address. The free-space tree is then replayed into
//! the in-memory free set.

pub mod cache;
pub mod file;
mod gc;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use log::{debug, warn};

use crate::codec::varint::{decode_uvarint, encode_uvarint};
use crate::codec::Reader;
use crate::config::Config;
use crate::error::Result;
use crate::page::{DataPage, NodeKind, NodePage, PageContent, PageType, RootMeta, SuperHeader};
use crate::tree;
use cache::LruCache;
use file::PagedFile;

/// The pages of one committed generation, ready to write.
#[derive(Debug)]
pub struct CommitSet {
    /// `(address, page image)` sorted by address.
    pub pages: Vec<(u32, Vec<u8>)>,
    pub new_root: u32,
    pub prev_root: u32,
    pub revision: u32,
}

#[derive(Debug)]
pub struct PageStore {
    file: PagedFile,
    config: Config,

    // Address space.
    next_addr: u32,
    committed_next_addr: u32,
    free_set: BTreeSet<u32>,
    /// Taken from the free set this generation; their free-tree entries are
    /// dropped during reconciliation.
    used_free: HashSet<u32>,
    free_tree_removals: Vec<u32>,
    /// Freed by the in-flight commit; allocatable once its write completes.
    pending_free: Vec<u32>,

    // Generations.
    current_root: u32,
    committed_root: u32,
    committed_revision: u32,
    ref_top: u32,
    free_top: u32,
    committed_ref_top: u32,
    committed_free_top: u32,

    // Dirty state.
    dirty: HashMap<u32, Arc<PageContent>>,
    new_pages: HashSet<u32>,
    deltas: HashMap<u32, i64>,

    // Clean tiers.
    meta_cache: LruCache,
    data_cache: LruCache,
}

impl PageStore {
    pub fn open(path: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        let file = PagedFile::open_or_create(path, config.page_size)?;
        let fresh = file.is_empty()?;
        let mut store = Self {
            meta_cache: LruCache::new(config.meta_cache_bytes, config.page_size),
            data_cache: LruCache::new(config.data_cache_bytes, config.page_size),
            file,
            config,
            next_addr: 1,
            committed_next_addr: 1,
            free_set: BTreeSet::new(),
            used_free: HashSet::new(),
            free_tree_removals: Vec::new(),
            pending_free: Vec::new(),
            current_root: 0,
            committed_root: 0,
            committed_revision: 0,
            ref_top: 0,
            free_top: 0,
            committed_ref_top: 0,
            committed_free_top: 0,
            dirty: HashMap::new(),
            new_pages: HashSet::new(),
            deltas: HashMap::new(),
        };
        if fresh {
            store.init_fresh()?;
        } else {
            store.recover()?;
        }
        Ok(store)
    }

    fn init_fresh(&mut self) -> Result<()> {
        let root = PageContent::Root {
            meta: RootMeta::initial(),
            node: NodePage::empty(NodeKind::Name),
        };
        self.current_root = self.alloc_dirty(root)?;
        self.commit()?;
        Ok(())
    }

    fn recover(&mut self) -> Result<()> {
        let super_bytes = self.file.read_page(0)?;
        let header = SuperHeader::read_from(&super_bytes)?;

        let primary = header.current_root();
        let (root_addr, meta) = match Self::load_root(&self.file, primary) {
            Ok(meta) => (primary, meta),
            Err(err) => {
                let prev = header.prev_root();
                warn!(
                    "root page {primary} unreadable ({err}); falling back to previous root {prev}"
                );
                ensure_format!(prev != 0, "no previous root to fall back to");
                (prev, Self::load_root(&self.file, prev)?)
            }
        };

        ensure_format!(
            meta.alloc_size > root_addr,
            "root page {} claims allocation size {}",
            root_addr,
            meta.alloc_size
        );
        self.current_root = root_addr;
        self.committed_root = root_addr;
        self.committed_revision = meta.revision;
        self.next_addr = meta.alloc_size;
        self.committed_next_addr = meta.alloc_size;
        self.ref_top = meta.ref_tree;
        self.free_top = meta.free_tree;
        self.committed_ref_top = meta.ref_tree;
        self.committed_free_top = meta.free_tree;

        if self.free_top != 0 {
            let free_top = self.free_top;
            for entry in tree::scan_all(self, free_top)? {
                if let crate::page::Entry::Free { addr } = entry {
                    self.free_set.insert(addr);
                }
            }
        }
        Ok(())
    }

    fn load_root(file: &PagedFile, addr: u32) -> Result<RootMeta> {
        ensure_format!(addr != 0, "root address is zero");
        let bytes = file.read_page(addr)?;
        match PageContent::deserialize(&bytes)? {
            PageContent::Root { meta, .. } => Ok(meta),
            other => corrupted!("page {addr} is not a root page ({:?})", other.page_type()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn max_key_bytes(&self) -> usize {
        self.config.max_key_bytes()
    }

    pub fn root(&self) -> u32 {
        self.current_root
    }

    pub fn committed_root(&self) -> u32 {
        self.committed_root
    }

    pub fn revision(&self) -> u32 {
        self.committed_revision
    }

    /// Address high-water mark; addresses at or above this are unallocated.
    pub fn alloc_high_water(&self) -> u32 {
        self.next_addr
    }

    pub fn free_addr_count(&self) -> usize {
        self.free_set.len()
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.dirty.is_empty() || !self.deltas.is_empty()
    }

    // ---- page access -----------------------------------------------------

    pub fn read(&mut self, addr: u32) -> Result<Arc<PageContent>> {
        ensure_bug!(addr != 0, "page 0 is the super page, not addressable content");
        if let Some(page) = self.dirty.get(&addr) {
            return Ok(Arc::clone(page));
        }
        if let Some(page) = self.meta_cache.get(addr) {
            return Ok(page);
        }
        if let Some(page) = self.data_cache.get(addr) {
            return Ok(page);
        }
        let bytes = self.file.read_page(addr)?;
        let page = Arc::new(PageContent::deserialize(&bytes)?);
        self.cache_insert(addr, Arc::clone(&page));
        Ok(page)
    }

    pub fn is_dirty(&self, addr: u32) -> bool {
        self.dirty.contains_key(&addr)
    }

    fn cache_insert(&mut self, addr: u32, page: Arc<PageContent>) {
        match page.page_type() {
            PageType::Data => self.data_cache.insert(addr, page),
            _ => self.meta_cache.insert(addr, page),
        }
    }

    fn evict(&mut self, addr: u32) {
        self.meta_cache.remove(addr);
        self.data_cache.remove(addr);
    }

    // ---- allocation and the copy-on-write contract -----------------------

    fn alloc_addr(&mut self) -> Result<u32> {
        if let Some(addr) = self.free_set.pop_first() {
            self.used_free.insert(addr);
            self.free_tree_removals.push(addr);
            return Ok(addr);
        }
        ensure_bug!(self.next_addr < u32::MAX, "page address space exhausted");
        let addr = self.next_addr;
        self.next_addr += 1;
        Ok(addr)
    }

    fn add_refs(&mut self, page: &PageContent, sign: i64) {
        let mut refs = crate::page::RefVec::new();
        page.collect_refs(&mut refs);
        for addr in refs {
            *self.deltas.entry(addr).or_insert(0) += sign;
        }
    }

    pub(crate) fn change_ref(&mut self, addr: u32, delta: i64) {
        *self.deltas.entry(addr).or_insert(0) += delta;
    }

    pub fn alloc_dirty(&mut self, content: PageContent) -> Result<u32> {
        let addr = self.alloc_addr()?;
        self.add_refs(&content, 1);
        self.dirty.insert(addr, Arc::new(content));
        self.new_pages.insert(addr);
        Ok(addr)
    }

    pub fn make_dirty(&mut self, addr: u32) -> Result<u32> {
        if self.dirty.contains_key(&addr) {
            return Ok(addr);
        }
        let page = self.read(addr)?;
        let new_addr = self.alloc_addr()?;
        self.add_refs(&page, 1);
        self.dirty.insert(new_addr, page);
        self.new_pages.insert(new_addr);
        Ok(new_addr)
    }

    pub fn update_dirty(&mut self, addr: u32, content: PageContent) -> Result<()> {
        let Some(old) = self.dirty.get(&addr).map(Arc::clone) else {
            bug!("update of page {addr}, which is not dirty");
        };
        let mut diff: HashMap<u32, i64> = HashMap::new();
        let mut refs = crate::page::RefVec::new();
        content.collect_refs(&mut refs);
        for a in refs.drain(..) {
            *diff.entry(a).or_insert(0) += 1;
        }
        old.collect_refs(&mut refs);
        for a in refs {
            *diff.entry(a).or_insert(0) -= 1;
        }
        for (a, d) in diff {
            if d != 0 {
                self.change_ref(a, d);
            }
        }
        self.dirty.insert(addr, Arc::new(content));
        Ok(())
    }

    /// Ensures the root page is dirty for this generation. Cloning the root
    /// is the one copy-on-write step with no parent pointer to rewrite, so
    /// the superseded clean root's `-1` is recorded here.
    pub fn dirty_root(&mut self) -> Result<u32> {
        if self.dirty.contains_key(&self.current_root) {
            return Ok(self.current_root);
        }
        let old = self.current_root;
        let new = self.make_dirty(old)?;
        self.change_ref(old, -1);
        self.current_root = new;
        Ok(new)
    }

    pub fn root_meta(&mut self) -> Result<RootMeta> {
        let root = self.read(self.current_root)?;
        match root.as_ref() {
            PageContent::Root { meta, .. } => Ok(meta.clone()),
            other => bug!("root address holds a {:?} page", other.page_type()),
        }
    }

    pub(crate) fn update_root_meta(&mut self, f: impl FnOnce(&mut RootMeta)) -> Result<()> {
        let addr = self.dirty_root()?;
        let root = self.read(addr)?;
        let PageContent::Root { meta, node } = root.as_ref() else {
            bug!("root address holds a non-root page");
        };
        let mut meta = meta.clone();
        f(&mut meta);
        self.update_dirty(
            addr,
            PageContent::Root {
                meta,
                node: node.clone(),
            },
        )
    }

    // ---- data chains -----------------------------------------------------

    /// Stores a value's bytes out of line, chained across data pages, and
    /// returns the chain head address.
    pub fn write_chain(&mut self, value: &[u8]) -> Result<u32> {
        let capacity = self.config.page_size - 8;
        let mut stream = Vec::with_capacity(value.len() + 5);
        encode_uvarint(value.len() as u32, &mut stream);
        stream.extend_from_slice(value);

        let mut next = 0u32;
        let chunks: Vec<&[u8]> = stream.chunks(capacity).collect();
        for chunk in chunks.iter().rev() {
            next = self.alloc_dirty(PageContent::Data(DataPage {
                next,
                bytes: chunk.to_vec(),
            }))?;
        }
        ensure_bug!(next != 0, "empty data chain");
        Ok(next)
    }

    pub fn read_chain(&mut self, head: u32) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut total: Option<usize> = None;
        let mut next = head;
        loop {
            let page = self.read(next)?;
            let PageContent::Data(data) = page.as_ref() else {
                corrupted!("data chain hit a {:?} page at {next}", page.page_type());
            };
            let following = data.next;
            match total {
                None => {
                    let mut r = Reader::new(&data.bytes);
                    let len = decode_uvarint(&mut r)? as usize;
                    total = Some(len);
                    let take = r.remaining().min(len);
                    out.extend_from_slice(r.take(take)?);
                }
                Some(len) => {
                    let take = data.bytes.len().min(len - out.len());
                    out.extend_from_slice(&data.bytes[..take]);
                }
            }
            let len = total.unwrap_or(0);
            if out.len() >= len {
                return Ok(out);
            }
            ensure_format!(
                following != 0,
                "data chain ends early: {} of {len} bytes",
                out.len()
            );
            next = following;
        }
    }

    // ---- commit / rollback -----------------------------------------------

    /// Phase one: reconcile refcounts, stamp the new root, flip the
    /// in-memory clean state, and return the immutable page images to write.
    /// Returns `None` for an empty generation.
    pub fn commit_mark(&mut self) -> Result<Option<CommitSet>> {
        if self.dirty.is_empty() && self.deltas.is_empty() {
            return Ok(None);
        }
        let old_root = self.committed_root;
        let root_addr = self.dirty_root()?;

        let mut ctx = gc::GcCtx::default();
        gc::reconcile(self, &mut ctx)?;

        // Settle the bookkeeping tree tops into the root. Linking a new top
        // produces fresh deltas, whose reconciliation can move the tops
        // again; loop until both are stable and no deltas remain.
        let mut rounds = 0;
        loop {
            rounds += 1;
            ensure_bug!(rounds <= 64, "commit stamp loop did not settle");
            let (ref_top, free_top) = (self.ref_top, self.free_top);
            let meta = self.root_meta()?;
            if meta.ref_tree == ref_top && meta.free_tree == free_top && self.deltas.is_empty() {
                break;
            }
            if meta.ref_tree != ref_top || meta.free_tree != free_top {
                self.update_root_meta(|m| {
                    m.ref_tree = ref_top;
                    m.free_tree = free_top;
                })?;
            }
            gc::reconcile(self, &mut ctx)?;
        }

        let revision = self.committed_revision + 1;
        let next_addr = self.next_addr;
        self.update_root_meta(|m| {
            m.revision = revision;
            m.prev_root = old_root;
            m.alloc_size = next_addr;
        })?;
        ensure_bug!(
            self.deltas.is_empty() && self.free_tree_removals.is_empty(),
            "refcount deltas remain after reconciliation"
        );

        let mut pages = Vec::with_capacity(self.dirty.len());
        for (addr, page) in std::mem::take(&mut self.dirty) {
            pages.push((addr, page.serialize(self.config.page_size)?));
            self.cache_insert(addr, page);
        }
        pages.sort_by_key(|(addr, _)| *addr);

        self.committed_root = root_addr;
        self.committed_revision = revision;
        self.committed_next_addr = self.next_addr;
        self.committed_ref_top = self.ref_top;
        self.committed_free_top = self.free_top;
        self.new_pages.clear();
        self.used_free.clear();
        self.free_tree_removals.clear();

        Ok(Some(CommitSet {
            pages,
            new_root: root_addr,
            prev_root: old_root,
            revision,
        }))
    }

    /// Phase two: write the generation. Pages are grouped into
    /// contiguous-address runs capped at the configured batch size; the
    /// SuperPage is the last page written, fenced by fsync on both sides.
    pub fn commit_write(&mut self, set: CommitSet) -> Result<()> {
        let batch = self.config.write_batch_pages;
        let mut i = 0;
        let mut runs = 0usize;
        while i < set.pages.len() {
            let start = set.pages[i].0;
            let mut run = Vec::new();
            let mut j = i;
            while j < set.pages.len()
                && j - i < batch
                && set.pages[j].0 == start + (j - i) as u32
            {
                run.extend_from_slice(&set.pages[j].1);
                j += 1;
            }
            self.file.write_at(start, &run)?;
            runs += 1;
            i = j;
        }
        self.file.sync()?;

        let mut super_image = vec![0u8; self.config.page_size];
        SuperHeader::new(set.new_root, set.prev_root).write_to(&mut super_image);
        self.file.write_at(0, &super_image)?;
        self.file.sync()?;

        debug!(
            "committed revision {}: {} pages in {} runs, root {}",
            set.revision,
            set.pages.len(),
            runs,
            set.new_root
        );

        for addr in std::mem::take(&mut self.pending_free) {
            self.free_set.insert(addr);
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<u32> {
        match self.commit_mark()? {
            Some(set) => {
                let revision = set.revision;
                self.commit_write(set)?;
                Ok(revision)
            }
            None => Ok(self.committed_revision),
        }
    }

    /// Discards every dirty page created since the last commit, restores the
    /// address counter, and returns optimistically consumed free addresses.
    pub fn rollback(&mut self) {
        let discarded = self.dirty.len();
        self.dirty.clear();
        self.new_pages.clear();
        self.deltas.clear();
        self.pending_free.clear();
        self.free_tree_removals.clear();
        for addr in self.used_free.drain() {
            self.free_set.insert(addr);
        }
        self.next_addr = self.committed_next_addr;
        self.current_root = self.committed_root;
        self.ref_top = self.committed_ref_top;
        self.free_top = self.committed_free_top;
        debug!("rolled back {discarded} dirty pages to revision {}", self.committed_revision);
    }
}
