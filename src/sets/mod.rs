//! # Set Layer
//!
//! Maps the generic tree machinery onto named collections. The root tree
//! (whose top node lives inside the RootPage) maps prefixed names to top
//! pages:
//!
//! ```text
//! "k!" + name   key-value set top (KvTop page)
//! "d!" + name   document set top (DocTop page)
//! "s!" + name   named snapshot -> a committed RootPage address
//! ```
//!
//! The prefixes keep the three namespaces apart in one ordered tree. The
//! snapshot entry's payload counts as a reference, which is what pins a
//! snapshotted generation against the refcount GC.
//!
//! Every set mutation ends by rewriting the set's name entry when
//! copy-on-write moved its top page; the entry diff releases the old top
//! and claims the new one.

pub mod doc;
pub mod index;
pub mod kv;

use crate::error::Result;
use crate::page::{DocMeta, Entry, EntryKey, KvMeta, NodeKind, NodePage, PageContent};
use crate::store::PageStore;
use crate::tree::{self, InsertPolicy};

pub(crate) const KV_PREFIX: &str = "k!";
pub(crate) const DOC_PREFIX: &str = "d!";
pub(crate) const SNAPSHOT_PREFIX: &str = "s!";

pub(crate) fn prefixed(prefix: &str, name: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + name.len());
    out.push_str(prefix);
    out.push_str(name);
    out
}

/// Resolves a prefixed name against the root tree rooted at `root_addr`
/// (the live root or a snapshot's).
pub(crate) fn resolve_in(
    store: &mut PageStore,
    root_addr: u32,
    name: &str,
) -> Result<Option<u32>> {
    let entry = tree::get(store, root_addr, &EntryKey::Name(name))?;
    Ok(entry.and_then(|e| e.payload_addr()).filter(|&addr| addr != 0))
}

/// Writes (or rewrites) a name entry in the live root tree.
pub(crate) fn put_name(store: &mut PageStore, name: &str, addr: u32) -> Result<()> {
    let root = store.dirty_root()?;
    let (top, _) = tree::insert(
        store,
        root,
        Entry::Name {
            name: name.to_owned(),
            addr,
        },
        InsertPolicy::CanChange,
    )?;
    ensure_bug!(top == root, "root tree top moved during name update");
    Ok(())
}

pub(crate) fn remove_name(store: &mut PageStore, name: &str) -> Result<bool> {
    let root = store.dirty_root()?;
    let (top, removed) = tree::remove(store, root, &EntryKey::Name(name))?;
    ensure_bug!(top == root, "root tree top moved during name removal");
    Ok(removed.is_some())
}

/// Gets or creates a kv set, returning its top page address.
pub(crate) fn create_kv(store: &mut PageStore, name: &str) -> Result<u32> {
    let full = prefixed(KV_PREFIX, name);
    let root = store.root();
    if let Some(top) = resolve_in(store, root, &full)? {
        return Ok(top);
    }
    let top = store.alloc_dirty(PageContent::KvTop {
        meta: KvMeta::default(),
        node: NodePage::empty(NodeKind::Record),
    })?;
    put_name(store, &full, top)?;
    store.update_root_meta(|m| m.set_count += 1)?;
    Ok(top)
}

/// Gets or creates a document set, returning its top page address.
pub(crate) fn create_doc(store: &mut PageStore, name: &str) -> Result<u32> {
    let full = prefixed(DOC_PREFIX, name);
    let root = store.root();
    if let Some(top) = resolve_in(store, root, &full)? {
        return Ok(top);
    }
    let top = store.alloc_dirty(PageContent::DocTop {
        meta: DocMeta::default(),
        node: NodePage::empty(NodeKind::Record),
    })?;
    put_name(store, &full, top)?;
    store.update_root_meta(|m| m.set_count += 1)?;
    Ok(top)
}

/// Deletes a named set; its subtree is reclaimed by the refcount GC.
pub(crate) fn delete_set(store: &mut PageStore, prefix: &str, name: &str) -> Result<bool> {
    let full = prefixed(prefix, name);
    let removed = remove_name(store, &full)?;
    if removed {
        store.update_root_meta(|m| m.set_count -= 1)?;
    }
    Ok(removed)
}

/// All live set names under a prefix (name entries only, snapshots and the
/// other kind filtered out).
pub(crate) fn list_names(
    store: &mut PageStore,
    root_addr: u32,
    prefix: &str,
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in tree::scan_all(store, root_addr)? {
        if let Entry::Name { name, .. } = entry {
            if let Some(bare) = name.strip_prefix(prefix) {
                names.push(bare.to_owned());
            }
        }
    }
    Ok(names)
}

pub(crate) fn read_kv_meta(store: &mut PageStore, top: u32) -> Result<KvMeta> {
    match store.read(top)?.as_ref() {
        PageContent::KvTop { meta, .. } => Ok(meta.clone()),
        other => bug!("page {top} is not a kv set top ({:?})", other.page_type()),
    }
}

pub(crate) fn read_doc_meta(store: &mut PageStore, top: u32) -> Result<DocMeta> {
    match store.read(top)?.as_ref() {
        PageContent::DocTop { meta, .. } => Ok(meta.clone()),
        other => bug!("page {top} is not a doc set top ({:?})", other.page_type()),
    }
}

/// Rewrites a kv top's metadata. The top must already be dirty (a mutation
/// just went through it).
pub(crate) fn update_kv_meta(
    store: &mut PageStore,
    top: u32,
    f: impl FnOnce(&mut KvMeta),
) -> Result<()> {
    ensure_bug!(store.is_dirty(top), "meta update on clean page {top}");
    let page = store.read(top)?;
    let PageContent::KvTop { meta, node } = page.as_ref() else {
        bug!("page {top} is not a kv set top");
    };
    let mut meta = meta.clone();
    f(&mut meta);
    store.update_dirty(
        top,
        PageContent::KvTop {
            meta,
            node: node.clone(),
        },
    )
}

/// Rewrites a doc top's metadata (count, last id, index table).
pub(crate) fn update_doc_meta(
    store: &mut PageStore,
    top: u32,
    f: impl FnOnce(&mut DocMeta),
) -> Result<()> {
    ensure_bug!(store.is_dirty(top), "meta update on clean page {top}");
    let page = store.read(top)?;
    let PageContent::DocTop { meta, node } = page.as_ref() else {
        bug!("page {top} is not a doc set top");
    };
    let mut meta = meta.clone();
    f(&mut meta);
    store.update_dirty(
        top,
        PageContent::DocTop {
            meta,
            node: node.clone(),
        },
    )
}
