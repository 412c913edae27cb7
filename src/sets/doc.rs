//! # Document Sets
//!
//! A document set stores whole documents (object values) keyed by `id`,
//! with zero or more secondary indexes. Ids are auto-assigned by a
//! pluggable generator when the document carries none (default: integer
//! increment from the set's `last_id`), retried a bounded number of times
//! on collision.
//!
//! ## Index Maintenance
//!
//! Unique index trees are keyed by the computed key alone; non-unique
//! trees by (computed key, data pointer), so duplicate keys coexist as
//! distinct entries. Every document mutation:
//!
//! 1. validates **all** unique constraints up front — no primary or index
//!    tree is touched until every unique index accepts the new keys, so a
//!    conflicting mutation fails atomically with nothing to unwind;
//! 2. removes the old index entries (recomputed from the old document) when
//!    replacing;
//! 3. writes the new data chain, primary entry, and index entries.
//!
//! Index tops live in the set's metadata; copy-on-write moves them, and the
//! metadata diff keeps their refcounts honest.

use hashbrown::HashSet;

use crate::codec::Value;
use crate::error::{DbError, Result};
use crate::page::{DocMeta, Entry, EntryKey, IndexDef, NodeKind, NodePage, PageContent};
use crate::sets::index::{IndexSpec, KeyExpr};
use crate::sets::{read_doc_meta, update_doc_meta};
use crate::store::PageStore;
use crate::tree::{self, InsertPolicy};

pub const MAX_ID_ATTEMPTS: u32 = 10;

/// Produces candidate document ids. `attempt` counts collisions within one
/// insert so a generator can move past a taken id.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self, last_id: i64, attempt: u32) -> Value;
}

/// Default generator: integer increment.
#[derive(Debug, Default)]
pub struct IncrementId;

impl IdGenerator for IncrementId {
    fn next_id(&self, last_id: i64, attempt: u32) -> Value {
        Value::Number((last_id + 1 + attempt as i64) as f64)
    }
}

fn integral_id(id: &Value) -> Option<i64> {
    let n = id.as_f64()?;
    if n.is_finite() && n.fract() == 0.0 {
        Some(n as i64)
    } else {
        None
    }
}

pub(crate) fn get(store: &mut PageStore, top: u32, id: &Value) -> Result<Option<Value>> {
    match tree::get(store, top, &EntryKey::Value(id))? {
        Some(Entry::Record { data, .. }) => Ok(Some(read_doc(store, data)?)),
        Some(other) => bug!("doc tree yielded a {:?} entry", other.kind()),
        None => Ok(None),
    }
}

pub(crate) fn read_doc(store: &mut PageStore, ptr: u32) -> Result<Value> {
    let bytes = store.read_chain(ptr)?;
    Value::from_bytes(&bytes)
}

/// Inserts a new document. Fails with `AlreadyExists` on an id or unique
/// index conflict; returns the new top address and the document's id.
pub(crate) fn insert(
    store: &mut PageStore,
    top: u32,
    mut doc: Value,
    id_gen: &dyn IdGenerator,
) -> Result<(u32, Value)> {
    if !matches!(doc, Value::Object(_)) {
        return Err(DbError::Invalid("documents must be objects".into()));
    }
    let mut meta = read_doc_meta(store, top)?;

    let explicit = match doc.get("id") {
        None | Some(Value::Null) | Some(Value::Undefined) => None,
        Some(id) => Some(id.clone()),
    };
    let id = match explicit {
        Some(id) => {
            if tree::get(store, top, &EntryKey::Value(&id))?.is_some() {
                return Err(DbError::AlreadyExists(format!("document id {id:?}")));
            }
            id
        }
        None => {
            let mut chosen = None;
            for attempt in 0..MAX_ID_ATTEMPTS {
                let candidate = id_gen.next_id(meta.last_id, attempt);
                if tree::get(store, top, &EntryKey::Value(&candidate))?.is_none() {
                    chosen = Some(candidate);
                    break;
                }
            }
            let id = chosen.ok_or(DbError::IdCollisions(MAX_ID_ATTEMPTS))?;
            doc.set_field("id", id.clone());
            id
        }
    };

    validate_unique(store, &meta, &doc, None)?;

    let data = store.write_chain(&doc.to_bytes())?;
    let (new_top, _) = tree::insert(
        store,
        top,
        Entry::Record {
            key: id.clone(),
            data,
        },
        InsertPolicy::NoChange,
    )?;
    index_add(store, &mut meta, &doc, data)?;

    meta.count += 1;
    if let Some(i) = integral_id(&id) {
        if i > meta.last_id {
            meta.last_id = i;
        }
    }
    update_doc_meta(store, new_top, |m| *m = meta)?;
    Ok((new_top, id))
}

/// Replaces an existing document (matched by its `id` field). Fails with
/// `NotExist` when the id is unknown.
pub(crate) fn update(store: &mut PageStore, top: u32, doc: &Value) -> Result<u32> {
    let Some(id) = doc.get("id").cloned() else {
        return Err(DbError::Invalid("document update requires an id".into()));
    };
    let Some(Entry::Record { data: old_ptr, .. }) =
        tree::get(store, top, &EntryKey::Value(&id))?
    else {
        return Err(DbError::NotExist(format!("document id {id:?}")));
    };
    let old_doc = read_doc(store, old_ptr)?;
    let mut meta = read_doc_meta(store, top)?;

    validate_unique(store, &meta, doc, Some(old_ptr))?;

    let data = store.write_chain(&doc.to_bytes())?;
    let (new_top, _) = tree::insert(
        store,
        top,
        Entry::Record {
            key: id.clone(),
            data,
        },
        InsertPolicy::ChangeOnly,
    )?;
    index_remove(store, &mut meta, &old_doc, old_ptr)?;
    index_add(store, &mut meta, doc, data)?;
    update_doc_meta(store, new_top, |m| *m = meta)?;
    Ok(new_top)
}

pub(crate) fn upsert(
    store: &mut PageStore,
    top: u32,
    doc: Value,
    id_gen: &dyn IdGenerator,
) -> Result<(u32, Value)> {
    if let Some(id) = doc.get("id") {
        if !matches!(id, Value::Null | Value::Undefined)
            && tree::get(store, top, &EntryKey::Value(id))?.is_some()
        {
            let id = id.clone();
            let new_top = update(store, top, &doc)?;
            return Ok((new_top, id));
        }
    }
    insert(store, top, doc, id_gen)
}

/// Deletes a document by id. Index entries are removed and the data chain
/// is reclaimed by the refcount GC.
pub(crate) fn remove(store: &mut PageStore, top: u32, id: &Value) -> Result<(u32, bool)> {
    let Some(Entry::Record { data: old_ptr, .. }) = tree::get(store, top, &EntryKey::Value(id))?
    else {
        return Ok((top, false));
    };
    let old_doc = read_doc(store, old_ptr)?;
    let mut meta = read_doc_meta(store, top)?;

    let (new_top, removed) = tree::remove(store, top, &EntryKey::Value(id))?;
    ensure_bug!(removed.is_some(), "document vanished during delete");
    index_remove(store, &mut meta, &old_doc, old_ptr)?;

    meta.count -= 1;
    update_doc_meta(store, new_top, |m| *m = meta)?;
    Ok((new_top, true))
}

pub(crate) fn all(store: &mut PageStore, top: u32) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for entry in tree::scan_all(store, top)? {
        let Entry::Record { data, .. } = entry else {
            bug!("doc tree yielded a {:?} entry", entry.kind());
        };
        out.push(read_doc(store, data)?);
    }
    Ok(out)
}

pub(crate) fn ids(store: &mut PageStore, top: u32) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for entry in tree::scan_all(store, top)? {
        let Entry::Record { key, .. } = entry else {
            bug!("doc tree yielded a {:?} entry", entry.kind());
        };
        out.push(key);
    }
    Ok(out)
}

pub(crate) fn count(store: &mut PageStore, top: u32) -> Result<u64> {
    Ok(read_doc_meta(store, top)?.count)
}

/// Reconciles the declared index set against the stored definitions.
/// Removed definitions drop their trees (GC reclaims them); added ones are
/// built with one walk over the existing documents, unique constraints
/// validated before any tree is populated.
pub(crate) fn use_indexes(
    store: &mut PageStore,
    top: u32,
    specs: &[IndexSpec],
) -> Result<u32> {
    let mut names = HashSet::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(DbError::Invalid(format!(
                "index name {:?} declared twice",
                spec.name
            )));
        }
    }

    let meta = read_doc_meta(store, top)?;
    let kept: Vec<IndexDef> = meta
        .indexes
        .iter()
        .filter(|def| specs.iter().any(|s| s.matches(def)))
        .cloned()
        .collect();
    let added: Vec<&IndexSpec> = specs
        .iter()
        .filter(|s| !meta.indexes.iter().any(|def| s.matches(def)))
        .collect();
    if added.is_empty() && kept.len() == meta.indexes.len() {
        return Ok(top);
    }

    let new_top = store.make_dirty(top)?;

    let mut built: Vec<IndexDef> = Vec::with_capacity(added.len());
    if !added.is_empty() {
        let exprs: Vec<KeyExpr> = added
            .iter()
            .map(|s| KeyExpr::parse(&s.path))
            .collect::<Result<_>>()?;

        let mut docs: Vec<(u32, Value)> = Vec::new();
        for entry in tree::scan_all(store, new_top)? {
            let Entry::Record { data, .. } = entry else {
                bug!("doc tree yielded a {:?} entry", entry.kind());
            };
            docs.push((data, read_doc(store, data)?));
        }

        // Unique constraints first, before any index tree exists.
        for (spec, expr) in added.iter().zip(&exprs) {
            if !spec.unique {
                continue;
            }
            let mut seen = HashSet::new();
            for (_, doc) in &docs {
                let key = expr.extract(doc);
                if !seen.insert(key.to_bytes()) {
                    return Err(DbError::AlreadyExists(format!(
                        "unique index {:?} over existing documents",
                        spec.name
                    )));
                }
            }
        }

        for (spec, expr) in added.iter().zip(&exprs) {
            let mut tree_top =
                store.alloc_dirty(PageContent::Node(NodePage::empty(NodeKind::Index)))?;
            for (ptr, doc) in &docs {
                let key = expr.extract(doc);
                let (t, _) = tree::insert(
                    store,
                    tree_top,
                    Entry::Index { key, data: *ptr },
                    InsertPolicy::CanAppend,
                )?;
                tree_top = t;
            }
            built.push(IndexDef {
                name: spec.name.clone(),
                path: spec.path.clone(),
                unique: spec.unique,
                top: tree_top,
            });
        }
    }

    let mut final_defs = kept;
    final_defs.extend(built);
    update_doc_meta(store, new_top, |m| m.indexes = final_defs)?;
    Ok(new_top)
}

/// Checks every unique index for a conflicting key before anything is
/// mutated. `exclude` is the document's own current data pointer during an
/// update, so it does not conflict with itself.
fn validate_unique(
    store: &mut PageStore,
    meta: &DocMeta,
    doc: &Value,
    exclude: Option<u32>,
) -> Result<()> {
    for def in meta.indexes.iter().filter(|d| d.unique) {
        let key = KeyExpr::parse(&def.path)?.extract(doc);
        if let Some(entry) = tree::get(store, def.top, &EntryKey::Value(&key))? {
            if entry.data_addr() != exclude {
                return Err(DbError::AlreadyExists(format!(
                    "unique index {:?} key {key:?}",
                    def.name
                )));
            }
        }
    }
    Ok(())
}

fn index_add(
    store: &mut PageStore,
    meta: &mut DocMeta,
    doc: &Value,
    ptr: u32,
) -> Result<()> {
    for def in meta.indexes.iter_mut() {
        let key = KeyExpr::parse(&def.path)?.extract(doc);
        let (top, _) = tree::insert(
            store,
            def.top,
            Entry::Index { key, data: ptr },
            InsertPolicy::CanAppend,
        )?;
        def.top = top;
    }
    Ok(())
}

fn index_remove(
    store: &mut PageStore,
    meta: &mut DocMeta,
    old_doc: &Value,
    old_ptr: u32,
) -> Result<()> {
    for def in meta.indexes.iter_mut() {
        let key = KeyExpr::parse(&def.path)?.extract(old_doc);
        let probe = if def.unique {
            EntryKey::Value(&key)
        } else {
            EntryKey::ValueData(&key, old_ptr)
        };
        let (top, removed) = tree::remove(store, def.top, &probe)?;
        ensure_bug!(
            removed.is_some(),
            "index {:?} had no entry for a live document",
            def.name
        );
        def.top = top;
    }
    Ok(())
}
