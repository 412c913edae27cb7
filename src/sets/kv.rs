//! # Key-Value Sets
//!
//! A kv set is a typed accessor over a `KvTop` page: arbitrary encoded
//! scalar (or structured) keys, values stored out of line in data-page
//! chains. These are the set-layer internals; locking and name-entry upkeep
//! happen in the database facade, which is also why every mutation returns
//! the set's (possibly new) top address.

use crate::codec::Value;
use crate::error::Result;
use crate::page::{Entry, EntryKey};
use crate::sets::{read_kv_meta, update_kv_meta};
use crate::store::PageStore;
use crate::tree::{self, InsertPolicy};

pub(crate) fn get(store: &mut PageStore, top: u32, key: &Value) -> Result<Option<Value>> {
    match tree::get(store, top, &EntryKey::Value(key))? {
        Some(Entry::Record { data, .. }) => {
            let bytes = store.read_chain(data)?;
            Ok(Some(Value::from_bytes(&bytes)?))
        }
        Some(other) => bug!("kv tree yielded a {:?} entry", other.kind()),
        None => Ok(None),
    }
}

pub(crate) fn exists(store: &mut PageStore, top: u32, key: &Value) -> Result<bool> {
    Ok(tree::get(store, top, &EntryKey::Value(key))?.is_some())
}

/// Upserts a key. Returns the new top address.
pub(crate) fn set(store: &mut PageStore, top: u32, key: &Value, value: &Value) -> Result<u32> {
    let data = store.write_chain(&value.to_bytes())?;
    let entry = Entry::Record {
        key: key.clone(),
        data,
    };
    let (new_top, replaced) = tree::insert(store, top, entry, InsertPolicy::CanChange)?;
    if replaced.is_none() {
        update_kv_meta(store, new_top, |m| m.count += 1)?;
    }
    Ok(new_top)
}

/// Deletes a key. Returns the new top address and whether a key was
/// removed; the value's chain is reclaimed by the refcount GC.
pub(crate) fn remove(store: &mut PageStore, top: u32, key: &Value) -> Result<(u32, bool)> {
    let (new_top, removed) = tree::remove(store, top, &EntryKey::Value(key))?;
    if removed.is_some() {
        update_kv_meta(store, new_top, |m| m.count -= 1)?;
    }
    Ok((new_top, removed.is_some()))
}

pub(crate) fn entries(store: &mut PageStore, top: u32) -> Result<Vec<(Value, Value)>> {
    let mut out = Vec::new();
    for entry in tree::scan_all(store, top)? {
        let Entry::Record { key, data } = entry else {
            bug!("kv tree yielded a {:?} entry", entry.kind());
        };
        let bytes = store.read_chain(data)?;
        out.push((key, Value::from_bytes(&bytes)?));
    }
    Ok(out)
}

pub(crate) fn keys(store: &mut PageStore, top: u32) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for entry in tree::scan_all(store, top)? {
        let Entry::Record { key, .. } = entry else {
            bug!("kv tree yielded a {:?} entry", entry.kind());
        };
        out.push(key);
    }
    Ok(out)
}

pub(crate) fn count(store: &mut PageStore, top: u32) -> Result<u64> {
    Ok(read_kv_meta(store, top)?.count)
}
