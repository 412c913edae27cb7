//! # Tree Node Pages
//!
//! Every tree in the engine (the root tree, kv/doc record trees, index
//! trees, and the ref-count and free-space bookkeeping trees) shares one node
//! shape: an ordered entry list plus one more child address than entries.
//! The families differ only in what an entry is:
//!
//! | Kind   | Entry                         | Ordered by          |
//! |--------|-------------------------------|---------------------|
//! | Name   | set name -> page address      | name bytes          |
//! | Record | key `Value` -> data pointer   | key order           |
//! | Index  | computed key -> data pointer  | (key, data pointer) |
//! | Ref    | page address -> refcount      | address             |
//! | Free   | page address                  | address             |
//!
//! ## Node Content Layout
//!
//! ```text
//! entry_count: u16
//! entries[entry_count]          (kind-specific, see Entry)
//! children[entry_count + 1]: u32 each, zero if absent
//! ```
//!
//! Children are always written, so a leaf is simply a node whose child
//! addresses are all zero. Zero child slots can also appear in interior
//! nodes after the simplified delete discards an empty child.
//!
//! ## Search
//!
//! `search` is a leftmost-biased binary search: it returns the position of
//! the first entry not less than the probe key, so duplicate keys in
//! non-unique index trees are found at their first occurrence and range
//! scans start at the correct edge.

use std::cmp::Ordering;

use crate::codec::{self, Reader, Value};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Name,
    Record,
    Index,
    Ref,
    Free,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Name { name: String, addr: u32 },
    Record { key: Value, data: u32 },
    Index { key: Value, data: u32 },
    Ref { addr: u32, count: u32 },
    Free { addr: u32 },
}

/// Probe key for tree search. `Value` compares by key alone (the match for
/// record trees and for key-only scans over index trees); `ValueData` is the
/// full identity of a non-unique index entry.
#[derive(Debug, Clone, Copy)]
pub enum EntryKey<'a> {
    Name(&'a str),
    Value(&'a Value),
    ValueData(&'a Value, u32),
    Addr(u32),
}

impl Entry {
    pub fn kind(&self) -> NodeKind {
        match self {
            Entry::Name { .. } => NodeKind::Name,
            Entry::Record { .. } => NodeKind::Record,
            Entry::Index { .. } => NodeKind::Index,
            Entry::Ref { .. } => NodeKind::Ref,
            Entry::Free { .. } => NodeKind::Free,
        }
    }

    /// The full identity of this entry as a probe key.
    pub fn search_key(&self) -> EntryKey<'_> {
        match self {
            Entry::Name { name, .. } => EntryKey::Name(name),
            Entry::Record { key, .. } => EntryKey::Value(key),
            Entry::Index { key, data } => EntryKey::ValueData(key, *data),
            Entry::Ref { addr, .. } => EntryKey::Addr(*addr),
            Entry::Free { addr } => EntryKey::Addr(*addr),
        }
    }

    /// The page address this entry's payload references, if any. Ref and
    /// Free entries describe other pages but do not reference them.
    pub fn payload_addr(&self) -> Option<u32> {
        match self {
            Entry::Name { addr, .. } => Some(*addr),
            Entry::Record { data, .. } | Entry::Index { data, .. } => Some(*data),
            Entry::Ref { .. } | Entry::Free { .. } => None,
        }
    }

    pub fn data_addr(&self) -> Option<u32> {
        match self {
            Entry::Record { data, .. } | Entry::Index { data, .. } => Some(*data),
            _ => None,
        }
    }

    pub fn cmp_key(&self, key: &EntryKey<'_>) -> Ordering {
        match (self, key) {
            (Entry::Name { name, .. }, EntryKey::Name(k)) => name.as_str().cmp(k),
            (Entry::Record { key: mine, .. }, EntryKey::Value(k)) => mine.key_cmp(k),
            (Entry::Index { key: mine, .. }, EntryKey::Value(k)) => mine.key_cmp(k),
            (Entry::Index { key: mine, data }, EntryKey::ValueData(k, d)) => {
                mine.key_cmp(k).then(data.cmp(d))
            }
            (Entry::Ref { addr, .. }, EntryKey::Addr(a)) => addr.cmp(a),
            (Entry::Free { addr }, EntryKey::Addr(a)) => addr.cmp(a),
            // Mixed kinds never share a tree; order by kind tag so a bad mix
            // still yields a total order instead of UB.
            _ => (self.kind() as u8).cmp(&(key.kind_rank())),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Entry::Name { name, .. } => Value::String(name.clone()).encoded_len() + 4,
            Entry::Record { key, .. } | Entry::Index { key, .. } => key.encoded_len() + 4,
            Entry::Ref { .. } => 8,
            Entry::Free { .. } => 4,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Entry::Name { name, addr } => {
                Value::String(name.clone()).encode(out);
                codec::put_u32(out, *addr);
            }
            Entry::Record { key, data } | Entry::Index { key, data } => {
                key.encode(out);
                codec::put_u32(out, *data);
            }
            Entry::Ref { addr, count } => {
                codec::put_u32(out, *addr);
                codec::put_u32(out, *count);
            }
            Entry::Free { addr } => {
                codec::put_u32(out, *addr);
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>, kind: NodeKind) -> Result<Entry> {
        Ok(match kind {
            NodeKind::Name => {
                let name = match Value::decode(r)? {
                    Value::String(s) => s,
                    other => corrupted!("name entry key must be a string, got {other:?}"),
                };
                let addr = r.u32()?;
                Entry::Name { name, addr }
            }
            NodeKind::Record => {
                let key = Value::decode(r)?;
                let data = r.u32()?;
                Entry::Record { key, data }
            }
            NodeKind::Index => {
                let key = Value::decode(r)?;
                let data = r.u32()?;
                Entry::Index { key, data }
            }
            NodeKind::Ref => {
                let addr = r.u32()?;
                let count = r.u32()?;
                Entry::Ref { addr, count }
            }
            NodeKind::Free => {
                let addr = r.u32()?;
                Entry::Free { addr }
            }
        })
    }
}

impl EntryKey<'_> {
    fn kind_rank(&self) -> u8 {
        match self {
            EntryKey::Name(_) => NodeKind::Name as u8,
            EntryKey::Value(_) | EntryKey::ValueData(_, _) => NodeKind::Record as u8,
            EntryKey::Addr(_) => NodeKind::Ref as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePage {
    pub kind: NodeKind,
    pub entries: Vec<Entry>,
    pub children: Vec<u32>,
}

impl NodePage {
    pub fn empty(kind: NodeKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            children: vec![0],
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(|&c| c == 0)
    }

    /// Byte length of the serialized node content, maintained against the
    /// page's free-space budget by the tree layer.
    pub fn content_len(&self) -> usize {
        2 + self
            .entries
            .iter()
            .map(Entry::encoded_len)
            .sum::<usize>()
            + 4 * self.children.len()
    }

    /// Leftmost-biased binary search: `(found, position)` where `position`
    /// is the first entry not less than `key`.
    pub fn search(&self, key: &EntryKey<'_>) -> (bool, usize) {
        let mut lo = 0;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.entries[mid].cmp_key(key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let found = lo < self.entries.len() && self.entries[lo].cmp_key(key) == Ordering::Equal;
        (found, lo)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u16(out, self.entries.len() as u16);
        for entry in &self.entries {
            entry.encode(out);
        }
        for &child in &self.children {
            codec::put_u32(out, child);
        }
    }

    pub fn decode(r: &mut Reader<'_>, kind: NodeKind) -> Result<NodePage> {
        let count = r.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(Entry::decode(r, kind)?);
        }
        let mut children = Vec::with_capacity(count + 1);
        for _ in 0..=count {
            children.push(r.u32()?);
        }
        Ok(NodePage {
            kind,
            entries,
            children,
        })
    }

    pub fn collect_refs(&self, out: &mut crate::page::RefVec) {
        for &child in &self.children {
            if child != 0 {
                out.push(child);
            }
        }
        for entry in &self.entries {
            if let Some(addr) = entry.payload_addr() {
                if addr != 0 {
                    out.push(addr);
                }
            }
        }
    }
}
