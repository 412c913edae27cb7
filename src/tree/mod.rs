//! # B+Tree Cursor Layer
//!
//! Search, insert, delete, and range scans over node pages. This layer owns
//! the algorithms only — pages are borrowed from the [`PageStore`] per
//! access and every structural change routes back through it, so
//! copy-on-write and refcount bookkeeping happen in one place.
//!
//! ## Descent and Re-Parenting
//!
//! Operations descend by binary search (`children[position]` when the key
//! is not found) and rebuild the path on the way back up: a mutated child
//! comes back under a (possibly new) address, and each ancestor becomes a
//! fresh dirty page whose child pointer is rewritten. The caller receives
//! the tree's (possibly new) top address.
//!
//! ## Split
//!
//! After any mutation, a node whose serialized size exceeds the page is
//! split: roughly the first half of entries and children move into a new
//! left sibling, and the node's first remaining entry is promoted to the
//! parent with the sibling as its left child. When the mutation appended at
//! the node's end, the left sibling instead keeps nearly everything —
//! trading balance for fewer splits under monotonically increasing keys. A
//! splitting top page keeps its metadata and becomes a two-child interior
//! node over two fresh plain nodes.
//!
//! ## Delete
//!
//! Deletion is deliberately simplified and never rebalances or merges
//! underfull siblings. An entry with a left child is replaced in place by
//! the predecessor entry from the rightmost leaf of that subtree, which is
//! then deleted recursively. A node that shrinks to zero entries collapses:
//! the root pulls its single remaining child's content up into itself;
//! elsewhere the parent's child pointer is replaced by the orphan's single
//! remaining child (possibly none) and the empty node is discarded — the
//! refcount GC reclaims it. The resulting fanout is non-minimal under
//! delete-heavy workloads; a rebuild compacts it.

use crate::error::{DbError, Result};
use crate::page::{Entry, EntryKey, NodePage, PageContent};
use crate::store::PageStore;

/// Duplicate-key handling for [`insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Duplicate key is an error.
    NoChange,
    /// Key must already exist; its entry is replaced.
    ChangeOnly,
    /// Upsert.
    CanChange,
    /// Insert beside an equal key (non-unique index trees).
    CanAppend,
}

/// Keeps the recursion honest: depth is bounded by fanout, and a cycle in
/// corrupted child pointers must fail instead of recursing forever.
const MAX_DEPTH: usize = 64;

struct InsertOutcome {
    new_addr: u32,
    /// Promoted entry and its new left sibling, when this node split.
    split: Option<(Entry, u32)>,
    replaced: Option<Entry>,
}

struct RemoveOutcome {
    new_addr: u32,
    removed: Option<Entry>,
    /// This node is now empty; the parent should point at this child
    /// instead (zero for none) and discard the node.
    collapsed: Option<u32>,
}

fn node_of(page: &PageContent) -> Result<&NodePage> {
    match page.node() {
        Some(node) => Ok(node),
        None => bug!("tree operation on a {:?} page", page.page_type()),
    }
}

/// Point lookup. Returns the full entry for the leftmost match.
pub fn get(store: &mut PageStore, top: u32, key: &EntryKey<'_>) -> Result<Option<Entry>> {
    let mut addr = top;
    for _ in 0..MAX_DEPTH {
        let page = store.read(addr)?;
        let node = node_of(&page)?;
        let (found, pos) = node.search(key);
        if found {
            return Ok(Some(node.entries[pos].clone()));
        }
        let child = node.children[pos];
        if child == 0 {
            return Ok(None);
        }
        addr = child;
    }
    bug!("tree deeper than {MAX_DEPTH} levels at page {top}")
}

/// Inserts an entry, returning the (possibly new) top address and the entry
/// replaced, if the policy replaced one.
pub fn insert(
    store: &mut PageStore,
    top: u32,
    entry: Entry,
    policy: InsertPolicy,
) -> Result<(u32, Option<Entry>)> {
    let limit = store.max_key_bytes();
    let size = entry.encoded_len();
    if size > limit {
        return Err(DbError::KeyTooLarge { size, limit });
    }

    let outcome = insert_rec(store, top, entry, policy, 0)?;
    let mut new_top = outcome.new_addr;
    if let Some((promoted, left)) = outcome.split {
        new_top = raise_root(store, new_top, promoted, left)?;
    }
    Ok((new_top, outcome.replaced))
}

fn insert_rec(
    store: &mut PageStore,
    addr: u32,
    entry: Entry,
    policy: InsertPolicy,
    depth: usize,
) -> Result<InsertOutcome> {
    ensure_bug!(depth < MAX_DEPTH, "tree deeper than {MAX_DEPTH} levels");
    let page = store.read(addr)?;
    let node = node_of(&page)?;
    let (found, pos) = node.search(&entry.search_key());

    if found {
        match policy {
            InsertPolicy::NoChange => {
                return Err(DbError::AlreadyExists(format!("{:?}", entry.search_key())))
            }
            InsertPolicy::ChangeOnly | InsertPolicy::CanChange => {
                let daddr = store.make_dirty(addr)?;
                let mut content = (*store.read(daddr)?).clone();
                let n = content.node_mut().ok_or_else(|| DbError::Bug("non-node".into()))?;
                let replaced = std::mem::replace(&mut n.entries[pos], entry);
                store.update_dirty(daddr, content)?;
                return Ok(InsertOutcome {
                    new_addr: daddr,
                    split: None,
                    replaced: Some(replaced),
                });
            }
            InsertPolicy::CanAppend => {
                // Beside the equal entry, after it: the equal entry's left
                // subtree stays to its left.
                return splice(store, addr, pos + 1, entry);
            }
        }
    }

    let child = node.children[pos];
    if child != 0 {
        let sub = insert_rec(store, child, entry, policy, depth + 1)?;
        let daddr = store.make_dirty(addr)?;
        let mut content = (*store.read(daddr)?).clone();
        {
            let n = content.node_mut().ok_or_else(|| DbError::Bug("non-node".into()))?;
            n.children[pos] = sub.new_addr;
            if let Some((promoted, left)) = sub.split {
                n.entries.insert(pos, promoted);
                n.children.insert(pos, left);
            }
        }
        let split = split_if_needed(store, &mut content, pos)?;
        store.update_dirty(daddr, content)?;
        Ok(InsertOutcome {
            new_addr: daddr,
            split,
            replaced: sub.replaced,
        })
    } else {
        if policy == InsertPolicy::ChangeOnly {
            return Err(DbError::NotExist(format!("{:?}", entry.search_key())));
        }
        splice(store, addr, pos, entry)
    }
}

/// Splices an entry into a node at `pos` with an absent left child, then
/// splits if the node overflowed.
fn splice(store: &mut PageStore, addr: u32, pos: usize, entry: Entry) -> Result<InsertOutcome> {
    let daddr = store.make_dirty(addr)?;
    let mut content = (*store.read(daddr)?).clone();
    {
        let n = content.node_mut().ok_or_else(|| DbError::Bug("non-node".into()))?;
        n.entries.insert(pos, entry);
        n.children.insert(pos, 0);
    }
    let split = split_if_needed(store, &mut content, pos)?;
    store.update_dirty(daddr, content)?;
    Ok(InsertOutcome {
        new_addr: daddr,
        split,
        replaced: None,
    })
}

/// Splits an overflowing node in place: moves the low half (or nearly all
/// of it, for appends at the node's end) into a new left sibling, removes
/// the first remaining entry, and hands it back for promotion.
fn split_if_needed(
    store: &mut PageStore,
    content: &mut PageContent,
    insert_pos: usize,
) -> Result<Option<(Entry, u32)>> {
    if content.used_bytes() <= store.page_size() {
        return Ok(None);
    }
    let kind;
    let left_node;
    let promoted;
    {
        let n = content
            .node_mut()
            .ok_or_else(|| DbError::Bug("non-node".into()))?;
        let len = n.entries.len();
        ensure_bug!(len >= 2, "cannot split a {len}-entry node");
        let appending = insert_pos + 1 >= len;
        let keep_left = if appending && len >= 3 { len - 2 } else { len / 2 };

        kind = n.kind;
        let left_entries: Vec<Entry> = n.entries.drain(..keep_left).collect();
        let left_children: Vec<u32> = n.children.drain(..=keep_left).collect();
        promoted = n.entries.remove(0);
        left_node = NodePage {
            kind,
            entries: left_entries,
            children: left_children,
        };
    }
    let left_addr = store.alloc_dirty(PageContent::Node(left_node))?;
    Ok(Some((promoted, left_addr)))
}

/// A split reached the tree's top. The top page keeps its metadata and
/// becomes a two-child interior node: its remaining content moves into a
/// fresh right sibling beside the split-off left one.
fn raise_root(store: &mut PageStore, top: u32, promoted: Entry, left: u32) -> Result<u32> {
    let content = (*store.read(top)?).clone();
    let node = node_of(&content)?;
    let right = store.alloc_dirty(PageContent::Node(node.clone()))?;

    let mut new_content = content;
    {
        let n = new_content
            .node_mut()
            .ok_or_else(|| DbError::Bug("non-node".into()))?;
        n.entries = vec![promoted];
        n.children = vec![left, right];
    }
    store.update_dirty(top, new_content)?;
    Ok(top)
}

/// Removes the leftmost entry matching `key`. Returns the (possibly new)
/// top address and the removed entry.
pub fn remove(
    store: &mut PageStore,
    top: u32,
    key: &EntryKey<'_>,
) -> Result<(u32, Option<Entry>)> {
    let outcome = remove_rec(store, top, key, 0)?;
    if outcome.removed.is_none() {
        return Ok((top, None));
    }
    let new_top = outcome.new_addr;
    if let Some(only_child) = outcome.collapsed {
        // The top went empty: pull the single remaining child's content up
        // so the tree keeps one top page (and its metadata).
        if only_child != 0 {
            let child = store.read(only_child)?;
            let child_node = node_of(&child)?.clone();
            let mut content = (*store.read(new_top)?).clone();
            let n = content
                .node_mut()
                .ok_or_else(|| DbError::Bug("non-node".into()))?;
            *n = child_node;
            store.update_dirty(new_top, content)?;
        }
    }
    Ok((new_top, outcome.removed))
}

fn remove_rec(
    store: &mut PageStore,
    addr: u32,
    key: &EntryKey<'_>,
    depth: usize,
) -> Result<RemoveOutcome> {
    ensure_bug!(depth < MAX_DEPTH, "tree deeper than {MAX_DEPTH} levels");
    let page = store.read(addr)?;
    let node = node_of(&page)?;
    let (found, pos) = node.search(key);

    if found {
        let left_child = node.children[pos];
        if left_child != 0 {
            // Replace in place with the predecessor, then delete that
            // predecessor from the left subtree.
            let pred = rightmost_entry(store, left_child)?;
            let daddr = store.make_dirty(addr)?;
            let mut content = (*store.read(daddr)?).clone();
            let removed;
            {
                let n = content
                    .node_mut()
                    .ok_or_else(|| DbError::Bug("non-node".into()))?;
                removed = std::mem::replace(&mut n.entries[pos], pred.clone());
            }
            store.update_dirty(daddr, content)?;

            let sub = remove_rec(store, left_child, &pred.search_key(), depth + 1)?;
            ensure_bug!(sub.removed.is_some(), "predecessor vanished during delete");
            let mut content = (*store.read(daddr)?).clone();
            {
                let n = content
                    .node_mut()
                    .ok_or_else(|| DbError::Bug("non-node".into()))?;
                n.children[pos] = sub.collapsed.unwrap_or(sub.new_addr);
            }
            store.update_dirty(daddr, content)?;
            Ok(RemoveOutcome {
                new_addr: daddr,
                removed: Some(removed),
                collapsed: None,
            })
        } else {
            let daddr = store.make_dirty(addr)?;
            let mut content = (*store.read(daddr)?).clone();
            let removed;
            let collapsed;
            {
                let n = content
                    .node_mut()
                    .ok_or_else(|| DbError::Bug("non-node".into()))?;
                removed = n.entries.remove(pos);
                n.children.remove(pos);
                collapsed = if n.entries.is_empty() {
                    Some(n.children[0])
                } else {
                    None
                };
            }
            store.update_dirty(daddr, content)?;
            Ok(RemoveOutcome {
                new_addr: daddr,
                removed: Some(removed),
                collapsed,
            })
        }
    } else {
        let child = node.children[pos];
        if child == 0 {
            return Ok(RemoveOutcome {
                new_addr: addr,
                removed: None,
                collapsed: None,
            });
        }
        let sub = remove_rec(store, child, key, depth + 1)?;
        if sub.removed.is_none() {
            return Ok(RemoveOutcome {
                new_addr: addr,
                removed: None,
                collapsed: None,
            });
        }
        let daddr = store.make_dirty(addr)?;
        let mut content = (*store.read(daddr)?).clone();
        {
            let n = content
                .node_mut()
                .ok_or_else(|| DbError::Bug("non-node".into()))?;
            n.children[pos] = sub.collapsed.unwrap_or(sub.new_addr);
        }
        store.update_dirty(daddr, content)?;
        Ok(RemoveOutcome {
            new_addr: daddr,
            removed: sub.removed,
            collapsed: None,
        })
    }
}

fn rightmost_entry(store: &mut PageStore, top: u32) -> Result<Entry> {
    let mut addr = top;
    for _ in 0..MAX_DEPTH {
        let page = store.read(addr)?;
        let node = node_of(&page)?;
        let last_child = *node.children.last().unwrap_or(&0);
        if last_child != 0 {
            addr = last_child;
            continue;
        }
        return match node.entries.last() {
            Some(entry) => Ok(entry.clone()),
            None => bug!("empty node {addr} on a predecessor path"),
        };
    }
    bug!("tree deeper than {MAX_DEPTH} levels at page {top}")
}

/// In-order traversal of every entry.
pub fn scan_all(store: &mut PageStore, top: u32) -> Result<Vec<Entry>> {
    range_scan(store, top, None, None)
}

/// Bounded in-order scan. Bounds are `(key, inclusive)`; subtrees that
/// cannot contain in-range entries are pruned, so a narrow scan touches
/// only its range.
pub fn range_scan(
    store: &mut PageStore,
    top: u32,
    lower: Option<(&EntryKey<'_>, bool)>,
    upper: Option<(&EntryKey<'_>, bool)>,
) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    walk_range(store, top, lower, upper, &mut out, 0)?;
    Ok(out)
}

/// Returns false once the upper bound has been passed.
fn walk_range(
    store: &mut PageStore,
    addr: u32,
    lower: Option<(&EntryKey<'_>, bool)>,
    upper: Option<(&EntryKey<'_>, bool)>,
    out: &mut Vec<Entry>,
    depth: usize,
) -> Result<bool> {
    ensure_bug!(depth < MAX_DEPTH, "tree deeper than {MAX_DEPTH} levels");
    let page = store.read(addr)?;
    let node = node_of(&page)?.clone();

    for i in 0..=node.entries.len() {
        // A child's keys are all less than the entry at the same position;
        // skip the subtree when even that entry is below the lower bound.
        let child = node.children[i];
        if child != 0 {
            let skip = match (lower, node.entries.get(i)) {
                (Some((key, inclusive)), Some(entry)) => match entry.cmp_key(key) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Equal => !inclusive,
                    std::cmp::Ordering::Greater => false,
                },
                _ => false,
            };
            if !skip && !walk_range(store, child, lower, upper, out, depth + 1)? {
                return Ok(false);
            }
        }
        if i < node.entries.len() {
            let entry = &node.entries[i];
            if let Some((key, inclusive)) = lower {
                match entry.cmp_key(key) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Equal if !inclusive => continue,
                    _ => {}
                }
            }
            if let Some((key, inclusive)) = upper {
                match entry.cmp_key(key) {
                    std::cmp::Ordering::Greater => return Ok(false),
                    std::cmp::Ordering::Equal if !inclusive => return Ok(false),
                    _ => {}
                }
            }
            out.push(entry.clone());
        }
    }
    Ok(true)
}
