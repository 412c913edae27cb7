//! # Deferred Reference Counting
//!
//! Structural mutation never maintains live reference counts; it records
//! `+1`/`-1` deltas against page addresses. This module reconciles those
//! deltas against two persistent trees at commit time:
//!
//! - the **ref tree** holds explicit counts for pages referenced two or
//!   more times (a page with no entry that is not free has an implicit
//!   count of one);
//! - the **free tree** holds addresses with count zero, available for
//!   reuse.
//!
//! For each address with a pending delta the reconciler computes the old
//! count — explicit entry, else 0 for a page allocated this generation or
//! sitting in the free set, else the implicit 1 — applies the delta, and
//! acts on the result:
//!
//! - count 0: unref the page — recursively decrement everything the page
//!   itself references (cascading collection) and put the address on the
//!   free tree;
//! - count 1: drop the explicit entry (implicit again);
//! - count ≥ 2: store the explicit entry.
//!
//! The ref and free trees are ordinary copy-on-write trees, so reconciling
//! deltas produces further deltas (clones, splits, freed old nodes); the
//! loop runs until it reaches a fixed point, with a defensive round cap.
//! Counts resolved once are carried in [`GcCtx`] across rounds so a page's
//! implicit/new-page base is only consulted the first time it is seen in a
//! commit.
//!
//! A page freed here that was never durable (allocated this generation) is
//! simply discarded from the dirty set and its address recycled at once.
//! A durable page's address goes to the free tree and to the store's
//! deferred free list, becoming allocatable only after the commit's write
//! completes.

use hashbrown::HashMap;
use log::trace;

use crate::error::Result;
use crate::page::{Entry, EntryKey, NodeKind, NodePage, PageContent};
use crate::store::PageStore;
use crate::tree::{self, InsertPolicy};

const MAX_ROUNDS: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct GcCtx {
    /// Counts already computed this commit, by address.
    resolved: HashMap<u32, i64>,
}

pub(crate) fn reconcile(store: &mut PageStore, ctx: &mut GcCtx) -> Result<()> {
    let mut rounds = 0;
    loop {
        rounds += 1;
        ensure_bug!(
            rounds <= MAX_ROUNDS,
            "refcount reconciliation did not reach a fixed point after {MAX_ROUNDS} rounds"
        );

        // Addresses taken from the free set leave the free tree first, so a
        // reused address is never simultaneously allocated and listed free.
        // Removing them can itself consume free addresses (copy-on-write of
        // free-tree nodes), queueing further removals for the next round.
        let removals = std::mem::take(&mut store.free_tree_removals);
        for addr in removals {
            free_tree_remove(store, addr)?;
        }
        if store.deltas.is_empty() {
            if store.free_tree_removals.is_empty() {
                return Ok(());
            }
            continue;
        }

        let batch: Vec<(u32, i64)> = store.deltas.drain().collect();
        trace!("refcount round {rounds}: {} addresses", batch.len());
        for (addr, delta) in batch {
            if delta == 0 {
                continue;
            }
            let old = current_count(store, ctx, addr)?;
            let new = old + delta;
            ensure_bug!(
                new >= 0,
                "refcount of page {addr} went negative ({old} {delta:+})"
            );
            ctx.resolved.insert(addr, new);

            if new == 0 {
                if old >= 2 {
                    ref_tree_remove(store, addr)?;
                }
                unref(store, addr)?;
            } else {
                if old == 0 {
                    resurrect(store, addr)?;
                }
                if new == 1 {
                    if old >= 2 {
                        ref_tree_remove(store, addr)?;
                    }
                } else {
                    ref_tree_set(store, addr, new as u32)?;
                }
            }
        }
    }
}

fn current_count(store: &mut PageStore, ctx: &GcCtx, addr: u32) -> Result<i64> {
    if let Some(&count) = ctx.resolved.get(&addr) {
        return Ok(count);
    }
    if store.new_pages.contains(&addr) {
        return Ok(0);
    }
    if store.ref_top != 0 {
        let ref_top = store.ref_top;
        if let Some(Entry::Ref { count, .. }) =
            tree::get(store, ref_top, &EntryKey::Addr(addr))?
        {
            return Ok(count as i64);
        }
    }
    if store.free_set.contains(&addr) || store.pending_free.contains(&addr) {
        return Ok(0);
    }
    Ok(1)
}

/// Releases a page whose count reached zero: decrements everything it
/// references and recycles its address.
fn unref(store: &mut PageStore, addr: u32) -> Result<()> {
    let page = store.read(addr)?;
    store.add_refs(&page, -1);

    if store.new_pages.remove(&addr) {
        // Never durable: drop the dirty page outright. The address stays
        // listed in the free tree so it survives reopen if nothing reuses
        // it before this commit finishes; a still-queued removal from its
        // allocation must not strip that listing afterwards.
        store.dirty.remove(&addr);
        store.free_tree_removals.retain(|&a| a != addr);
        free_tree_insert(store, addr)?;
        store.free_set.insert(addr);
        store.used_free.remove(&addr);
        trace!("discarded transient page {addr}");
    } else {
        free_tree_insert(store, addr)?;
        store.pending_free.push(addr);
        store.evict(addr);
        trace!("freed page {addr}");
    }
    Ok(())
}

/// A freed address picked up a new reference before commit: pull it back
/// off the free tracking.
fn resurrect(store: &mut PageStore, addr: u32) -> Result<()> {
    if store.new_pages.contains(&addr) {
        return Ok(());
    }
    let mut was_free = false;
    if store.free_set.remove(&addr) {
        was_free = true;
    }
    if let Some(pos) = store.pending_free.iter().position(|&a| a == addr) {
        store.pending_free.swap_remove(pos);
        was_free = true;
    }
    if was_free {
        free_tree_remove(store, addr)?;
    }
    Ok(())
}

fn ref_tree_set(store: &mut PageStore, addr: u32, count: u32) -> Result<()> {
    if store.ref_top == 0 {
        store.ref_top =
            store.alloc_dirty(PageContent::Node(NodePage::empty(NodeKind::Ref)))?;
    }
    let ref_top = store.ref_top;
    let (top, _) = tree::insert(
        store,
        ref_top,
        Entry::Ref { addr, count },
        InsertPolicy::CanChange,
    )?;
    store.ref_top = top;
    Ok(())
}

fn ref_tree_remove(store: &mut PageStore, addr: u32) -> Result<()> {
    if store.ref_top == 0 {
        return Ok(());
    }
    let ref_top = store.ref_top;
    let (top, _) = tree::remove(store, ref_top, &EntryKey::Addr(addr))?;
    store.ref_top = top;
    Ok(())
}

fn free_tree_insert(store: &mut PageStore, addr: u32) -> Result<()> {
    if store.free_top == 0 {
        store.free_top =
            store.alloc_dirty(PageContent::Node(NodePage::empty(NodeKind::Free)))?;
    }
    let free_top = store.free_top;
    let (top, _) = tree::insert(
        store,
        free_top,
        Entry::Free { addr },
        InsertPolicy::CanChange,
    )?;
    store.free_top = top;
    Ok(())
}

fn free_tree_remove(store: &mut PageStore, addr: u32) -> Result<()> {
    if store.free_top == 0 {
        return Ok(());
    }
    let free_top = store.free_top;
    let (top, _) = tree::remove(store, free_top, &EntryKey::Addr(addr))?;
    store.free_top = top;
    Ok(())
}
