//! # Query Engine
//!
//! Composable predicate objects evaluated against a document set's index
//! trees. Each predicate produces an ordered sequence of matching data
//! pointers; combinators work on pointer identity:
//!
//! - `eq` / range predicates (`gt/ge/lt/le/between`) are bounded scans —
//!   they seek to the relevant edge of the index and walk only while the
//!   bound comparator holds;
//! - `ne` scans the whole index, filtering out the equal run;
//! - `and` intersects pairwise through an accumulator set, `or` unions with
//!   dedup, both preserving the first operand's order;
//! - `not` is a full primary scan minus the inner set — O(n) regardless of
//!   the inner predicate's selectivity;
//! - `slice(skip, limit)` windows an upstream sequence.
//!
//! The special index name `"id"` targets the primary tree directly instead
//! of a secondary index. Querying an undeclared index is a `NotExist`
//! error.

use hashbrown::HashSet;

use crate::codec::Value;
use crate::error::{DbError, Result};
use crate::page::{DocMeta, Entry, EntryKey};
use crate::store::PageStore;
use crate::tree;

pub const PRIMARY_INDEX: &str = "id";

#[derive(Debug, Clone)]
pub enum Query {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Between {
        index: String,
        min: Value,
        max: Value,
        min_inclusive: bool,
        max_inclusive: bool,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Slice {
        inner: Box<Query>,
        skip: usize,
        limit: usize,
    },
}

impl Query {
    pub fn eq(index: &str, value: impl Into<Value>) -> Query {
        Query::Eq(index.to_owned(), value.into())
    }

    pub fn ne(index: &str, value: impl Into<Value>) -> Query {
        Query::Ne(index.to_owned(), value.into())
    }

    pub fn gt(index: &str, value: impl Into<Value>) -> Query {
        Query::Gt(index.to_owned(), value.into())
    }

    pub fn ge(index: &str, value: impl Into<Value>) -> Query {
        Query::Ge(index.to_owned(), value.into())
    }

    pub fn lt(index: &str, value: impl Into<Value>) -> Query {
        Query::Lt(index.to_owned(), value.into())
    }

    pub fn le(index: &str, value: impl Into<Value>) -> Query {
        Query::Le(index.to_owned(), value.into())
    }

    /// Inclusive range on both ends.
    pub fn between(index: &str, min: impl Into<Value>, max: impl Into<Value>) -> Query {
        Query::Between {
            index: index.to_owned(),
            min: min.into(),
            max: max.into(),
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    pub fn and(queries: Vec<Query>) -> Query {
        Query::And(queries)
    }

    pub fn or(queries: Vec<Query>) -> Query {
        Query::Or(queries)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Query) -> Query {
        Query::Not(Box::new(inner))
    }

    pub fn slice(inner: Query, skip: usize, limit: usize) -> Query {
        Query::Slice {
            inner: Box::new(inner),
            skip,
            limit,
        }
    }

    /// Evaluates to an ordered, deduplicated list of data pointers.
    pub(crate) fn execute(
        &self,
        store: &mut PageStore,
        meta: &DocMeta,
        primary_top: u32,
    ) -> Result<Vec<u32>> {
        match self {
            Query::Eq(index, value) => {
                scan(store, meta, primary_top, index, Some((value, true)), Some((value, true)))
            }
            Query::Ne(index, value) => {
                let all = scan(store, meta, primary_top, index, None, None)?;
                let equal: HashSet<u32> = scan(
                    store,
                    meta,
                    primary_top,
                    index,
                    Some((value, true)),
                    Some((value, true)),
                )?
                .into_iter()
                .collect();
                Ok(all.into_iter().filter(|p| !equal.contains(p)).collect())
            }
            Query::Gt(index, value) => {
                scan(store, meta, primary_top, index, Some((value, false)), None)
            }
            Query::Ge(index, value) => {
                scan(store, meta, primary_top, index, Some((value, true)), None)
            }
            Query::Lt(index, value) => {
                scan(store, meta, primary_top, index, None, Some((value, false)))
            }
            Query::Le(index, value) => {
                scan(store, meta, primary_top, index, None, Some((value, true)))
            }
            Query::Between {
                index,
                min,
                max,
                min_inclusive,
                max_inclusive,
            } => scan(
                store,
                meta,
                primary_top,
                index,
                Some((min, *min_inclusive)),
                Some((max, *max_inclusive)),
            ),
            Query::And(queries) => {
                let mut iter = queries.iter();
                let Some(first) = iter.next() else {
                    return Ok(Vec::new());
                };
                let mut result = first.execute(store, meta, primary_top)?;
                for q in iter {
                    let keep: HashSet<u32> =
                        q.execute(store, meta, primary_top)?.into_iter().collect();
                    result.retain(|p| keep.contains(p));
                    if result.is_empty() {
                        break;
                    }
                }
                Ok(result)
            }
            Query::Or(queries) => {
                let mut seen = HashSet::new();
                let mut result = Vec::new();
                for q in queries {
                    for ptr in q.execute(store, meta, primary_top)? {
                        if seen.insert(ptr) {
                            result.push(ptr);
                        }
                    }
                }
                Ok(result)
            }
            Query::Not(inner) => {
                let exclude: HashSet<u32> =
                    inner.execute(store, meta, primary_top)?.into_iter().collect();
                let all = scan(store, meta, primary_top, PRIMARY_INDEX, None, None)?;
                Ok(all.into_iter().filter(|p| !exclude.contains(p)).collect())
            }
            Query::Slice { inner, skip, limit } => {
                let result = inner.execute(store, meta, primary_top)?;
                Ok(result.into_iter().skip(*skip).take(*limit).collect())
            }
        }
    }
}

/// Bounded scan over one index (or the primary tree), yielding data
/// pointers in index order.
fn scan(
    store: &mut PageStore,
    meta: &DocMeta,
    primary_top: u32,
    index: &str,
    lower: Option<(&Value, bool)>,
    upper: Option<(&Value, bool)>,
) -> Result<Vec<u32>> {
    let top = if index == PRIMARY_INDEX {
        primary_top
    } else {
        meta.index(index)
            .ok_or_else(|| DbError::NotExist(format!("index {index:?}")))?
            .top
    };

    let lower_key = lower.map(|(v, inc)| (EntryKey::Value(v), inc));
    let upper_key = upper.map(|(v, inc)| (EntryKey::Value(v), inc));
    let entries = tree::range_scan(
        store,
        top,
        lower_key.as_ref().map(|(k, inc)| (k, *inc)),
        upper_key.as_ref().map(|(k, inc)| (k, *inc)),
    )?;

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Entry::Record { data, .. } | Entry::Index { data, .. } => out.push(data),
            other => bug!("query scan hit a {:?} entry", other.kind()),
        }
    }
    Ok(out)
}
