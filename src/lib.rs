//! # ShaleDB - Embedded Copy-on-Write Document Store
//!
//! ShaleDB is an embedded, single-file, copy-on-write document/key-value
//! storage engine: ordered key-value sets, document sets with secondary
//! indexes, point/range/boolean queries, multi-version snapshots, and
//! crash-consistent commits, all backed by fixed-size pages in one file.
//!
//! ## Quick Start
//!
//! ```ignore
//! use shaledb::{Database, IndexSpec, Query, Value};
//!
//! let db = Database::open("./app.shale")?;
//!
//! let users = db.create_doc_set("users")?;
//! users.use_indexes(&[IndexSpec::on("status"), IndexSpec::unique("email")])?;
//! users.insert(Value::object(vec![
//!     ("status", Value::from("online")),
//!     ("email", Value::from("a@example.com")),
//! ]))?;
//! db.commit()?;
//!
//! let online = users.query(&Query::eq("status", "online"))?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │       Public API (Database, handles)        │
//! ├─────────────────────────────────────────────┤
//! │ Set Layer (kv / doc sets, indexes) │ Query  │
//! ├─────────────────────────────────────────────┤
//! │             B+Tree Cursor Layer             │
//! ├─────────────────────────────────────────────┤
//! │    Page Storage (CoW, refcount GC,          │
//! │    two-tier cache, commit protocol)         │
//! ├─────────────────────────────────────────────┤
//! │    Page Model   │   Binary Value Codec      │
//! ├─────────────────────────────────────────────┤
//! │      Paged File (pread/pwrite/fsync)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! Shadow paging: mutation never touches committed pages — it builds a new
//! page generation through copy-on-write clones, and commit atomically
//! switches one anchor (the SuperPage) between generations, fenced by
//! fsync. Reclamation is deferred reference counting: mutations record
//! refcount deltas, and commit reconciles them against persistent
//! bookkeeping trees, cascading frees through unreferenced subtrees.
//!
//! ## Concurrency Model
//!
//! Single process. Each set has a fair single-writer/multi-reader lock;
//! a process-wide commit lock guards the root tree and the commit
//! transition. The [`Database::transact`] service batches concurrent
//! logical transactions into cycles that commit once per cycle and replay
//! wholesale on failure.
//!
//! ## Module Overview
//!
//! - [`codec`]: self-describing value encoding and key ordering
//! - [`page`]: typed fixed-size page records
//! - [`store`]: the copy-on-write engine, GC, and commit protocol
//! - [`tree`]: B+Tree search/insert/delete/scan over node pages
//! - [`sets`]: named kv/doc collections and index maintenance
//! - [`query`]: composable predicates over index trees
//! - [`lock`]: concurrency primitives
//! - [`database`]: the public facade

#[macro_use]
mod macros;

pub mod codec;
pub mod config;
pub mod database;
pub mod error;
pub mod lock;
pub mod page;
pub mod query;
pub mod sets;
pub mod store;
pub mod tree;
mod txn;

pub use codec::Value;
pub use config::Config;
pub use database::{
    Database, DatabaseBuilder, DbStats, DocSet, KvSet, Snapshot, SnapshotDoc, SnapshotKv,
};
pub use error::{DbError, Result};
pub use query::Query;
pub use sets::doc::{IdGenerator, IncrementId};
pub use sets::index::IndexSpec;
