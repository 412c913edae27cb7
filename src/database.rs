//! # Database Facade
//!
//! `Database` wires the engine together: one `PageStore` behind a mutex,
//! the process-wide commit lock, a per-set lock registry, and the batched
//! transaction service. Handles (`KvSet`, `DocSet`, `Snapshot`) are cheap
//! clones holding the shared inner state.
//!
//! ## Lock Protocol
//!
//! A set-level read takes the commit lock as reader just long enough to
//! resolve the set's current top address, releases it, then takes the set's
//! own lock as reader for the operation. A set-level write holds the commit
//! lock as writer for the full mutation including index updates. Commit,
//! rollback, set create/delete, and snapshot operations take the commit
//! lock exclusively.
//!
//! Mutations are durable only after [`Database::commit`] (or a transaction
//! cycle's group commit); dropping the database discards uncommitted work,
//! which a reopen will not see.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::codec::Value;
use crate::config::Config;
use crate::error::{DbError, Result};
use crate::lock::OneWriterLock;
use crate::query::Query;
use crate::sets::doc::{IdGenerator, IncrementId};
use crate::sets::index::IndexSpec;
use crate::sets::{self, doc, kv, DOC_PREFIX, KV_PREFIX, SNAPSHOT_PREFIX};
use crate::store::PageStore;
use crate::txn::TxnService;

pub(crate) struct DbInner {
    store: Mutex<PageStore>,
    commit_lock: OneWriterLock,
    set_locks: Mutex<HashMap<String, Arc<OneWriterLock>>>,
    txns: TxnService,
    config: Config,
    path: PathBuf,
}

impl DbInner {
    fn set_lock(&self, full_name: &str) -> Arc<OneWriterLock> {
        let mut locks = self.set_locks.lock();
        Arc::clone(
            locks
                .entry(full_name.to_owned())
                .or_insert_with(|| Arc::new(OneWriterLock::new())),
        )
    }

    /// Read-path resolution: commit lock as reader only while resolving the
    /// set's top pointer.
    fn resolve_for_read(&self, full_name: &str) -> Result<(u32, Arc<OneWriterLock>)> {
        let top = {
            let _commit = self.commit_lock.read();
            let mut store = self.store.lock();
            let root = store.root();
            sets::resolve_in(&mut store, root, full_name)?
        };
        let top = top.ok_or_else(|| DbError::NotExist(format!("set {full_name:?}")))?;
        Ok((top, self.set_lock(full_name)))
    }

    /// Write-path wrapper: exclusive commit lock, set write lock, resolve,
    /// mutate, rewrite the name entry if copy-on-write moved the top.
    fn write_op<R>(
        &self,
        full_name: &str,
        f: impl FnOnce(&mut PageStore, u32) -> Result<(u32, R)>,
    ) -> Result<R> {
        let _commit = self.commit_lock.write();
        let lock = self.set_lock(full_name);
        let _set = lock.write();
        let mut store = self.store.lock();
        let root = store.root();
        let top = sets::resolve_in(&mut store, root, full_name)?
            .ok_or_else(|| DbError::NotExist(format!("set {full_name:?}")))?;
        let (new_top, out) = f(&mut store, top)?;
        if new_top != top {
            sets::put_name(&mut store, full_name, new_top)?;
        }
        Ok(out)
    }
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

/// Point-in-time address-space counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    /// Next never-allocated address; addresses below this are in use or
    /// free-listed.
    pub alloc_high_water: u32,
    /// Addresses currently available for reuse.
    pub free_addrs: usize,
    pub revision: u32,
}

pub struct DatabaseBuilder {
    config: Config,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default().with_env_overrides(),
        }
    }

    pub fn page_size(mut self, bytes: usize) -> Self {
        self.config.page_size = bytes;
        self
    }

    pub fn meta_cache_bytes(mut self, bytes: usize) -> Self {
        self.config.meta_cache_bytes = bytes;
        self
    }

    pub fn data_cache_bytes(mut self, bytes: usize) -> Self {
        self.config.data_cache_bytes = bytes;
        self
    }

    pub fn max_concurrent_txns(mut self, count: usize) -> Self {
        self.config.max_concurrent_txns = count;
        self
    }

    pub fn open(self, path: impl AsRef<Path>) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        let store = PageStore::open(&path, self.config.clone())?;
        Ok(Database {
            inner: Arc::new(DbInner {
                store: Mutex::new(store),
                commit_lock: OneWriterLock::new(),
                set_locks: Mutex::new(HashMap::new()),
                txns: TxnService::new(self.config.max_concurrent_txns),
                config: self.config,
                path,
            }),
        })
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        DatabaseBuilder::new().open(path)
    }

    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Revision of the last durable commit.
    pub fn revision(&self) -> u32 {
        self.inner.store.lock().revision()
    }

    /// Address-space accounting, mostly useful for observing reclamation.
    pub fn stats(&self) -> DbStats {
        let store = self.inner.store.lock();
        DbStats {
            alloc_high_water: store.alloc_high_water(),
            free_addrs: store.free_addr_count(),
            revision: store.revision(),
        }
    }

    /// Durably persists everything mutated since the last commit; returns
    /// the new revision (unchanged for an empty generation).
    pub fn commit(&self) -> Result<u32> {
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        store.commit()
    }

    /// Discards everything mutated since the last commit.
    pub fn rollback(&self) {
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        store.rollback();
    }

    /// Closes the database. Uncommitted mutations are discarded.
    pub fn close(self) {}

    // ---- sets ------------------------------------------------------------

    /// Gets or creates a key-value set.
    pub fn create_kv_set(&self, name: &str) -> Result<KvSet> {
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        sets::create_kv(&mut store, name)?;
        drop(store);
        Ok(self.kv_handle(name))
    }

    pub fn get_kv_set(&self, name: &str) -> Result<Option<KvSet>> {
        let full = sets::prefixed(KV_PREFIX, name);
        let _commit = self.inner.commit_lock.read();
        let mut store = self.inner.store.lock();
        let root = store.root();
        Ok(sets::resolve_in(&mut store, root, &full)?.map(|_| self.kv_handle(name)))
    }

    pub fn delete_kv_set(&self, name: &str) -> Result<bool> {
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        sets::delete_set(&mut store, KV_PREFIX, name)
    }

    /// Gets or creates a document set.
    pub fn create_doc_set(&self, name: &str) -> Result<DocSet> {
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        sets::create_doc(&mut store, name)?;
        drop(store);
        Ok(self.doc_handle(name))
    }

    pub fn get_doc_set(&self, name: &str) -> Result<Option<DocSet>> {
        let full = sets::prefixed(DOC_PREFIX, name);
        let _commit = self.inner.commit_lock.read();
        let mut store = self.inner.store.lock();
        let root = store.root();
        Ok(sets::resolve_in(&mut store, root, &full)?.map(|_| self.doc_handle(name)))
    }

    pub fn delete_doc_set(&self, name: &str) -> Result<bool> {
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        sets::delete_set(&mut store, DOC_PREFIX, name)
    }

    pub fn kv_set_names(&self) -> Result<Vec<String>> {
        let _commit = self.inner.commit_lock.read();
        let mut store = self.inner.store.lock();
        let root = store.root();
        sets::list_names(&mut store, root, KV_PREFIX)
    }

    pub fn doc_set_names(&self) -> Result<Vec<String>> {
        let _commit = self.inner.commit_lock.read();
        let mut store = self.inner.store.lock();
        let root = store.root();
        sets::list_names(&mut store, root, DOC_PREFIX)
    }

    fn kv_handle(&self, name: &str) -> KvSet {
        KvSet {
            inner: Arc::clone(&self.inner),
            full_name: sets::prefixed(KV_PREFIX, name),
            name: name.to_owned(),
        }
    }

    fn doc_handle(&self, name: &str) -> DocSet {
        DocSet {
            inner: Arc::clone(&self.inner),
            full_name: sets::prefixed(DOC_PREFIX, name),
            name: name.to_owned(),
            id_gen: Arc::new(IncrementId),
        }
    }

    // ---- snapshots -------------------------------------------------------

    /// Records the last committed generation under a name, pinning its
    /// pages against garbage collection until the snapshot is deleted. The
    /// snapshot entry itself becomes durable at the next commit.
    pub fn create_snapshot(&self, name: &str) -> Result<()> {
        let full = sets::prefixed(SNAPSHOT_PREFIX, name);
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        let committed = store.committed_root();
        ensure_bug!(committed != 0, "no committed generation to snapshot");
        sets::put_name(&mut store, &full, committed)
    }

    pub fn get_snapshot(&self, name: &str) -> Result<Option<Snapshot>> {
        let full = sets::prefixed(SNAPSHOT_PREFIX, name);
        let _commit = self.inner.commit_lock.read();
        let mut store = self.inner.store.lock();
        let root = store.root();
        Ok(sets::resolve_in(&mut store, root, &full)?.map(|addr| Snapshot {
            inner: Arc::clone(&self.inner),
            root: addr,
        }))
    }

    pub fn delete_snapshot(&self, name: &str) -> Result<bool> {
        let full = sets::prefixed(SNAPSHOT_PREFIX, name);
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        sets::remove_name(&mut store, &full)
    }

    /// Read-only view of the generation before the last commit. Valid only
    /// until its addresses are reused by later commits; pin with
    /// [`Database::create_snapshot`] to keep a generation.
    pub fn prev_commit(&self) -> Result<Option<Snapshot>> {
        let _commit = self.inner.commit_lock.read();
        let mut store = self.inner.store.lock();
        let committed = store.committed_root();
        if committed == 0 {
            return Ok(None);
        }
        let page = store.read(committed)?;
        let prev = match page.as_ref() {
            crate::page::PageContent::Root { meta, .. } => meta.prev_root,
            _ => 0,
        };
        Ok((prev != 0).then(|| Snapshot {
            inner: Arc::clone(&self.inner),
            root: prev,
        }))
    }

    // ---- transactions ----------------------------------------------------

    /// Runs a logical transaction through the batching service. The body
    /// may run concurrently with other bodies in the same cycle and must be
    /// replay-safe: on any cycle member's failure the whole cycle rolls
    /// back and every body is re-run from scratch.
    pub fn transact<R, F>(&self, body: F) -> Result<R>
    where
        R: Send + 'static,
        F: Fn(&Database) -> Result<R> + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.inner);
        inner.txns.run(self, body)
    }

    // ---- dump / import / rebuild ----------------------------------------

    /// JSON serialization of the whole logical contents, independent of the
    /// on-disk layout. Snapshots are not dumped.
    pub fn dump(&self) -> Result<serde_json::Value> {
        let _commit = self.inner.commit_lock.read();
        let mut store = self.inner.store.lock();
        dump_inner(&mut store)
    }

    /// Loads a dump into this database (intended for a freshly created
    /// one); the caller commits. Existing ids collide as usual.
    pub fn import(&self, dump: &serde_json::Value) -> Result<()> {
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        import_inner(&mut store, dump)
    }

    /// Compacts the database: dump, import into a fresh file alongside,
    /// atomically swap it in, reopen. Uncommitted mutations are discarded.
    pub fn rebuild(&self) -> Result<()> {
        let _commit = self.inner.commit_lock.write();
        let mut store = self.inner.store.lock();
        store.rollback();
        let dump = dump_inner(&mut store)?;

        let tmp_path = self.inner.path.with_extension("rebuild");
        let _ = std::fs::remove_file(&tmp_path);
        let mut fresh = PageStore::open(&tmp_path, self.inner.config.clone())?;
        import_inner(&mut fresh, &dump)?;
        fresh.commit()?;
        drop(fresh);

        std::fs::rename(&tmp_path, &self.inner.path)?;
        *store = PageStore::open(&self.inner.path, self.inner.config.clone())?;
        Ok(())
    }
}

// ---- kv handle ------------------------------------------------------------

#[derive(Clone)]
pub struct KvSet {
    inner: Arc<DbInner>,
    full_name: String,
    name: String,
}

impl KvSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        kv::get(&mut store, top, key)
    }

    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        self.inner.write_op(&self.full_name, |store, top| {
            Ok((kv::set(store, top, &key, &value)?, ()))
        })
    }

    pub fn delete(&self, key: &Value) -> Result<bool> {
        self.inner
            .write_op(&self.full_name, |store, top| kv::remove(store, top, key))
    }

    pub fn get_all(&self) -> Result<Vec<(Value, Value)>> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        kv::entries(&mut store, top)
    }

    pub fn get_keys(&self) -> Result<Vec<Value>> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        kv::keys(&mut store, top)
    }

    pub fn exists(&self, key: &Value) -> Result<bool> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        kv::exists(&mut store, top, key)
    }

    pub fn count(&self) -> Result<u64> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        kv::count(&mut store, top)
    }
}

// ---- doc handle -----------------------------------------------------------

#[derive(Clone)]
pub struct DocSet {
    inner: Arc<DbInner>,
    full_name: String,
    name: String,
    id_gen: Arc<dyn IdGenerator>,
}

impl DocSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the id generator for documents inserted through this
    /// handle.
    pub fn with_id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn get(&self, id: &Value) -> Result<Option<Value>> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        doc::get(&mut store, top, id)
    }

    /// Inserts a new document, assigning an id when it has none. Returns
    /// the id.
    pub fn insert(&self, document: Value) -> Result<Value> {
        let id_gen = Arc::clone(&self.id_gen);
        self.inner.write_op(&self.full_name, move |store, top| {
            let (new_top, id) = doc::insert(store, top, document, id_gen.as_ref())?;
            Ok((new_top, id))
        })
    }

    /// Replaces an existing document by id.
    pub fn update(&self, document: &Value) -> Result<()> {
        self.inner.write_op(&self.full_name, |store, top| {
            Ok((doc::update(store, top, document)?, ()))
        })
    }

    /// Inserts or replaces, depending on whether the id exists. Returns the
    /// id.
    pub fn upsert(&self, document: Value) -> Result<Value> {
        let id_gen = Arc::clone(&self.id_gen);
        self.inner.write_op(&self.full_name, move |store, top| {
            let (new_top, id) = doc::upsert(store, top, document, id_gen.as_ref())?;
            Ok((new_top, id))
        })
    }

    pub fn delete(&self, id: &Value) -> Result<bool> {
        self.inner
            .write_op(&self.full_name, |store, top| doc::remove(store, top, id))
    }

    pub fn get_all(&self) -> Result<Vec<Value>> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        doc::all(&mut store, top)
    }

    pub fn get_ids(&self) -> Result<Vec<Value>> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        doc::ids(&mut store, top)
    }

    pub fn count(&self) -> Result<u64> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        doc::count(&mut store, top)
    }

    /// Declares the set's secondary indexes; added ones are built from
    /// existing documents, removed ones dropped.
    pub fn use_indexes(&self, specs: &[IndexSpec]) -> Result<()> {
        let specs = specs.to_vec();
        self.inner.write_op(&self.full_name, move |store, top| {
            Ok((doc::use_indexes(store, top, &specs)?, ()))
        })
    }

    /// Runs a composed query, resolving matches to documents in index
    /// order.
    pub fn query(&self, query: &Query) -> Result<Vec<Value>> {
        let (top, lock) = self.inner.resolve_for_read(&self.full_name)?;
        let _set = lock.read();
        let mut store = self.inner.store.lock();
        let meta = sets::read_doc_meta(&mut store, top)?;
        let ptrs = query.execute(&mut store, &meta, top)?;
        ptrs.into_iter()
            .map(|ptr| doc::read_doc(&mut store, ptr))
            .collect()
    }

    /// Documents whose computed key under `index` equals `key`.
    pub fn find_index(&self, index: &str, key: impl Into<Value>) -> Result<Vec<Value>> {
        self.query(&Query::eq(index, key))
    }
}

// ---- snapshots ------------------------------------------------------------

/// Read-only view over a past generation's root. Readable as long as that
/// generation's pages have not been reused (named snapshots pin theirs).
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<DbInner>,
    root: u32,
}

impl Snapshot {
    pub fn revision(&self) -> Result<u32> {
        let mut store = self.inner.store.lock();
        let page = store.read(self.root)?;
        match page.as_ref() {
            crate::page::PageContent::Root { meta, .. } => Ok(meta.revision),
            other => bug!("snapshot root is a {:?} page", other.page_type()),
        }
    }

    pub fn get_kv_set(&self, name: &str) -> Result<Option<SnapshotKv>> {
        let full = sets::prefixed(KV_PREFIX, name);
        let mut store = self.inner.store.lock();
        Ok(sets::resolve_in(&mut store, self.root, &full)?.map(|top| SnapshotKv {
            inner: Arc::clone(&self.inner),
            top,
        }))
    }

    pub fn get_doc_set(&self, name: &str) -> Result<Option<SnapshotDoc>> {
        let full = sets::prefixed(DOC_PREFIX, name);
        let mut store = self.inner.store.lock();
        Ok(sets::resolve_in(&mut store, self.root, &full)?.map(|top| SnapshotDoc {
            inner: Arc::clone(&self.inner),
            top,
        }))
    }

    /// The generation before this one, if still on disk.
    pub fn prev_commit(&self) -> Result<Option<Snapshot>> {
        let mut store = self.inner.store.lock();
        let page = store.read(self.root)?;
        let prev = match page.as_ref() {
            crate::page::PageContent::Root { meta, .. } => meta.prev_root,
            _ => 0,
        };
        Ok((prev != 0).then(|| Snapshot {
            inner: Arc::clone(&self.inner),
            root: prev,
        }))
    }
}

#[derive(Clone)]
pub struct SnapshotKv {
    inner: Arc<DbInner>,
    top: u32,
}

impl SnapshotKv {
    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        let mut store = self.inner.store.lock();
        kv::get(&mut store, self.top, key)
    }

    pub fn get_all(&self) -> Result<Vec<(Value, Value)>> {
        let mut store = self.inner.store.lock();
        kv::entries(&mut store, self.top)
    }

    pub fn count(&self) -> Result<u64> {
        let mut store = self.inner.store.lock();
        kv::count(&mut store, self.top)
    }
}

#[derive(Clone)]
pub struct SnapshotDoc {
    inner: Arc<DbInner>,
    top: u32,
}

impl SnapshotDoc {
    pub fn get(&self, id: &Value) -> Result<Option<Value>> {
        let mut store = self.inner.store.lock();
        doc::get(&mut store, self.top, id)
    }

    pub fn get_all(&self) -> Result<Vec<Value>> {
        let mut store = self.inner.store.lock();
        doc::all(&mut store, self.top)
    }

    pub fn count(&self) -> Result<u64> {
        let mut store = self.inner.store.lock();
        doc::count(&mut store, self.top)
    }

    pub fn query(&self, query: &Query) -> Result<Vec<Value>> {
        let mut store = self.inner.store.lock();
        let meta = sets::read_doc_meta(&mut store, self.top)?;
        let ptrs = query.execute(&mut store, &meta, self.top)?;
        ptrs.into_iter()
            .map(|ptr| doc::read_doc(&mut store, ptr))
            .collect()
    }
}

// ---- dump / import --------------------------------------------------------

const DUMP_FORMAT: &str = "shaledb-dump";
const DUMP_VERSION: u64 = 1;

fn dump_inner(store: &mut PageStore) -> Result<serde_json::Value> {
    use serde_json::json;

    let root = store.root();
    let mut out_sets = Vec::new();

    for name in sets::list_names(store, root, KV_PREFIX)? {
        let full = sets::prefixed(KV_PREFIX, &name);
        let top = sets::resolve_in(store, root, &full)?
            .ok_or_else(|| DbError::Bug(format!("listed set {full:?} missing")))?;
        let entries: Vec<serde_json::Value> = kv::entries(store, top)?
            .into_iter()
            .map(|(k, v)| json!([k.to_json(), v.to_json()]))
            .collect();
        out_sets.push(json!({ "kind": "kv", "name": name, "entries": entries }));
    }

    for name in sets::list_names(store, root, DOC_PREFIX)? {
        let full = sets::prefixed(DOC_PREFIX, &name);
        let top = sets::resolve_in(store, root, &full)?
            .ok_or_else(|| DbError::Bug(format!("listed set {full:?} missing")))?;
        let meta = sets::read_doc_meta(store, top)?;
        let indexes: Vec<serde_json::Value> = meta
            .indexes
            .iter()
            .map(|def| json!({ "name": def.name, "path": def.path, "unique": def.unique }))
            .collect();
        let docs: Vec<serde_json::Value> =
            doc::all(store, top)?.iter().map(Value::to_json).collect();
        out_sets.push(json!({
            "kind": "doc",
            "name": name,
            "indexes": indexes,
            "docs": docs,
        }));
    }

    Ok(json!({
        "format": DUMP_FORMAT,
        "version": DUMP_VERSION,
        "sets": out_sets,
    }))
}

fn import_inner(store: &mut PageStore, dump: &serde_json::Value) -> Result<()> {
    let format = dump.get("format").and_then(|v| v.as_str());
    if format != Some(DUMP_FORMAT) {
        return Err(DbError::Invalid("not a shaledb dump".into()));
    }
    if dump.get("version").and_then(|v| v.as_u64()) != Some(DUMP_VERSION) {
        return Err(DbError::Invalid("unsupported dump version".into()));
    }
    let Some(dump_sets) = dump.get("sets").and_then(|v| v.as_array()) else {
        return Err(DbError::Invalid("dump has no sets".into()));
    };

    for set in dump_sets {
        let name = set
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DbError::Invalid("dump set has no name".into()))?;
        match set.get("kind").and_then(|v| v.as_str()) {
            Some("kv") => {
                let mut top = sets::create_kv(store, name)?;
                let full = sets::prefixed(KV_PREFIX, name);
                let entries = set
                    .get("entries")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| DbError::Invalid("kv set has no entries".into()))?;
                for pair in entries {
                    let items = pair
                        .as_array()
                        .filter(|a| a.len() == 2)
                        .ok_or_else(|| DbError::Invalid("kv entry is not a pair".into()))?;
                    let key = Value::from_json(&items[0])?;
                    let value = Value::from_json(&items[1])?;
                    let new_top = kv::set(store, top, &key, &value)?;
                    if new_top != top {
                        sets::put_name(store, &full, new_top)?;
                        top = new_top;
                    }
                }
            }
            Some("doc") => {
                let mut top = sets::create_doc(store, name)?;
                let full = sets::prefixed(DOC_PREFIX, name);
                let mut specs = Vec::new();
                if let Some(indexes) = set.get("indexes").and_then(|v| v.as_array()) {
                    for idx in indexes {
                        let (Some(idx_name), Some(path)) = (
                            idx.get("name").and_then(|v| v.as_str()),
                            idx.get("path").and_then(|v| v.as_str()),
                        ) else {
                            return Err(DbError::Invalid("malformed index definition".into()));
                        };
                        let unique =
                            idx.get("unique").and_then(|v| v.as_bool()).unwrap_or(false);
                        specs.push(IndexSpec::named(idx_name, path, unique));
                    }
                }
                let new_top = doc::use_indexes(store, top, &specs)?;
                if new_top != top {
                    sets::put_name(store, &full, new_top)?;
                    top = new_top;
                }
                let docs = set
                    .get("docs")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| DbError::Invalid("doc set has no docs".into()))?;
                for json_doc in docs {
                    let document = Value::from_json(json_doc)?;
                    let (new_top, _) = doc::insert(store, top, document, &IncrementId)?;
                    if new_top != top {
                        sets::put_name(store, &full, new_top)?;
                        top = new_top;
                    }
                }
            }
            other => {
                return Err(DbError::Invalid(format!("unknown set kind {other:?}")));
            }
        }
    }
    Ok(())
}
