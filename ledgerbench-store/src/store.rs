//! In-memory document store with optimistic concurrency control.
//!
//! All access goes through a [`Transaction`]. A transaction records the version of every
//! document it reads and the result of every key lookup, and buffers its writes. On
//! [`commit`](Transaction::commit), the store verifies under its lock that none of those reads
//! has been invalidated by a concurrent commit and then applies all writes at once. If any read
//! is stale, the commit fails with [`StoreError::Conflict`] and nothing is written.
//!
//! The store is [`Clone`] so that tests can hold a handle for direct inspection while a
//! [`Service`](crate::Service) owns another.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Result, StoreError};
use crate::model::{DocumentId, Entity, Record, Table};

/// The default maximum number of documents written by a single transaction.
pub const DEFAULT_MAX_WRITES: usize = 16_000;

/// Per-transaction resource limits.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    /// Maximum number of documents a transaction may insert, patch or delete.
    pub max_writes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_writes: DEFAULT_MAX_WRITES,
        }
    }
}

/// A document together with its identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Doc<E> {
    pub id: DocumentId,
    pub value: E,
}

#[derive(Clone, Debug)]
struct Versioned {
    version: u64,
    record: Record,
}

#[derive(Debug, Default)]
struct TableData {
    rows: BTreeMap<DocumentId, Versioned>,
    /// Unique index over [`Record::key`].
    index: HashMap<i64, DocumentId>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<Table, TableData>,
    /// Incremented on every commit, used as the version of documents written by it.
    version: u64,
}

impl State {
    fn table(&self, table: Table) -> Option<&TableData> {
        self.tables.get(&table)
    }

    fn row(&self, table: Table, id: DocumentId) -> Option<&Versioned> {
        self.table(table).and_then(|data| data.rows.get(&id))
    }

    fn lookup(&self, table: Table, key: i64) -> Option<DocumentId> {
        self.table(table)
            .and_then(|data| data.index.get(&key))
            .copied()
    }
}

/// An in-memory, transactional document store.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    next_id: Arc<AtomicU64>,
    limits: Limits,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with default limits.
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    /// Creates an empty store with the given limits.
    pub fn with_limits(limits: Limits) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            limits,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new transaction.
    pub fn begin(&self) -> Transaction {
        Transaction {
            store: self.clone(),
            reads: HashMap::new(),
            lookups: HashMap::new(),
            writes: BTreeMap::new(),
            pending_keys: HashMap::new(),
        }
    }

    /// Runs `f` in a new transaction and commits it if `f` succeeds.
    ///
    /// Nothing is written if either `f` or the commit fails.
    pub fn transact<T, E>(&self, f: impl FnOnce(&mut Transaction) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut tx = self.begin();
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Returns the number of committed documents in a table.
    pub fn count(&self, table: Table) -> usize {
        self.lock().table(table).map_or(0, |data| data.rows.len())
    }

    /// Returns the committed document with the given key, bypassing transactions.
    pub fn get<E: Entity>(&self, key: i64) -> Option<Doc<E>> {
        let state = self.lock();
        let id = state.lookup(E::TABLE, key)?;
        let row = state.row(E::TABLE, id)?;
        E::from_record(&row.record).map(|value| Doc { id, value })
    }

    fn allocate_id(&self) -> DocumentId {
        DocumentId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Debug)]
enum Write {
    Insert(Record),
    Patch(Record),
    Delete(Table),
}

/// A pending unit of work against a [`MemoryStore`].
///
/// Reads observe committed state plus this transaction's own writes. Dropping a transaction
/// without committing discards its writes.
#[derive(Debug)]
pub struct Transaction {
    store: MemoryStore,
    /// Documents read from committed state, with the version observed.
    reads: HashMap<DocumentId, (Table, u64)>,
    /// Index lookups against committed state, with the document they resolved to.
    lookups: HashMap<(Table, i64), Option<DocumentId>>,
    writes: BTreeMap<DocumentId, Write>,
    /// Keys of documents inserted by this transaction.
    pending_keys: HashMap<(Table, i64), DocumentId>,
}

impl Transaction {
    /// Returns the number of documents written so far.
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Looks up a document through its table's unique index.
    pub fn get_by_key<E: Entity>(&mut self, key: i64) -> Option<Doc<E>> {
        if let Some(&id) = self.pending_keys.get(&(E::TABLE, key)) {
            return self.get(id);
        }

        let id = {
            let state = self.store.lock();
            let id = state.lookup(E::TABLE, key);
            self.lookups.entry((E::TABLE, key)).or_insert(id);
            id
        };

        id.and_then(|id| self.get(id))
    }

    /// Reads a document by its identifier.
    pub fn get<E: Entity>(&mut self, id: DocumentId) -> Option<Doc<E>> {
        let record = match self.writes.get(&id) {
            Some(Write::Insert(record) | Write::Patch(record)) => record.clone(),
            Some(Write::Delete(_)) => return None,
            None => {
                let state = self.store.lock();
                let row = state.row(E::TABLE, id)?;
                self.reads.entry(id).or_insert((E::TABLE, row.version));
                row.record.clone()
            }
        };

        E::from_record(&record).map(|value| Doc { id, value })
    }

    /// Reads up to `limit` documents of a table in identifier order.
    pub fn scan<E: Entity>(&mut self, limit: usize) -> Vec<Doc<E>> {
        let mut docs = Vec::new();

        {
            let state = self.store.lock();
            let rows = state
                .table(E::TABLE)
                .into_iter()
                .flat_map(|data| data.rows.iter());

            for (&id, row) in rows {
                if docs.len() >= limit {
                    break;
                }
                let record = match self.writes.get(&id) {
                    Some(Write::Delete(_)) => continue,
                    Some(Write::Patch(record) | Write::Insert(record)) => record,
                    None => &row.record,
                };
                self.reads.entry(id).or_insert((E::TABLE, row.version));
                if let Some(value) = E::from_record(record) {
                    docs.push(Doc { id, value });
                }
            }
        }

        for (&id, write) in &self.writes {
            if docs.len() >= limit {
                break;
            }
            if let Write::Insert(record) = write
                && let Some(value) = E::from_record(record)
            {
                docs.push(Doc { id, value });
            }
        }

        docs
    }

    fn reserve_write(&self, id: DocumentId) -> Result<()> {
        let limit = self.store.limits.max_writes;
        if !self.writes.contains_key(&id) && self.writes.len() >= limit {
            return Err(StoreError::TooManyWrites { limit });
        }
        Ok(())
    }

    /// Marks a committed document as read so that concurrent changes to it cause a conflict.
    fn observe(&mut self, table: Table, id: DocumentId) -> Result<()> {
        if self.reads.contains_key(&id) {
            return Ok(());
        }
        let state = self.store.lock();
        let row = state
            .row(table, id)
            .ok_or(StoreError::MissingDocument { table, id })?;
        self.reads.insert(id, (table, row.version));
        Ok(())
    }

    /// Inserts a new document and returns its store-assigned identifier.
    pub fn insert<E: Entity>(&mut self, value: E) -> Result<DocumentId> {
        let id = self.store.allocate_id();
        self.reserve_write(id)?;

        let record = value.into_record();
        if let Some(key) = record.key() {
            if self.pending_keys.contains_key(&(E::TABLE, key)) {
                return Err(StoreError::DuplicateKey {
                    table: E::TABLE,
                    key,
                });
            }
            self.pending_keys.insert((E::TABLE, key), id);
        }

        self.writes.insert(id, Write::Insert(record));
        Ok(id)
    }

    /// Replaces the contents of an existing document.
    pub fn patch<E: Entity>(&mut self, id: DocumentId, value: E) -> Result<()> {
        self.reserve_write(id)?;
        let record = value.into_record();

        match self.writes.get(&id) {
            Some(Write::Insert(existing)) => {
                if existing.table() != E::TABLE {
                    return Err(StoreError::TableMismatch {
                        id,
                        expected: existing.table(),
                        actual: E::TABLE,
                    });
                }
                self.writes.insert(id, Write::Insert(record));
            }
            Some(Write::Delete(table)) => {
                return Err(StoreError::MissingDocument { table: *table, id });
            }
            Some(Write::Patch(_)) | None => {
                self.observe(E::TABLE, id)?;
                self.writes.insert(id, Write::Patch(record));
            }
        }

        Ok(())
    }

    /// Deletes a document.
    pub fn delete(&mut self, table: Table, id: DocumentId) -> Result<()> {
        self.reserve_write(id)?;

        match self.writes.remove(&id) {
            Some(Write::Insert(record)) => {
                if let Some(key) = record.key() {
                    self.pending_keys.remove(&(table, key));
                }
            }
            Some(Write::Delete(_)) => {
                self.writes.insert(id, Write::Delete(table));
                return Err(StoreError::MissingDocument { table, id });
            }
            Some(Write::Patch(_)) | None => {
                self.observe(table, id)?;
                self.writes.insert(id, Write::Delete(table));
            }
        }

        Ok(())
    }

    /// Validates all reads and atomically applies all writes.
    pub fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }

        let mut state = self.store.lock();

        for (&id, &(table, version)) in &self.reads {
            if state.row(table, id).map(|row| row.version) != Some(version) {
                return Err(StoreError::Conflict { table });
            }
        }
        for (&(table, key), &observed) in &self.lookups {
            if state.lookup(table, key) != observed {
                return Err(StoreError::Conflict { table });
            }
        }
        for (&(table, key), _) in &self.pending_keys {
            if state.lookup(table, key).is_some() {
                return Err(StoreError::DuplicateKey { table, key });
            }
        }

        state.version += 1;
        let version = state.version;

        for (id, write) in self.writes {
            match write {
                Write::Insert(record) | Write::Patch(record) => {
                    let data = state.tables.entry(record.table()).or_default();
                    let previous = data.rows.insert(
                        id,
                        Versioned {
                            version,
                            record: record.clone(),
                        },
                    );
                    if let Some(key) = previous.and_then(|row| row.record.key()) {
                        data.index.remove(&key);
                    }
                    if let Some(key) = record.key() {
                        data.index.insert(key, id);
                    }
                }
                Write::Delete(table) => {
                    let data = state.tables.entry(table).or_default();
                    if let Some(key) = data.rows.remove(&id).and_then(|row| row.record.key()) {
                        data.index.remove(&key);
                    }
                }
            }
        }

        Ok(())
    }
}
