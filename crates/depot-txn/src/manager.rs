//! Transaction manager and the scoped transaction guard.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use depot_store::{InsertHook, StoreError, StoreResult};
use depot_types::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{TxnError, TxnResult};
use crate::lock::DirectoryLock;
use crate::marker::MarkerStore;

/// Unique transaction identifier. Time-ordered, so marker directories sort by
/// creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Opens and closes transactions against one marker root.
///
/// The in-memory stack only tracks nesting inside this process; the marker
/// root lock is what coordinates with other processes.
#[derive(Debug)]
pub struct TransactionManager {
    marker_root: PathBuf,
    open: Mutex<Vec<TransactionId>>,
}

impl TransactionManager {
    pub fn new(marker_root: impl Into<PathBuf>) -> Self {
        Self {
            marker_root: marker_root.into(),
            open: Mutex::new(Vec::new()),
        }
    }

    pub fn marker_root(&self) -> &Path {
        &self.marker_root
    }

    /// Begin a transaction. Objects recorded through the returned guard are
    /// protected from collection until it is committed or dropped.
    pub fn begin(&self) -> TxnResult<Transaction<'_>> {
        let _lock = DirectoryLock::exclusive(&self.marker_root)?;
        let id = TransactionId::new();
        let store = MarkerStore::create(&self.marker_root, &id.to_string())?;
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        debug!(transaction = %id, "transaction opened");
        Ok(Transaction {
            id,
            store,
            manager: self,
            open: AtomicBool::new(true),
        })
    }

    fn end(&self, id: TransactionId, store: &MarkerStore) -> TxnResult<()> {
        let _lock = DirectoryLock::exclusive(&self.marker_root)?;
        {
            let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            match open.iter().rposition(|t| *t == id) {
                Some(pos) => {
                    if pos + 1 != open.len() {
                        warn!(
                            transaction = %id,
                            innermost = %open[open.len() - 1],
                            "transaction closed out of order"
                        );
                    }
                    open.remove(pos);
                }
                None => warn!(transaction = %id, "closing a transaction that is not on the stack"),
            }
        }
        store.delete()?;
        debug!(transaction = %id, "transaction closed");
        Ok(())
    }

    /// Transactions this manager currently has open, outermost first.
    pub fn open_transactions(&self) -> Vec<TransactionId> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delete marker stores left behind by dead processes.
    pub fn sweep_stale(&self) -> TxnResult<usize> {
        let _lock = DirectoryLock::exclusive(&self.marker_root)?;
        MarkerStore::sweep_stale(&self.marker_root)
    }

    /// Take the exclusive marker lock for a collection run.
    ///
    /// While the guard is alive no transaction can begin or end and no insert
    /// can be recorded, so [`CollectionGuard::marked`] is a stable snapshot.
    /// Stale marker stores are swept on acquisition.
    pub fn lock_for_collection(&self) -> TxnResult<CollectionGuard<'_>> {
        let lock = DirectoryLock::exclusive(&self.marker_root)?;
        let swept = MarkerStore::sweep_stale(&self.marker_root)?;
        Ok(CollectionGuard {
            _lock: lock,
            root: &self.marker_root,
            swept,
        })
    }
}

/// Exclusive hold on the marker root for the duration of a collection.
#[derive(Debug)]
pub struct CollectionGuard<'a> {
    _lock: DirectoryLock,
    root: &'a Path,
    swept: usize,
}

impl CollectionGuard<'_> {
    /// Union of the objects recorded by every open transaction, in any
    /// process sharing the marker root.
    pub fn marked(&self) -> TxnResult<BTreeSet<ObjectId>> {
        let mut marked = BTreeSet::new();
        for store in MarkerStore::list(self.root)? {
            marked.extend(store.ids()?);
        }
        Ok(marked)
    }

    /// Number of stale marker stores removed when the guard was taken.
    pub fn swept(&self) -> usize {
        self.swept
    }
}

/// An open transaction. Closing it (by [`commit`](Self::commit) or by drop)
/// deletes its marker store.
#[derive(Debug)]
pub struct Transaction<'a> {
    id: TransactionId,
    store: MarkerStore,
    manager: &'a TransactionManager,
    open: AtomicBool,
}

impl Transaction<'_> {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Record an object as inserted by this transaction.
    pub fn record(&self, object: &ObjectId) -> TxnResult<()> {
        if !self.is_open() {
            return Err(TxnError::NotOpen(self.id));
        }
        let _lock = DirectoryLock::shared(self.manager.marker_root())?;
        self.store.record(object)
    }

    pub fn record_all<'i>(&self, objects: impl IntoIterator<Item = &'i ObjectId>) -> TxnResult<()> {
        for object in objects {
            self.record(object)?;
        }
        Ok(())
    }

    /// Objects recorded so far.
    pub fn recorded(&self) -> TxnResult<BTreeSet<ObjectId>> {
        self.store.ids()
    }

    /// Close the transaction.
    pub fn commit(self) -> TxnResult<()> {
        self.close()
    }

    /// Close the transaction in place. Later records fail with
    /// [`TxnError::NotOpen`].
    pub fn close(&self) -> TxnResult<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.manager.end(self.id, &self.store)
        } else {
            Ok(())
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(transaction = %self.id, error = %e, "failed to close transaction");
        }
    }
}

impl InsertHook for Transaction<'_> {
    fn on_insert(&self, id: &ObjectId) -> StoreResult<()> {
        self.record(id).map_err(|e| StoreError::Rejected {
            id: *id,
            reason: e.to_string(),
        })
    }
}
