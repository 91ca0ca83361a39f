//! Transactions for the depot store.
//!
//! A transaction records every object inserted while it is open in a
//! per-transaction marker store on disk. A collector treats marked objects as
//! live, so content that is mid-insert (and not yet reachable from any
//! manifest) survives a concurrent prune, even one running in another
//! process.
//!
//! # Locking
//!
//! All bookkeeping below the marker root is guarded by one lock file:
//!
//! - `begin`, `commit` and collection take the exclusive side;
//! - recording an insert takes the shared side, so writers do not block each
//!   other but a running collector sees a frozen marker state.
//!
//! # Lifecycle
//!
//! `NONE → OPEN → CLOSED`. [`TransactionManager::begin`] returns a
//! [`Transaction`] guard; committing or dropping it closes the transaction
//! and deletes its marker store on every exit path.

pub mod error;
pub mod lock;
pub mod manager;
pub mod marker;
pub mod process;

pub use error::{TxnError, TxnResult};
pub use lock::{DirectoryLock, LockMode};
pub use manager::{CollectionGuard, Transaction, TransactionId, TransactionManager};
pub use marker::{MarkerOwner, MarkerStore};
