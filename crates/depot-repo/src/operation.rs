//! Units of work and the scoped context they run in.

use depot_manifest::ManifestStore;
use depot_store::{FsObjectStore, ObjectStore};
use depot_txn::{Transaction, TransactionManager};
use rayon::ThreadPool;
use serde_json::Value;

use crate::activity::ActivityReporter;
use crate::config::RepositoryConfig;
use crate::error::{RepoError, RepoResult};
use crate::objects::ObjectManager;
use crate::repository::Repository;

/// A unit of work executed against a repository through
/// [`Repository::execute`].
///
/// An operation is a plain struct holding its parameters; `run` receives the
/// stores and worker pool explicitly.
pub trait Operation {
    type Output;

    /// Short name used for spans, audit records and error messages.
    fn kind(&self) -> &'static str;

    /// Read-only operations are not audited and do not mark an archive
    /// repository for re-packing.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Parameters written to the audit log.
    fn audit_params(&self) -> Value {
        Value::Null
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<Self::Output>;
}

/// Everything an operation may touch. Dropped (and its worker pool shut
/// down) when the operation returns, whatever the outcome.
pub struct OperationContext<'a> {
    repository: &'a Repository,
    workers: ThreadPool,
}

impl<'a> OperationContext<'a> {
    pub(crate) fn new(repository: &'a Repository) -> RepoResult<Self> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(repository.config().worker_threads.max(1))
            .thread_name(|i| format!("depot-worker-{i}"))
            .build()
            .map_err(|e| RepoError::WorkerPool(e.to_string()))?;
        Ok(Self {
            repository,
            workers,
        })
    }

    pub fn repository(&self) -> &'a Repository {
        self.repository
    }

    pub fn config(&self) -> &'a RepositoryConfig {
        self.repository.config()
    }

    /// The repository's object store, reading through to the pool if one is
    /// configured.
    pub fn objects(&self) -> &'a dyn ObjectStore {
        self.repository.objects()
    }

    /// Only the objects stored in this repository itself.
    pub fn local_objects(&self) -> &'a FsObjectStore {
        self.repository.local_objects()
    }

    pub fn manifests(&self) -> &'a dyn ManifestStore {
        self.repository.manifests()
    }

    pub fn reporter(&self) -> &'a dyn ActivityReporter {
        self.repository.reporter()
    }

    pub fn workers(&self) -> &ThreadPool {
        &self.workers
    }

    pub fn transactions(&self) -> &'a TransactionManager {
        self.repository.transactions()
    }

    pub fn begin_transaction(&self) -> RepoResult<Transaction<'a>> {
        Ok(self.transactions().begin()?)
    }

    pub fn object_manager(&self) -> ObjectManager<'_> {
        ObjectManager::new(self.objects(), self.manifests(), &self.workers, self.reporter())
    }
}
