//! Repository handles.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use depot_manifest::FsManifestStore;
use depot_store::{FsObjectStore, ObjectStore, PooledObjectStore};
use depot_txn::{Transaction, TransactionManager};
use tempfile::TempDir;
use tracing::{debug, info, info_span, warn};

use crate::activity::{ActivityReporter, TracingReporter};
use crate::address::RepositoryAddress;
use crate::archive;
use crate::audit::AuditLog;
use crate::config::{RepositoryConfig, CONFIG_FILE};
use crate::error::{RepoError, RepoResult};
use crate::operation::{Operation, OperationContext};

/// Object store directory below the repository root.
pub const OBJECTS_DIR: &str = "objects";
/// Manifest store directory below the repository root.
pub const MANIFESTS_DIR: &str = "manifests";

/// An open repository.
///
/// All work goes through [`execute`](Self::execute). The stores are also
/// exposed directly for callers (and operations) that need the primitives.
pub struct Repository {
    address: RepositoryAddress,
    root: PathBuf,
    /// Working directory of an archive repository.
    workdir: Option<TempDir>,
    config: RepositoryConfig,
    local: FsObjectStore,
    pool: Option<FsObjectStore>,
    objects: Box<dyn ObjectStore>,
    manifests: FsManifestStore,
    transactions: TransactionManager,
    audit: AuditLog,
    reporter: Arc<dyn ActivityReporter>,
    closed: AtomicBool,
    dirty: AtomicBool,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("address", &self.address)
            .field("root", &self.root)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Create a new, empty repository at `address`.
    pub fn init(address: &RepositoryAddress, config: RepositoryConfig) -> RepoResult<Self> {
        match address {
            RepositoryAddress::Directory(root) => {
                if root.join(OBJECTS_DIR).exists() {
                    return Err(RepoError::AlreadyExists(root.clone()));
                }
                fs::create_dir_all(root)?;
                config.save(root)?;
                let repo = Self::open_at(address.clone(), root.clone(), None)?;
                info!(repository = %address, "initialized repository");
                Ok(repo)
            }
            RepositoryAddress::Archive(path) => {
                if path.exists() {
                    return Err(RepoError::AlreadyExists(path.clone()));
                }
                let workdir = archive::unpack(path)?;
                config.save(workdir.path())?;
                let root = workdir.path().to_path_buf();
                let repo = Self::open_at(address.clone(), root, Some(workdir))?;
                repo.dirty.store(true, Ordering::SeqCst);
                info!(repository = %address, "initialized archive repository");
                Ok(repo)
            }
        }
    }

    /// Open an existing repository.
    pub fn open(address: &RepositoryAddress) -> RepoResult<Self> {
        match address {
            RepositoryAddress::Directory(root) => {
                if !root.join(OBJECTS_DIR).is_dir() && !root.join(CONFIG_FILE).is_file() {
                    return Err(RepoError::NotARepository(root.clone()));
                }
                Self::open_at(address.clone(), root.clone(), None)
            }
            RepositoryAddress::Archive(path) => {
                if !path.is_file() {
                    return Err(RepoError::NotARepository(path.clone()));
                }
                let workdir = archive::unpack(path)?;
                let root = workdir.path().to_path_buf();
                Self::open_at(address.clone(), root, Some(workdir))
            }
        }
    }

    fn open_at(
        address: RepositoryAddress,
        root: PathBuf,
        workdir: Option<TempDir>,
    ) -> RepoResult<Self> {
        let config = RepositoryConfig::load(&root)?;
        // Relative paths in an archive's config resolve next to the archive,
        // not inside the throwaway working directory.
        let base = match &address {
            RepositoryAddress::Directory(dir) => dir.clone(),
            RepositoryAddress::Archive(path) => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };

        let local = FsObjectStore::open(root.join(OBJECTS_DIR))?
            .with_small_object_threshold(config.small_object_threshold);
        let pool = config
            .pool_for(&base)
            .map(|path| {
                FsObjectStore::open(path).map(|p| p.with_small_object_threshold(config.small_object_threshold))
            })
            .transpose()?;
        let objects: Box<dyn ObjectStore> = match &pool {
            Some(pool) => Box::new(PooledObjectStore::new(local.clone(), pool.clone())),
            None => Box::new(local.clone()),
        };
        let manifests = FsManifestStore::open(root.join(MANIFESTS_DIR))?;

        let transactions = TransactionManager::new(config.marker_root_for(&root));
        match transactions.sweep_stale() {
            Ok(0) => {}
            Ok(n) => info!(repository = %address, removed = n, "removed stale transaction markers"),
            Err(e) => warn!(repository = %address, error = %e, "stale marker sweep failed"),
        }

        let audit = if config.audit && workdir.is_none() {
            AuditLog::open(&root)?
        } else {
            AuditLog::disabled()
        };

        debug!(repository = %address, root = %root.display(), pooled = pool.is_some(), "opened repository");
        Ok(Self {
            address,
            root,
            workdir,
            config,
            local,
            pool,
            objects,
            manifests,
            transactions,
            audit,
            reporter: Arc::new(TracingReporter::default()),
            closed: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        })
    }

    /// Replace the activity reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ActivityReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn address(&self) -> &RepositoryAddress {
        &self.address
    }

    /// Directory the repository's files live in. For an archive this is the
    /// private working directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Object store, reading through to the pool when one is configured.
    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub fn local_objects(&self) -> &FsObjectStore {
        &self.local
    }

    pub fn pool(&self) -> Option<&FsObjectStore> {
        self.pool.as_ref()
    }

    pub fn manifests(&self) -> &FsManifestStore {
        &self.manifests
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn reporter(&self) -> &dyn ActivityReporter {
        self.reporter.as_ref()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> RepoResult<()> {
        if self.is_closed() {
            Err(RepoError::Closed(self.address.to_string()))
        } else {
            Ok(())
        }
    }

    /// Begin a transaction directly, outside of an operation.
    pub fn begin_transaction(&self) -> RepoResult<Transaction<'_>> {
        self.ensure_open()?;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(self.transactions.begin()?)
    }

    /// Run `op` in a fresh context.
    ///
    /// Mutating operations are audited first. Any failure is wrapped in
    /// [`RepoError::OperationFailed`] naming this repository; using a closed
    /// handle fails with [`RepoError::Closed`].
    pub fn execute<O: Operation>(&self, op: O) -> RepoResult<O::Output> {
        self.ensure_open()?;
        let kind = op.kind();
        let span = info_span!("operation", kind, repository = %self.address);
        let _entered = span.enter();
        let started = Instant::now();

        let result = self.run_operation(op);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(output) => {
                info!(elapsed_ms, "operation finished");
                Ok(output)
            }
            Err(e) => {
                warn!(elapsed_ms, error = %e, "operation failed");
                Err(RepoError::OperationFailed {
                    kind,
                    repository: self.address.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn run_operation<O: Operation>(&self, op: O) -> RepoResult<O::Output> {
        if !op.is_read_only() {
            self.audit.record(op.kind(), op.audit_params())?;
            self.dirty.store(true, Ordering::SeqCst);
        }
        let ctx = OperationContext::new(self)?;
        op.run(&ctx)
    }

    /// Close the handle. Archive repositories are re-packed if anything was
    /// written. Later calls to `execute` fail with [`RepoError::Closed`].
    pub fn close(&self) -> RepoResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let (Some(workdir), RepositoryAddress::Archive(path)) = (&self.workdir, &self.address) {
            if self.dirty.load(Ordering::SeqCst) {
                archive::pack(workdir.path(), path)?;
                info!(repository = %self.address, "re-packed archive");
            }
        }
        debug!(repository = %self.address, "closed repository");
        Ok(())
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(repository = %self.address, error = %e, "failed to close repository");
        }
    }
}
