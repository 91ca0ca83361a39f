//! Pool reorganization and unpooling.

use std::collections::BTreeMap;

use depot_repo::{Operation, OperationContext, Reachability, RepoResult, Repository};
use depot_store::{FsObjectStore, NoHook, ObjectStore, RemovalReport, StoreError};
use depot_txn::DirectoryLock;
use depot_types::ObjectId;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::index::ReferenceIndex;

/// Reads every object reachable from a repository's manifests.
#[derive(Clone, Copy, Debug, Default)]
pub struct CollectReferences;

impl Operation for CollectReferences {
    type Output = Reachability;

    fn kind(&self) -> &'static str {
        "collect-references"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<Reachability> {
        ctx.object_manager().reachable_from_manifests()
    }
}

/// Outcome of a reorganization run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReorganizeReport {
    pub repositories: usize,
    /// Distinct objects referenced by any repository.
    pub indexed: usize,
    /// Objects copied into the pool by this run.
    pub promoted: Vec<ObjectId>,
    /// Qualifying objects that were already pooled.
    pub already_pooled: usize,
    /// Qualifying objects no repository could supply.
    pub unavailable: Vec<ObjectId>,
    /// Local copies removed because the pool now serves them.
    pub local_removed: usize,
    pub local_failed: Vec<(ObjectId, String)>,
    /// Unreferenced objects deleted from the pool.
    pub swept: Vec<ObjectId>,
    pub sweep_failed: Vec<(ObjectId, String)>,
}

/// An object that qualified for the pool.
struct Candidate {
    id: ObjectId,
    referrers: Vec<u32>,
    pooled: bool,
}

/// Moves widely shared objects into a pool and sweeps the pool.
///
/// Runs on one pool are serialized by an exclusive lock on the pool
/// directory, held from indexing until the index is discarded. Must be given every repository that uses the pool: an object referenced
/// only by a repository left out is considered unreferenced and swept.
pub struct PoolOrganizer<'a> {
    pool: &'a FsObjectStore,
    repositories: &'a [&'a Repository],
    config: PoolConfig,
    workers: ThreadPool,
}

impl<'a> PoolOrganizer<'a> {
    pub fn new(
        pool: &'a FsObjectStore,
        repositories: &'a [&'a Repository],
        config: PoolConfig,
    ) -> PoolResult<Self> {
        for repo in repositories {
            let uses_pool = repo.pool().is_some_and(|p| same_store(p, pool));
            if !uses_pool {
                return Err(PoolError::NotPooled(repo.address().to_string()));
            }
        }
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("depot-pool-{i}"))
            .build()
            .map_err(|e| PoolError::WorkerPool(e.to_string()))?;
        Ok(Self {
            pool,
            repositories,
            config,
            workers,
        })
    }

    /// Run one reorganization.
    pub fn reorganize(&self) -> PoolResult<ReorganizeReport> {
        let span = info_span!("reorganize", pool = %self.pool.root().display());
        let _entered = span.enter();

        let _lock = DirectoryLock::exclusive(self.pool.root())?;
        // Dropped on every exit path (before the lock), which deletes `.refdb/`.
        let index = ReferenceIndex::create(self.pool.root())?;
        let mut report = ReorganizeReport {
            repositories: self.repositories.len(),
            ..Default::default()
        };

        for (n, repo) in self.repositories.iter().enumerate() {
            let reach = repo.execute(CollectReferences)?;
            if !reach.missing.is_empty() {
                warn!(
                    repository = %repo.address(),
                    missing = reach.missing.len(),
                    "repository references missing objects"
                );
            }
            let added = index.add_referrer(n as u32, reach.all())?;
            debug!(repository = %repo.address(), objects = reach.present.len(), added, "indexed repository");
        }

        let batch = self.config.removal_batch_size.max(1);
        let mut pending: Vec<Candidate> = Vec::with_capacity(batch);
        index.visit(|id, referrers| {
            report.indexed += 1;
            let pooled = self.pool.exists(&id)?;
            if pooled || referrers.len() >= self.config.usage_threshold {
                pending.push(Candidate {
                    id,
                    referrers,
                    pooled,
                });
            }
            if pending.len() >= batch {
                self.promote(std::mem::take(&mut pending), &mut report)?;
            }
            Ok(())
        })?;
        self.promote(pending, &mut report)?;

        self.sweep(&index, &mut report)?;

        info!(
            indexed = report.indexed,
            promoted = report.promoted.len(),
            local_removed = report.local_removed,
            swept = report.swept.len(),
            "reorganization finished"
        );
        Ok(report)
    }

    /// Copy not-yet-pooled candidates into the pool, then remove every
    /// pooled candidate from its referrers' local stores.
    fn promote(&self, batch: Vec<Candidate>, report: &mut ReorganizeReport) -> PoolResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let copies = self.workers.install(|| {
            batch
                .par_iter()
                .filter(|c| !c.pooled)
                .map(|c| Ok((c.id, self.copy_into_pool(c)?)))
                .collect::<PoolResult<BTreeMap<ObjectId, bool>>>()
        })?;

        let mut removals: BTreeMap<u32, Vec<ObjectId>> = BTreeMap::new();
        for candidate in &batch {
            if candidate.pooled {
                report.already_pooled += 1;
            } else if copies.get(&candidate.id) == Some(&true) {
                report.promoted.push(candidate.id);
            } else {
                report.unavailable.push(candidate.id);
                continue;
            }
            for r in &candidate.referrers {
                removals.entry(*r).or_default().push(candidate.id);
            }
        }

        for (n, ids) in removals {
            let repo = self.repositories[n as usize];
            let removal = repo.local_objects().remove_all(&ids);
            self.absorb_local(removal, report);
        }
        Ok(())
    }

    fn absorb_local(&self, removal: RemovalReport, report: &mut ReorganizeReport) {
        report.local_removed += removal.removed.len();
        report.local_failed.extend(removal.failed);
    }

    /// Copy one object from the first referrer holding it locally. Returns
    /// `false` if no referrer has a copy.
    fn copy_into_pool(&self, candidate: &Candidate) -> PoolResult<bool> {
        for r in &candidate.referrers {
            let repo = self.repositories[*r as usize];
            let local = repo.local_objects();
            let mut reader = match local.open(&candidate.id) {
                Ok(reader) => reader,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            // Verified before publishing: a bad copy never reaches the pool.
            self.pool
                .insert_verified(&mut reader, &candidate.id, &NoHook)
                .map_err(|e| copy_error(e, repo))?;
            debug!(object = %candidate.id, from = %repo.address(), "copied into pool");
            return Ok(true);
        }
        warn!(object = %candidate.id, "no repository holds a copy, leaving it where it is");
        Ok(false)
    }

    /// Delete pool objects no repository references.
    fn sweep(&self, index: &ReferenceIndex, report: &mut ReorganizeReport) -> PoolResult<()> {
        let mut unreferenced = Vec::new();
        for id in self.pool.list()? {
            if !index.contains(&id)? {
                unreferenced.push(id);
            }
        }
        for chunk in unreferenced.chunks(self.config.removal_batch_size.max(1)) {
            let removal = self.pool.remove_all(chunk);
            report.swept.extend(removal.removed);
            report.sweep_failed.extend(removal.failed);
        }
        Ok(())
    }
}

fn copy_error(err: StoreError, source: &Repository) -> PoolError {
    match err {
        StoreError::Corrupt { id, computed } => PoolError::CopyMismatch {
            id,
            computed,
            repository: source.address().to_string(),
        },
        other => other.into(),
    }
}

fn same_store(a: &FsObjectStore, b: &FsObjectStore) -> bool {
    match (a.root().canonicalize(), b.root().canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.root() == b.root(),
    }
}

/// Outcome of [`unpool`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UnpoolReport {
    pub copied: usize,
    /// Objects the target already held.
    pub present: usize,
    /// Reachable objects neither the repository nor its pool could supply.
    pub missing: Vec<ObjectId>,
}

/// Copy every object reachable from `repository`'s manifests into `target`,
/// reading through the pool. Neither the repository nor the pool is
/// modified.
pub fn unpool(repository: &Repository, target: &dyn ObjectStore) -> PoolResult<UnpoolReport> {
    let reach = repository.execute(CollectReferences)?;
    let source = repository.objects();
    let mut report = UnpoolReport {
        missing: reach.missing.iter().copied().collect(),
        ..Default::default()
    };
    for id in &reach.present {
        if target.exists(id)? {
            report.present += 1;
            continue;
        }
        let mut reader = match source.open(id) {
            Ok(reader) => reader,
            Err(StoreError::NotFound(_)) => {
                report.missing.push(*id);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if target
            .insert_verified(&mut reader, id, &NoHook)
            .map_err(|e| copy_error(e, repository))?
        {
            report.copied += 1;
        } else {
            report.present += 1;
        }
    }
    info!(
        repository = %repository.address(),
        copied = report.copied,
        missing = report.missing.len(),
        "unpooled repository"
    );
    Ok(report)
}
