use depot_store::{ObjectStore, RemovalReport, StoreError};
use depot_types::ObjectId;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::RepoResult;
use crate::operation::{Operation, OperationContext};

/// Remove every local object that no manifest reaches and no open
/// transaction has recorded.
///
/// Local objects are listed before the marker lock is taken: anything
/// published after the listing is simply not a candidate, and anything
/// published before it was recorded by its transaction first. The exclusive
/// marker lock is held for the rest of the run, so no transaction can begin,
/// record or end while reachability is computed and garbage removed.
#[derive(Clone, Copy, Debug, Default)]
pub struct Prune {
    /// Report what would be removed without removing it.
    pub dry_run: bool,
}

/// Outcome of a [`Prune`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Local objects considered.
    pub examined: usize,
    /// Objects reachable from manifests.
    pub reachable: usize,
    /// Objects protected by open transactions.
    pub marked: usize,
    /// Stale marker stores removed before collecting.
    pub stale_markers: usize,
    /// Objects found to be garbage.
    pub garbage: Vec<ObjectId>,
    /// Garbage actually deleted.
    pub removed: Vec<ObjectId>,
    /// Garbage that could not be deleted this pass.
    pub failed: Vec<(ObjectId, String)>,
}

impl Operation for Prune {
    type Output = PruneReport;

    fn kind(&self) -> &'static str {
        "prune"
    }

    fn is_read_only(&self) -> bool {
        self.dry_run
    }

    fn audit_params(&self) -> Value {
        json!({ "dry_run": self.dry_run })
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<PruneReport> {
        let local = ctx.local_objects();
        let candidates = local.list()?;

        let guard = ctx.transactions().lock_for_collection()?;
        let marked = guard.marked()?;
        let reach = ctx.object_manager().reachable_from_manifests()?;
        if let Some(id) = reach.unreadable.first() {
            return Err(StoreError::InvalidObject {
                id: *id,
                reason: "tree cannot be decoded; run a consistency check before pruning".into(),
            }
            .into());
        }

        let garbage: Vec<ObjectId> = candidates
            .iter()
            .filter(|id| !reach.contains(id) && !marked.contains(id))
            .copied()
            .collect();
        debug!(
            examined = candidates.len(),
            garbage = garbage.len(),
            marked = marked.len(),
            "computed garbage"
        );
        let removal = if self.dry_run {
            RemovalReport::default()
        } else {
            local.remove_all(&garbage)
        };
        let report = PruneReport {
            examined: candidates.len(),
            reachable: reach.present.len(),
            marked: marked.len(),
            stale_markers: guard.swept(),
            garbage,
            removed: removal.removed,
            failed: removal.failed,
        };
        drop(guard);

        info!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            dry_run = self.dry_run,
            "prune finished"
        );
        Ok(report)
    }
}
