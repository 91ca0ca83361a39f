use std::collections::{BTreeMap, BTreeSet};

use depot_manifest::ManifestError;
use depot_store::{ObjectStore, StoreError};
use depot_types::{ManifestKey, ObjectId};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::RepoResult;
use crate::objects::Reachability;
use crate::operation::{Operation, OperationContext};

/// Verify every object reachable from every manifest.
///
/// Missing objects and objects whose content no longer matches their id are
/// reported, together with the manifests they make incomplete. With `repair`
/// set, damaged local objects are deleted so a later import of the same
/// content can restore them.
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckConsistency {
    pub repair: bool,
}

/// Outcome of a [`CheckConsistency`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub manifests: usize,
    /// Distinct objects verified.
    pub verified: usize,
    pub missing: BTreeSet<ObjectId>,
    pub damaged: BTreeSet<ObjectId>,
    /// Manifests that reach a missing or damaged object.
    pub incomplete: BTreeSet<ManifestKey>,
    /// Damaged objects removed by repair.
    pub repaired: Vec<ObjectId>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.damaged.is_empty()
    }
}

impl Operation for CheckConsistency {
    type Output = ConsistencyReport;

    fn kind(&self) -> &'static str {
        "fsck"
    }

    fn is_read_only(&self) -> bool {
        !self.repair
    }

    fn audit_params(&self) -> Value {
        json!({ "repair": self.repair })
    }

    fn run(self, ctx: &OperationContext<'_>) -> RepoResult<ConsistencyReport> {
        let manager = ctx.object_manager();
        let manifests = ctx.manifests();
        manifests.refresh_listing();

        let mut walked: BTreeMap<ManifestKey, Reachability> = BTreeMap::new();
        for key in manifests.list_all()? {
            ctx.reporter().check_cancelled()?;
            let manifest = match manifests.get(&key) {
                Ok(manifest) => manifest,
                Err(ManifestError::NotFound(_)) => {
                    warn!(manifest = %key, "manifest vanished during check, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let mut reach = Reachability::default();
            manager.walk(manifest.root(), &mut reach)?;
            walked.insert(key, reach);
        }

        let mut report = ConsistencyReport {
            manifests: walked.len(),
            ..Default::default()
        };
        let mut present = BTreeSet::new();
        for reach in walked.values() {
            present.extend(reach.present.iter().copied());
            report.missing.extend(reach.missing.iter().copied());
            report.damaged.extend(reach.unreadable.iter().copied());
        }
        report.verified = present.len();

        let objects = ctx.objects();
        let outcomes = ctx.workers().install(|| {
            present
                .par_iter()
                .map(|id| match objects.verify(id) {
                    Ok(()) => Ok(None),
                    Err(StoreError::NotFound(_)) => Ok(Some((*id, false))),
                    Err(e) if e.is_corruption() => {
                        warn!(object = %id, error = %e, "damaged object");
                        Ok(Some((*id, true)))
                    }
                    Err(e) => Err(e),
                })
                .collect::<Result<Vec<_>, StoreError>>()
        })?;
        for (id, damaged) in outcomes.into_iter().flatten() {
            if damaged {
                report.damaged.insert(id);
            } else {
                report.missing.insert(id);
            }
        }

        for (key, reach) in &walked {
            let broken = reach
                .all()
                .iter()
                .any(|id| report.missing.contains(id) || report.damaged.contains(id));
            if broken {
                report.incomplete.insert(key.clone());
            }
        }

        if self.repair && !report.damaged.is_empty() {
            let damaged: Vec<ObjectId> = report.damaged.iter().copied().collect();
            let removal = ctx.local_objects().remove_all(&damaged);
            report.repaired = removal.removed;
        }

        info!(
            manifests = report.manifests,
            verified = report.verified,
            missing = report.missing.len(),
            damaged = report.damaged.len(),
            "consistency check finished"
        );
        Ok(report)
    }
}
