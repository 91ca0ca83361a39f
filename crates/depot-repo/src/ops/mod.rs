//! Operations offered by every repository.

mod check;
mod export;
mod import;
mod manifests;
mod prune;

pub use check::{CheckConsistency, ConsistencyReport};
pub use export::ExportManifest;
pub use import::ImportTree;
pub use manifests::{DeleteManifest, InsertManifest, ListManifests, ScanManifest, ShowManifest};
pub use prune::{Prune, PruneReport};
