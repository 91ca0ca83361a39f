//! Shared object pools.
//!
//! Several repositories may read through to one pool to share content they
//! have in common. [`PoolOrganizer::reorganize`] counts, for every object,
//! how many repositories reach it; objects at or above the usage threshold
//! (or already pooled) are copied into the pool and removed from the
//! repositories' own stores. Pool objects no repository reaches any more are
//! swept. [`unpool`] does the reverse for one repository, producing a
//! self-contained copy of everything it reaches.

pub mod config;
pub mod error;
pub mod index;
pub mod organizer;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use index::ReferenceIndex;
pub use organizer::{unpool, CollectReferences, PoolOrganizer, ReorganizeReport, UnpoolReport};
