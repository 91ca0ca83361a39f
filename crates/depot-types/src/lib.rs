//! Foundation types for the depot store.
//!
//! Every other depot crate depends on `depot-types`. The two identifiers
//! defined here are the universal keys of the system:
//!
//! - [`ObjectId`]: content-addressed identifier (BLAKE3 digest of raw bytes)
//! - [`ManifestKey`]: `(name, tag)` pair naming one immutable manifest version

pub mod error;
pub mod key;
pub mod object;

pub use error::TypeError;
pub use key::ManifestKey;
pub use object::{ObjectId, OBJECT_ID_LEN};
