//! Manifest management for the depot store.
//!
//! A manifest is the unit of versioning: an immutable `(name, tag)` key that
//! points at the root tree of a snapshot and carries a small label map.
//! "Updating" an artifact always means adding a new tag under the same name.
//!
//! # Namespaces
//!
//! Names are `/`-separated. Listing a name returns manifests with exactly
//! that name *and* every manifest below `name/`, which lets a name segment act
//! as a namespace (`product`, `product/app`, `product/app/linux`).
//!
//! # Modules
//!
//! - [`error`]: Error types for manifest operations
//! - [`manifest`]: [`Manifest`] and [`ManifestBuilder`]
//! - [`names`]: Name and tag validation
//! - [`traits`]: The [`ManifestStore`] trait
//! - [`fs`]: [`FsManifestStore`], one JSON record per key with a listing cache

pub mod error;
pub mod fs;
pub mod manifest;
pub mod names;
pub mod traits;

pub use error::{ManifestError, Result};
pub use fs::FsManifestStore;
pub use manifest::{Manifest, ManifestBuilder};
pub use names::{validate_key, validate_name, validate_tag};
pub use traits::{compare_tags, ManifestStore};
