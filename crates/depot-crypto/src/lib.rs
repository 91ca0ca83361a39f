//! Content hashing for the depot store.
//!
//! Object ids are plain BLAKE3 digests over an object's raw bytes, so the
//! same content always maps to the same id no matter how it was inserted
//! (buffer, stream, or file). All hashing wraps the `blake3` crate.

pub mod hasher;

pub use hasher::{ContentHasher, HashingWriter};
