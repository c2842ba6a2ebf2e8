//! Content digests for the object store.
//!
//! The digest is the single source of truth for "is this the content I asked
//! for": it names objects on write and validates them on read. It wraps
//! BLAKE3; there is no custom cryptography here.

pub mod hasher;

pub use hasher::{digest, ContentHasher};
