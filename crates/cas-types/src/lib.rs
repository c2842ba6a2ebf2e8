//! Foundation types for the content-addressed object store.
//!
//! Every other `cas-*` crate depends on `cas-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] — Content-addressed identifier (32-byte digest, rendered as hex)
//! - [`TypeError`] — Failures when parsing identifiers from their text form

pub mod error;
pub mod object;

pub use error::TypeError;
pub use object::ObjectId;
