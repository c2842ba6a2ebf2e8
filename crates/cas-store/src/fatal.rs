//! Terminal path for broken internal invariants.
//!
//! Ordinary failures travel as [`StoreError`](crate::StoreError) values.
//! This module is for conditions no caller can correct, such as a batch
//! retrieval worker dying mid-run: the process is aborted rather than
//! handing back a batch whose slots may be silently unset.

use std::fmt;

/// Log `message` and abort the process.
#[cold]
pub fn invariant_violation(message: fmt::Arguments<'_>) -> ! {
    tracing::error!(detail = %message, "invariant violation, aborting");
    eprintln!("cas-store: invariant violation: {message}");
    std::process::abort()
}
