//! Public error taxonomy.
//!
//! This is the only error type that escapes the crate's boundary.
//! Script-level signals (queue empty, already locked, already completed, ...)
//! stay internal to [`crate::node`]/[`crate::scripts`] and are translated
//! into the `false`/`0`/`-1` sentinel returns the public `Lock`/`Queue` API
//! uses.

use thiserror::Error;

/// Errors surfaced at the public boundary of [`crate::lock::Lock`] and
/// [`crate::queue::Queue`].
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Construction failed because fewer than `n/2 + 1` nodes were
    /// supplied, or a majority became unreachable during acquisition.
    #[error("cannot obtain lock: {0}")]
    CannotObtainLock(String),

    /// `consume` was acknowledged by zero nodes.
    #[error("failed to consume item: no node acknowledged completion")]
    ConsumeError,

    /// `size` was called with both `queued` and `taken` false.
    #[error("queue size query must request queued, taken, or both")]
    InvalidSizeQuery,
}
