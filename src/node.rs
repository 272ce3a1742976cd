//! The external interface the core consumes.
//!
//! `Node` is the abstraction boundary between this crate and a concrete
//! key-value store connection (wire protocol, pooling, retries, all out of
//! scope here). A production implementation backs this with a
//! real client library; [`crate::memory_node::InMemoryNode`] backs it with
//! an in-process map for tests and examples.

use async_trait::async_trait;
use thiserror::Error;

/// Identifies one of the nine atomic scripts the core dispatches. A real backend maps each variant to a registered Lua script
/// (`EVALSHA`); the in-memory reference node matches on the variant and
/// performs the equivalent operation directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// `l_lock(path ; client_id, expireat)`
    LLock,
    /// `l_unlock(path ; client_id)`
    LUnlock,
    /// `l_extend_lock(path ; expireat, client_id)`
    LExtendLock,
    /// `lq_get(Q ; client_id, expireat)`
    LqGet,
    /// `lq_lock(h_k, Q ; expireat, randint, client_id)`
    LqLock,
    /// `lq_extend_lock(h_k ; expireat, client_id)`
    LqExtendLock,
    /// `lq_consume(h_k, Q ; client_id)`
    LqConsume,
    /// `lq_unlock(h_k ; client_id)`
    LqUnlock,
    /// `lq_qsize(Q)`
    LqQsize,
}

/// The value a script returns on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// A plain integer return (the common case: `0`/`1` flags, counts).
    Int(i64),
    /// A string return (currently only `lq_get`'s winning handle).
    Str(String),
    /// `lq_qsize`'s `(taken, queued)` pair.
    Pair(i64, i64),
}

impl ScriptOutcome {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptOutcome::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn into_str(self) -> Option<String> {
        match self {
            ScriptOutcome::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(i64, i64)> {
        match self {
            ScriptOutcome::Pair(t, q) => Some((*t, *q)),
            _ => None,
        }
    }
}

/// Everything that can prevent a script or direct command from granting the
/// operation: the Lua-level `{err=...}` signals a real backend's scripts raise, and
/// ordinary connection/transport failures from the underlying store.
///
/// The fan-out layer treats every variant identically ("this
/// node did not grant the operation"), except where `Lock`/`Queue` inspect
/// `AlreadyCompleted` specifically to drive tombstone synchronization.
#[derive(Debug, Error)]
pub enum NodeError {
    /// `lq_get` found no candidate in the queue.
    #[error("queue empty")]
    QueueEmpty,
    /// `SETNX`/similar found the key already held by someone else.
    #[error("already locked")]
    AlreadyLocked,
    /// The key carries the permanent `"completed"` tombstone.
    #[error("already completed")]
    AlreadyCompleted,
    /// Setting the expiry failed (e.g. the key vanished between `SETNX`
    /// and `EXPIREAT`).
    #[error("invalid expireat")]
    InvalidExpireat,
    /// The lease is neither owned by the caller nor tombstoned: it expired
    /// and was reclaimed or never existed.
    #[error("expired")]
    Expired,
    /// Transport/connection failure reaching this node. Opaque because the
    /// concrete store implementation owns the error detail.
    #[error(transparent)]
    Node(#[from] anyhow::Error),
}

/// An independent key-value node. The ensemble is a fixed-size
/// list of these, constructed once and never mutated.
#[async_trait]
pub trait Node: Send + Sync {
    /// Evaluate one of the fixed atomic scripts with positional keys/args,
    /// exactly as the registry declares them.
    async fn eval(
        &self,
        script: Script,
        keys: &[&str],
        args: &[&str],
    ) -> Result<ScriptOutcome, NodeError>;

    /// `ZADD set score member`, returning the store's raw add count (`1`
    /// for a new member; some stores return `0` for a re-added existing
    /// member, see DESIGN.md on `put`'s historical semantics).
    async fn zadd(&self, set: &str, score: f64, member: &str) -> Result<i64, NodeError>;

    /// `ZCARD set`.
    async fn zcard(&self, set: &str) -> Result<i64, NodeError>;
}
