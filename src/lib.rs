//! A majority-quorum distributed lock and locking priority queue over a
//! pluggable ensemble of independent key-value nodes, modeled on the
//! Redlock algorithm.
//!
//! The ensemble is treated as `N` independent stores that never
//! communicate with each other. Every operation fans out to all (or a
//! subset of) the connected nodes concurrently and decides success purely
//! by counting, never by node identity or response order. A caller
//! implements [`Node`] once per backend (a real client library, or the
//! bundled [`memory_node::InMemoryNode`] for tests) and gets both [`Lock`]
//! and [`Queue`] for free.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use quorum_queue::{ClientId, ConcurrentFanOut, Extend, InMemoryNode, Lock};
//!
//! # async fn example() {
//! let nodes: Vec<_> = (0..3).map(|_| Arc::new(InMemoryNode::new())).collect();
//! let lock = Lock::new(
//!     nodes,
//!     3,
//!     Duration::from_secs(10),
//!     Duration::ZERO,
//!     ClientId::generate(&mut rand::rng()),
//!     ConcurrentFanOut,
//! )
//! .expect("enough nodes connected for a majority");
//!
//! if let Some(_expireat) = lock.lock("orders/42", Extend::Yes).await {
//!     // critical section
//!     lock.unlock("orders/42").await;
//! }
//! # }
//! ```

pub mod error;
pub mod extender;
pub mod fanout;
pub mod handle;
pub mod lock;
pub mod memory_node;
pub mod node;
pub mod queue;
pub mod scripts;
pub mod time;

pub use error::CoordinationError;
pub use extender::{Extender, ExtendOp, FailureCallback};
pub use fanout::{ConcurrentFanOut, FanOut, SequentialFanOut};
pub use handle::{ClientId, Handle};
pub use lock::{Extend, Lock};
pub use memory_node::InMemoryNode;
pub use node::{Node, NodeError, Script, ScriptOutcome};
pub use queue::{ExtendOutcome, Queue};
pub use time::Expireat;
