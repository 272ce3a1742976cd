//! Fan-out executor.
//!
//! Dispatches one future per node concurrently and yields `(index, outcome)`
//! pairs in completion order, preserving the one-to-one correspondence with
//! the input slice via the index. Never short-circuits on a per-node error;
//! the caller decides what a failure means.

use std::future::Future;

use futures_util::stream::{BoxStream, FuturesUnordered, StreamExt};

/// Caller-injectable concurrency strategy ("the caller may inject a
/// custom fan-out"). `ConcurrentFanOut` is the production default;
/// `SequentialFanOut` exists for tests that want deterministic ordering.
pub trait FanOut: Send + Sync {
    /// Run each future in `futures`, tagging result `i` with its original
    /// index, and return a stream that yields tagged results as they
    /// complete (first-ready first).
    fn spawn_all<T, Fut>(&self, futures: Vec<Fut>) -> BoxStream<'static, (usize, T)>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static;
}

/// Default fan-out: one `tokio` task per node, so that node I/O for
/// different nodes genuinely runs in parallel on the multi-thread runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcurrentFanOut;

impl FanOut for ConcurrentFanOut {
    fn spawn_all<T, Fut>(&self, futures: Vec<Fut>) -> BoxStream<'static, (usize, T)>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let unordered: FuturesUnordered<_> = futures
            .into_iter()
            .enumerate()
            .map(|(i, fut)| async move {
                let value = tokio::spawn(fut)
                    .await
                    .expect("fan-out task panicked");
                (i, value)
            })
            .collect();
        unordered.boxed()
    }
}

/// Sequential fan-out: awaits each future in order on the calling task.
/// Useful for tests that need fixed, reproducible interleaving; not
/// parallel, so it should not be used where "parallelism ≥
/// number of nodes" contract matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialFanOut;

impl FanOut for SequentialFanOut {
    fn spawn_all<T, Fut>(&self, futures: Vec<Fut>) -> BoxStream<'static, (usize, T)>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let stream = futures_util::stream::iter(futures.into_iter().enumerate())
            .then(|(i, fut)| async move { (i, fut.await) });
        stream.boxed()
    }
}
