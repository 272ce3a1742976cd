//! Background extender.
//!
//! A recurring timer that re-runs an extend operation every polling
//! interval until cancelled or the operation reports failure: spawn a
//! `tokio` task looping on `tokio::time::interval`, hand the caller a
//! handle it can use to stop the task. Cancellation here additionally
//! guarantees a happens-before property: once
//! `cancel().await` returns, no further extend call will start.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A boxed async extend operation: given the locked key, attempt to extend
/// the lease and report whether it is still held.
pub type ExtendOp = Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Invoked at most once, on a fresh task outside any node I/O path, if the
/// extend operation ever reports failure.
pub type FailureCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Handle to a running background extender. Exactly one should exist per
/// acquired key ("no two extender instances for the same key run
/// concurrently", enforced by `Lock`/`Queue` holding at most one `Extender`
/// per key at a time).
pub struct Extender {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl Extender {
    /// Arm a recurring extender for `key`. The first extend attempt happens
    /// after `polling_interval`, not immediately, since the lease was just
    /// acquired and is fresh.
    pub fn spawn(
        key: String,
        extend_op: ExtendOp,
        polling_interval: Duration,
        failure_cb: Option<FailureCallback>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run(key, extend_op, polling_interval, failure_cb, task_cancel).await;
        });
        Extender { cancel, handle }
    }

    /// Cancel the extender and wait for the task to fully stop. After this
    /// resolves, `extend_op` is guaranteed not to be invoked again for this
    /// key.
    pub async fn cancel(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn run(
    key: String,
    extend_op: ExtendOp,
    polling_interval: Duration,
    failure_cb: Option<FailureCallback>,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(polling_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.tick().await; // consume the immediate first tick; the first real
                       // extend happens one polling_interval after arming.

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                if cancel.is_cancelled() {
                    break;
                }
                if !extend_op(key.clone()).await {
                    if let Some(cb) = failure_cb.clone() {
                        let key = key.clone();
                        tokio::spawn(async move { cb(key) });
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn extender_rearms_while_extend_op_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let op: ExtendOp = Arc::new(move |_key| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            })
        });

        let extender = Extender::spawn("p".to_string(), op, Duration::from_millis(10), None);
        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;
        assert!(calls.load(Ordering::SeqCst) >= 2);
        extender.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn extender_invokes_failure_callback_exactly_once_and_stops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fails = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let op: ExtendOp = Arc::new(move |_key| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            })
        });
        let fails_clone = fails.clone();
        let cb: FailureCallback = Arc::new(move |key| {
            assert_eq!(key, "p");
            fails_clone.fetch_add(1, Ordering::SeqCst);
        });

        let extender = Extender::spawn("p".to_string(), op, Duration::from_millis(10), Some(cb));
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        extender.cancel().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fails.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_any_further_extend_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let op: ExtendOp = Arc::new(move |_key| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            })
        });

        let extender = Extender::spawn("p".to_string(), op, Duration::from_millis(10), None);
        extender.cancel().await;
        let seen_at_cancel = calls.load(Ordering::SeqCst);

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), seen_at_cancel);
    }
}
