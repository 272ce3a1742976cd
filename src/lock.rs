//! Lock core: majority-quorum mutual exclusion over a single
//! path, modeled directly on the Redlock algorithm.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::CoordinationError;
use crate::extender::{ExtendOp, Extender, FailureCallback};
use crate::fanout::{ConcurrentFanOut, FanOut};
use crate::handle::ClientId;
use crate::node::Node;
use crate::scripts;
use crate::time::{self, Expireat};

/// What `Lock::lock` should do once the majority is acquired.
pub enum Extend {
    /// Return the lease as-is; the caller manages renewal, if any.
    No,
    /// Arm a background extender; failures are silent (the lease simply
    /// lapses at its natural expiry).
    Yes,
    /// Arm a background extender; `callback` runs exactly once, off the
    /// node-I/O path, the first time an extend attempt fails to keep the
    /// majority.
    WithCallback(FailureCallback),
}

fn majority(n: usize) -> usize {
    n / 2 + 1
}

/// A majority-quorum distributed lock over an ensemble of `N` independent
/// nodes. One `Lock` instance may be used to hold several
/// distinct paths concurrently; each gets its own background extender.
pub struct Lock<N: Node + 'static, F: FanOut + Clone + 'static = ConcurrentFanOut> {
    clients: Vec<Arc<N>>,
    n: usize,
    timeout: Duration,
    clock_drift: Duration,
    polling_interval: Duration,
    client_id: ClientId,
    fanout: F,
    extenders: tokio::sync::Mutex<HashMap<String, Extender>>,
}

impl<N: Node + 'static, F: FanOut + Clone + 'static> Lock<N, F> {
    /// Construct a lock over `clients` (the nodes this process can reach),
    /// asserting the ensemble's declared size is `n`. Fails immediately if
    /// fewer than `n/2 + 1` clients were supplied (no point attempting an
    /// acquisition that can never reach majority).
    ///
    /// `client_id` should come from a seeded RNG in tests and from
    /// a real source of randomness otherwise.
    pub fn new(
        clients: Vec<Arc<N>>,
        n: usize,
        timeout: Duration,
        clock_drift: Duration,
        client_id: ClientId,
        fanout: F,
    ) -> Result<Arc<Self>, CoordinationError> {
        let need = majority(n);
        if clients.len() < need {
            return Err(CoordinationError::CannotObtainLock(format!(
                "connected {} of {n} nodes; need at least {need} for a majority",
                clients.len()
            )));
        }
        Ok(Arc::new(Lock {
            clients,
            n,
            polling_interval: time::polling_interval(timeout),
            timeout,
            clock_drift,
            client_id,
            fanout,
            extenders: tokio::sync::Mutex::new(HashMap::new()),
        }))
    }

    /// Attempt to acquire `path` against a majority of nodes. Returns the
    /// lease's expiry on success, `None` on failure (failure is always
    /// retryable).
    pub async fn lock(self: &Arc<Self>, path: &str, extend: Extend) -> Option<Expireat> {
        let (_, t_expireat) = time::expireat(self.timeout);
        let client_id = self.client_id.to_string();

        let results = scripts::l_lock(&self.fanout, &self.clients, path, &client_id, t_expireat).await;
        let granted = results.iter().filter(|(_, r)| matches!(r, Ok(1))).count();

        if granted < majority(self.n) {
            debug!(path, granted, n = self.n, "lock: majority unreachable");
            self.unlock(path).await;
            return None;
        }
        if !time::lock_still_valid(t_expireat, self.clock_drift, self.polling_interval) {
            warn!(path, "lock: majority acquired but lease expired in transit");
            self.unlock(path).await;
            return None;
        }

        match extend {
            Extend::No => {}
            Extend::Yes => self.arm_extender(path.to_owned(), None).await,
            Extend::WithCallback(cb) => self.arm_extender(path.to_owned(), Some(cb)).await,
        }
        Some(t_expireat)
    }

    /// Release `path`, cancelling any armed background extender first.
    /// Returns the fraction of the full ensemble (`N`, not just the
    /// connected clients) that reported a successful or idempotent release.
    pub async fn unlock(&self, path: &str) -> f64 {
        self.disarm_extender(path).await;
        let client_id = self.client_id.to_string();
        let results = scripts::l_unlock(&self.fanout, &self.clients, path, &client_id).await;
        let ok = results.iter().filter(|(_, r)| matches!(r, Ok(1))).count();
        ok as f64 / self.n as f64
    }

    /// Extend `path`'s lease by one full `timeout` and, if still a
    /// majority, re-assert ownership on every connected node (fire and
    /// forget, since a majority is already held, so this is opportunistic
    /// repair, not required for correctness).
    pub async fn extend_lock(&self, path: &str) -> Option<Expireat> {
        let (_, t_expireat) = time::expireat(self.timeout);
        let client_id = self.client_id.to_string();

        let results =
            scripts::l_extend_lock(&self.fanout, &self.clients, path, t_expireat, &client_id).await;
        let ok = results.iter().filter(|(_, r)| matches!(r, Ok(1))).count();
        if ok < majority(self.n) {
            return None;
        }

        let clients = self.clients.clone();
        let fanout = self.fanout.clone();
        let path = path.to_owned();
        let client_id_owned = client_id.clone();
        tokio::spawn(async move {
            scripts::l_lock(&fanout, &clients, &path, &client_id_owned, t_expireat).await;
        });

        if time::lock_still_valid(t_expireat, self.clock_drift, self.polling_interval) {
            Some(t_expireat)
        } else {
            None
        }
    }

    async fn arm_extender(self: &Arc<Self>, path: String, failure_cb: Option<FailureCallback>) {
        let me = Arc::clone(self);
        let op: ExtendOp = Arc::new(move |key: String| {
            let me = Arc::clone(&me);
            Box::pin(async move { me.extend_lock(&key).await.is_some() })
        });
        let extender = Extender::spawn(path.clone(), op, self.polling_interval, failure_cb);
        let mut guard = self.extenders.lock().await;
        if let Some(previous) = guard.insert(path, extender) {
            previous.cancel().await;
        }
    }

    async fn disarm_extender(&self, path: &str) {
        let extender = self.extenders.lock().await.remove(path);
        if let Some(extender) = extender {
            extender.cancel().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::ConcurrentFanOut;
    use crate::memory_node::InMemoryNode;

    fn three_nodes() -> Vec<Arc<InMemoryNode>> {
        (0..3).map(|_| Arc::new(InMemoryNode::new())).collect()
    }

    #[tokio::test]
    async fn lock_succeeds_with_a_majority_and_is_visible_on_every_node() {
        let nodes = three_nodes();
        let lock = Lock::new(
            nodes.clone(),
            3,
            Duration::from_secs(5),
            Duration::ZERO,
            ClientId(1),
            ConcurrentFanOut,
        )
        .unwrap();

        let expireat = lock.lock("p", Extend::No).await;
        assert!(expireat.is_some());
        for node in &nodes {
            assert!(node.contains("p"));
        }
    }

    #[tokio::test]
    async fn lock_fails_and_releases_when_majority_unreachable() {
        let nodes = three_nodes();
        // Pre-occupy two of three nodes with a different client's lock.
        let squatter = Lock::new(
            nodes.clone(),
            3,
            Duration::from_secs(5),
            Duration::ZERO,
            ClientId(999),
            ConcurrentFanOut,
        )
        .unwrap();
        squatter.lock("p", Extend::No).await;

        let lock = Lock::new(
            nodes.clone(),
            3,
            Duration::from_secs(5),
            Duration::ZERO,
            ClientId(1),
            ConcurrentFanOut,
        )
        .unwrap();
        let result = lock.lock("p", Extend::No).await;
        assert!(result.is_none());
        // The one node our client did acquire should have been released.
        for node in &nodes {
            let owner = node.get("p");
            assert!(owner.is_none() || owner == Some("999".to_string()));
        }
    }

    #[tokio::test]
    async fn construction_rejects_too_few_connected_clients() {
        let nodes: Vec<Arc<InMemoryNode>> = (0..1).map(|_| Arc::new(InMemoryNode::new())).collect();
        let result = Lock::new(
            nodes,
            5,
            Duration::from_secs(5),
            Duration::ZERO,
            ClientId(1),
            ConcurrentFanOut,
        );
        assert!(matches!(result, Err(CoordinationError::CannotObtainLock(_))));
    }

    #[tokio::test]
    async fn unlock_is_idempotent_and_releases_on_every_node() {
        let nodes = three_nodes();
        let lock = Lock::new(
            nodes.clone(),
            3,
            Duration::from_secs(5),
            Duration::ZERO,
            ClientId(1),
            ConcurrentFanOut,
        )
        .unwrap();
        lock.lock("p", Extend::No).await;
        let fraction = lock.unlock("p").await;
        assert_eq!(fraction, 1.0);
        for node in &nodes {
            assert!(!node.contains("p"));
        }
        // Idempotent: unlocking an already-released path still succeeds.
        assert_eq!(lock.unlock("p").await, 1.0);
    }

    // Node-side expiry is real-wall-clock-based (an `InMemoryNode` stands
    // in for a real store's own TTL), so this exercises the extender with
    // an actual sleep rather than `tokio::time::pause` (advancing only
    // the runtime's virtual clock would never lapse the lease in the
    // first place, making the assertion vacuous).
    #[tokio::test]
    async fn extend_yes_keeps_the_lease_alive_past_the_original_timeout() {
        let nodes = three_nodes();
        let lock = Lock::new(
            nodes.clone(),
            3,
            Duration::from_secs(1),
            Duration::ZERO,
            ClientId(1),
            ConcurrentFanOut,
        )
        .unwrap();
        lock.lock("p", Extend::Yes).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;

        for node in &nodes {
            assert!(node.contains("p"));
        }
        lock.unlock("p").await;
    }
}
