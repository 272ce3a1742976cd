//! Queue core: a priority work queue where each item is
//! additionally protected by a per-item majority lock, fused with a
//! probabilistic anti-starvation score decay.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::CoordinationError;
use crate::extender::{ExtendOp, Extender, FailureCallback};
use crate::fanout::{ConcurrentFanOut, FanOut};
use crate::handle::{ClientId, Handle};
use crate::node::{Node, NodeError};
use crate::scripts;
use crate::time::{self, Expireat};

fn majority(n: usize) -> usize {
    n / 2 + 1
}

/// The outcome of extending a queue item's lease
/// `extend_lock`), rendered as an enum rather than the original's
/// `-1`/`0`/expiry sentinel scheme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtendOutcome {
    /// Majority held and the lease has the new expiry.
    Extended(Expireat),
    /// Fewer than a majority of nodes still recognize this client as the
    /// owner; the item should be treated as lost.
    LostMajority,
    /// Another caller already finished and consumed this item.
    Completed,
}

impl ExtendOutcome {
    pub fn is_extended(&self) -> bool {
        matches!(self, ExtendOutcome::Extended(_))
    }
}

/// A majority-locked priority queue over an ensemble of `N` independent
/// nodes.
pub struct Queue<N: Node + 'static, F: FanOut + Clone + 'static = ConcurrentFanOut> {
    queue_path: String,
    clients: Vec<Arc<N>>,
    n: usize,
    timeout: Duration,
    clock_drift: Duration,
    polling_interval: Duration,
    client_id: ClientId,
    fanout: F,
    extenders: tokio::sync::Mutex<std::collections::HashMap<String, Extender>>,
    rng: tokio::sync::Mutex<StdRng>,
}

impl<N: Node + 'static, F: FanOut + Clone + 'static> Queue<N, F> {
    /// `rng_seed` drives both candidate selection and the score-decay
    /// `randint` draws; pin it in tests for reproducible behavior.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue_path: impl Into<String>,
        clients: Vec<Arc<N>>,
        n: usize,
        timeout: Duration,
        clock_drift: Duration,
        client_id: ClientId,
        rng_seed: u64,
        fanout: F,
    ) -> Result<Arc<Self>, CoordinationError> {
        let need = majority(n);
        if clients.len() < need {
            return Err(CoordinationError::CannotObtainLock(format!(
                "connected {} of {n} nodes; need at least {need} for a majority",
                clients.len()
            )));
        }
        Ok(Arc::new(Queue {
            queue_path: queue_path.into(),
            clients,
            n,
            polling_interval: time::polling_interval(timeout),
            timeout,
            clock_drift,
            client_id,
            fanout,
            extenders: tokio::sync::Mutex::new(std::collections::HashMap::new()),
            rng: tokio::sync::Mutex::new(StdRng::seed_from_u64(rng_seed)),
        }))
    }

    /// Enqueue `item` at `priority` (lower sorts first). Returns the
    /// fraction of the full ensemble that recorded the add.
    pub async fn put(&self, item: &str, priority: i64) -> f64 {
        let h_k = Handle::new(priority, time::wall_time_f64(), item);
        let queue_path = self.queue_path.clone();
        let futures: Vec<_> = self
            .clients
            .iter()
            .map(|client| {
                let client = Arc::clone(client);
                let h_k = h_k.as_str().to_owned();
                let queue_path = queue_path.clone();
                async move { client.zadd(&queue_path, 0.0, &h_k).await }
            })
            .collect();
        let results: Vec<(usize, Result<i64, NodeError>)> =
            self.fanout.spawn_all(futures).collect::<Vec<_>>().await;
        // Sum the raw per-node zadd return values (not just a success
        // count): some stores report 0 for a re-added existing member,
        // and that historical quirk is preserved deliberately.
        let sum: i64 = results.iter().filter_map(|(_, r)| r.as_ref().ok()).sum();
        sum as f64 / self.n as f64
    }

    /// Claim the next candidate item. On success, returns its payload and
    /// handle; the handle is the token `extend_lock`/`consume` need.
    pub async fn get(self: &Arc<Self>, extend: bool, check_all_servers: bool) -> Option<(String, Handle)> {
        let (_, t_expireat) = time::expireat(self.timeout);
        let (winner_idx, h_k) = self.get_candidate(t_expireat, check_all_servers).await?;

        if !self.acquire_lock_majority(winner_idx, &h_k, t_expireat).await {
            return None;
        }

        let handle = Handle::from(h_k.clone());
        if extend {
            self.arm_extender(h_k, None).await;
        }
        let payload = handle.payload().to_owned();
        Some((payload, handle))
    }

    async fn get_candidate(&self, t_expireat: Expireat, check_all_servers: bool) -> Option<(usize, String)> {
        let chosen: Vec<usize> = {
            let mut rng = self.rng.lock().await;
            if check_all_servers {
                let mut all: Vec<usize> = (0..self.clients.len()).collect();
                all.shuffle(&mut *rng);
                all
            } else {
                let i = rng.random_range(0..self.clients.len());
                vec![i]
            }
        };

        let subset: Vec<Arc<N>> = chosen.iter().map(|&i| Arc::clone(&self.clients[i])).collect();
        let client_id = self.client_id.to_string();
        let mut stream =
            scripts::lq_get_stream(&self.fanout, &subset, &self.queue_path, &client_id, t_expireat);

        // Take the first success and stop polling; slower nodes (still
        // in flight or yet to error) are not waited on here, matching the
        // original's "use the fastest response" trade-off.
        let mut winner = None;
        while let Some((local_i, r)) = stream.next().await {
            if let Ok(h_k) = r {
                winner = Some((local_i, h_k));
                break;
            }
        }
        let (winner_local, h_k) = winner?;
        let winner_global = chosen[winner_local];

        // Release every other sampled node's speculative lock on the
        // winning handle, regardless of whether it errored, hasn't been
        // polled yet, or (rarely) picked a different candidate itself (a
        // known trade-off).
        let others: Vec<Arc<N>> = chosen
            .iter()
            .enumerate()
            .filter(|(local_i, _)| *local_i != winner_local)
            .map(|(_, &global_i)| Arc::clone(&self.clients[global_i]))
            .collect();
        if !others.is_empty() {
            scripts::lq_unlock(&self.fanout, &others, &h_k, &client_id).await;
        }

        Some((winner_global, h_k))
    }

    async fn acquire_lock_majority(&self, winner_idx: usize, h_k: &str, t_expireat: Expireat) -> bool {
        let client_id = self.client_id.to_string();
        let others: Vec<Arc<N>> = self
            .clients
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != winner_idx)
            .map(|(_, c)| Arc::clone(c))
            .collect();
        let randints: Vec<u64> = {
            let mut rng = self.rng.lock().await;
            (0..others.len()).map(|_| rng.random()).collect()
        };

        let mut results = scripts::lq_lock(
            &self.fanout,
            &others,
            h_k,
            &self.queue_path,
            t_expireat,
            &randints,
            &client_id,
        )
        .await;
        // Map local indices (into `others`) back to global client indices,
        // then fold in the winner's synthetic success.
        let other_global: Vec<usize> = (0..self.clients.len()).filter(|&i| i != winner_idx).collect();
        for (local_i, _) in results.iter_mut() {
            *local_i = other_global[*local_i];
        }
        results.push((winner_idx, Ok(1)));

        if results.iter().any(|(_, r)| matches!(r, Err(NodeError::AlreadyCompleted))) {
            debug!(h_k, "acquire_lock_majority: item already completed elsewhere");
            scripts::lq_consume(&self.fanout, &self.clients, h_k, &self.queue_path, &client_id).await;
            return false;
        }

        let granted: Vec<usize> = results
            .iter()
            .filter(|(_, r)| matches!(r, Ok(1)))
            .map(|(i, _)| *i)
            .collect();
        if granted.len() < majority(self.n) {
            warn!(h_k, granted = granted.len(), n = self.n, "acquire_lock_majority: no majority");
            let holders: Vec<Arc<N>> = granted.iter().map(|&i| Arc::clone(&self.clients[i])).collect();
            if !holders.is_empty() {
                scripts::lq_unlock(&self.fanout, &holders, h_k, &client_id).await;
            }
            return false;
        }

        time::lock_still_valid(t_expireat, self.clock_drift, self.polling_interval)
    }

    /// Mark `handle` permanently complete. Returns a 0-100 "percent of
    /// ensemble that acknowledged" score, matching the original API.
    pub async fn consume(&self, handle: &Handle) -> Result<f64, CoordinationError> {
        self.disarm_extender(handle.as_str()).await;
        let client_id = self.client_id.to_string();
        let results =
            scripts::lq_consume(&self.fanout, &self.clients, handle.as_str(), &self.queue_path, &client_id)
                .await;
        let ok = results.iter().filter(|(_, r)| matches!(r, Ok(1))).count();
        if ok == 0 {
            return Err(CoordinationError::ConsumeError);
        }
        Ok(100.0 * ok as f64 / self.n as f64)
    }

    /// Extend `handle`'s lease by one full `timeout`.
    pub async fn extend_lock(&self, handle: &Handle) -> ExtendOutcome {
        let (_, t_expireat) = time::expireat(self.timeout);
        let client_id = self.client_id.to_string();
        let results =
            scripts::lq_extend_lock(&self.fanout, &self.clients, handle.as_str(), t_expireat, &client_id)
                .await;

        if results.iter().any(|(_, r)| matches!(r, Err(NodeError::AlreadyCompleted))) {
            scripts::lq_consume(&self.fanout, &self.clients, handle.as_str(), &self.queue_path, &client_id)
                .await;
            return ExtendOutcome::Completed;
        }

        let ok = results.iter().filter(|(_, r)| matches!(r, Ok(1))).count();
        if ok < majority(self.n) {
            return ExtendOutcome::LostMajority;
        }
        if time::lock_still_valid(t_expireat, self.clock_drift, self.polling_interval) {
            ExtendOutcome::Extended(t_expireat)
        } else {
            ExtendOutcome::LostMajority
        }
    }

    /// Report queue depth. At least one of `queued`/`taken` must be true.
    pub async fn size(&self, queued: bool, taken: bool) -> Result<i64, CoordinationError> {
        if !queued && !taken {
            return Err(CoordinationError::InvalidSizeQuery);
        }
        if queued && taken {
            let queue_path = self.queue_path.clone();
            let futures: Vec<_> = self
                .clients
                .iter()
                .map(|client| {
                    let client = Arc::clone(client);
                    let queue_path = queue_path.clone();
                    async move { client.zcard(&queue_path).await }
                })
                .collect();
            let results = self.fanout.spawn_all(futures).collect::<Vec<_>>().await;
            let max = results
                .into_iter()
                .filter_map(|(_, r): (usize, Result<i64, NodeError>)| r.ok())
                .max()
                .unwrap_or(0);
            return Ok(max);
        }

        let results = scripts::lq_qsize(&self.fanout, &self.clients, &self.queue_path).await;
        let max = results
            .into_iter()
            .filter_map(|(_, r)| r.ok())
            .map(|(taken_count, queued_count)| if taken { taken_count } else { queued_count })
            .max()
            .unwrap_or(0);
        Ok(max)
    }

    async fn arm_extender(self: &Arc<Self>, h_k: String, failure_cb: Option<FailureCallback>) {
        let me = Arc::clone(self);
        let op: ExtendOp = Arc::new(move |key: String| {
            let me = Arc::clone(&me);
            Box::pin(async move {
                let handle = Handle::from(key);
                me.extend_lock(&handle).await.is_extended()
            })
        });
        let extender = Extender::spawn(h_k.clone(), op, self.polling_interval, failure_cb);
        let mut guard = self.extenders.lock().await;
        if let Some(previous) = guard.insert(h_k, extender) {
            previous.cancel().await;
        }
    }

    async fn disarm_extender(&self, h_k: &str) {
        let extender = self.extenders.lock().await.remove(h_k);
        if let Some(extender) = extender {
            extender.cancel().await;
        }
    }
}
