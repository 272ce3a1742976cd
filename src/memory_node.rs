//! In-memory reference [`Node`] implementation.
//!
//! This is test/demonstration scaffolding only: a single `Mutex`-guarded
//! map with lazy expiry purge on read, not a production backend. A real
//! deployment points `Lock`/`Queue` at independent connections to
//! independent key-value servers.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};

use crate::handle::COMPLETED;
use crate::node::{Node, NodeError, Script, ScriptOutcome};
use crate::time::now_unix;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    /// `None` means the value never expires (only ever true for the
    /// `"completed"` tombstone).
    expire_at: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now: i64) -> bool {
        self.expire_at.is_none_or(|exp| exp > now)
    }
}

#[derive(Debug, Default)]
struct NodeState {
    values: HashMap<String, StoredValue>,
    sets: HashMap<String, HashMap<String, f64>>,
}

impl NodeState {
    /// Value at `key` if present and not expired; purges it lazily if it
    /// has expired, mirroring a real store's TTL behavior.
    fn live(&mut self, key: &str) -> Option<StoredValue> {
        let now = now_unix();
        let expired = matches!(self.values.get(key), Some(v) if !v.is_live(now));
        if expired {
            self.values.remove(key);
        }
        self.values.get(key).cloned()
    }
}

/// An in-memory stand-in for one independent key-value node.
///
/// Intended for tests, doctests, and local experimentation with `Lock`/
/// `Queue`, not for production use. Cloning an `InMemoryNode` does not
/// share state; wrap it in `Arc` to share a single instance across an
/// ensemble the way a real client would share one connection.
#[derive(Debug, Default)]
pub struct InMemoryNode {
    state: Mutex<NodeState>,
}

impl InMemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `key` currently holds a live (non-expired) value. Exposed
    /// for tests that want to assert ownership directly against a node.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().live(key).is_some()
    }

    /// The raw value stored at `key`, if any and not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().live(key).map(|v| v.value)
    }
}

#[async_trait]
impl Node for InMemoryNode {
    async fn eval(
        &self,
        script: Script,
        keys: &[&str],
        args: &[&str],
    ) -> Result<ScriptOutcome, NodeError> {
        let mut state = self.state.lock().unwrap();
        match script {
            Script::LLock => l_lock(&mut state, keys, args),
            Script::LUnlock => l_unlock(&mut state, keys, args),
            Script::LExtendLock => l_extend_lock(&mut state, keys, args),
            Script::LqGet => lq_get(&mut state, keys, args),
            Script::LqLock => lq_lock(&mut state, keys, args),
            Script::LqExtendLock => lq_extend_lock(&mut state, keys, args),
            Script::LqConsume => lq_consume(&mut state, keys, args),
            Script::LqUnlock => lq_unlock(&mut state, keys, args),
            Script::LqQsize => lq_qsize(&mut state, keys),
        }
    }

    async fn zadd(&self, set: &str, score: f64, member: &str) -> Result<i64, NodeError> {
        let mut state = self.state.lock().unwrap();
        let members = state.sets.entry(set.to_owned()).or_default();
        if members.contains_key(member) {
            members.insert(member.to_owned(), score);
            Ok(0)
        } else {
            members.insert(member.to_owned(), score);
            Ok(1)
        }
    }

    async fn zcard(&self, set: &str) -> Result<i64, NodeError> {
        let state = self.state.lock().unwrap();
        Ok(state.sets.get(set).map(|m| m.len()).unwrap_or(0) as i64)
    }
}

fn parse_i64(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

fn l_lock(state: &mut NodeState, keys: &[&str], args: &[&str]) -> Result<ScriptOutcome, NodeError> {
    let path = keys[0];
    let client_id = args[0];
    let expireat = parse_i64(args[1]);
    if state.live(path).is_some() {
        return Ok(ScriptOutcome::Int(0));
    }
    state.values.insert(
        path.to_owned(),
        StoredValue {
            value: client_id.to_owned(),
            expire_at: Some(expireat),
        },
    );
    Ok(ScriptOutcome::Int(1))
}

fn l_unlock(state: &mut NodeState, keys: &[&str], args: &[&str]) -> Result<ScriptOutcome, NodeError> {
    let path = keys[0];
    let client_id = args[0];
    match state.live(path) {
        Some(v) if v.value == client_id => {
            state.values.remove(path);
            Ok(ScriptOutcome::Int(1))
        }
        Some(_) => Ok(ScriptOutcome::Int(0)),
        None => Ok(ScriptOutcome::Int(1)),
    }
}

fn l_extend_lock(
    state: &mut NodeState,
    keys: &[&str],
    args: &[&str],
) -> Result<ScriptOutcome, NodeError> {
    let path = keys[0];
    let expireat = parse_i64(args[0]);
    let client_id = args[1];
    match state.live(path) {
        Some(v) if v.value == client_id => {
            state.values.get_mut(path).unwrap().expire_at = Some(expireat);
            Ok(ScriptOutcome::Int(1))
        }
        _ => Ok(ScriptOutcome::Int(0)),
    }
}

fn lowest_scored_member(state: &NodeState, set: &str) -> Option<String> {
    state
        .sets
        .get(set)?
        .iter()
        .min_by(|(ka, sa), (kb, sb)| sa.partial_cmp(sb).unwrap().then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.clone())
}

fn lq_get(state: &mut NodeState, keys: &[&str], args: &[&str]) -> Result<ScriptOutcome, NodeError> {
    let queue = keys[0];
    let client_id = args[0];
    let expireat = parse_i64(args[1]);
    let Some(h_k) = lowest_scored_member(state, queue) else {
        return Err(NodeError::QueueEmpty);
    };
    if state.live(&h_k).is_some() {
        return Err(NodeError::AlreadyLocked);
    }
    state.values.insert(
        h_k.clone(),
        StoredValue {
            value: client_id.to_owned(),
            expire_at: Some(expireat),
        },
    );
    *state.sets.get_mut(queue).unwrap().get_mut(&h_k).unwrap() += 1.0;
    Ok(ScriptOutcome::Str(h_k))
}

fn lq_lock(state: &mut NodeState, keys: &[&str], args: &[&str]) -> Result<ScriptOutcome, NodeError> {
    let h_k = keys[0];
    let queue = keys[1];
    let expireat = parse_i64(args[0]);
    let randint: u64 = args[1].parse().unwrap_or(0);
    let client_id = args[2];

    if state.live(h_k).is_none() {
        state.values.insert(
            h_k.to_owned(),
            StoredValue {
                value: client_id.to_owned(),
                expire_at: Some(expireat),
            },
        );
        *state
            .sets
            .entry(queue.to_owned())
            .or_default()
            .entry(h_k.to_owned())
            .or_insert(0.0) += 1.0;
        return Ok(ScriptOutcome::Int(1));
    }

    if state.values.get(h_k).map(|v| v.value.as_str()) == Some(COMPLETED) {
        state.sets.get_mut(queue).map(|s| s.remove(h_k));
        return Err(NodeError::AlreadyCompleted);
    }

    // Already locked by someone else: probabilistic score decay, bit-for-bit
    // the same draw as the original Lua (see examples/original_source).
    if let Some(score) = state.sets.get(queue).and_then(|s| s.get(h_k).copied()) {
        if score > 0.0 {
            let upper = score.floor() as u64 + 1;
            let mut rng = rand::rngs::StdRng::seed_from_u64(randint);
            let num = rng.random_range(1..=upper);
            if num != 1 {
                let delta = (num as f64 - 1.0) / score;
                *state.sets.get_mut(queue).unwrap().get_mut(h_k).unwrap() += delta;
            }
        }
    }
    Err(NodeError::AlreadyLocked)
}

fn lq_extend_lock(
    state: &mut NodeState,
    keys: &[&str],
    args: &[&str],
) -> Result<ScriptOutcome, NodeError> {
    let h_k = keys[0];
    let expireat = parse_i64(args[0]);
    let client_id = args[1];
    match state.values.get(h_k).cloned() {
        Some(v) if v.value == client_id && v.is_live(now_unix()) => {
            state.values.get_mut(h_k).unwrap().expire_at = Some(expireat);
            Ok(ScriptOutcome::Int(1))
        }
        Some(v) if v.value == COMPLETED => Err(NodeError::AlreadyCompleted),
        _ => Err(NodeError::Expired),
    }
}

fn lq_consume(state: &mut NodeState, keys: &[&str], args: &[&str]) -> Result<ScriptOutcome, NodeError> {
    let h_k = keys[0];
    let queue = keys[1];
    let client_id = args[0];
    let matches_owner = match state.live(h_k) {
        Some(v) => v.value == client_id || v.value == COMPLETED,
        None => false,
    };
    if !matches_owner {
        return Ok(ScriptOutcome::Int(0));
    }
    state.values.insert(
        h_k.to_owned(),
        StoredValue {
            value: COMPLETED.to_owned(),
            expire_at: None,
        },
    );
    state.sets.get_mut(queue).map(|s| s.remove(h_k));
    Ok(ScriptOutcome::Int(1))
}

fn lq_unlock(state: &mut NodeState, keys: &[&str], args: &[&str]) -> Result<ScriptOutcome, NodeError> {
    let h_k = keys[0];
    let client_id = args[0];
    match state.live(h_k) {
        Some(v) if v.value == client_id => {
            state.values.remove(h_k);
            Ok(ScriptOutcome::Int(1))
        }
        _ => Ok(ScriptOutcome::Int(0)),
    }
}

fn lq_qsize(state: &mut NodeState, keys: &[&str]) -> Result<ScriptOutcome, NodeError> {
    let queue = keys[0];
    let members: Vec<String> = state
        .sets
        .get(queue)
        .map(|s| s.keys().cloned().collect())
        .unwrap_or_default();
    let mut taken = 0i64;
    let mut queued = 0i64;
    for member in members {
        if state.live(&member).is_some() {
            taken += 1;
        } else {
            queued += 1;
        }
    }
    Ok(ScriptOutcome::Pair(taken, queued))
}
