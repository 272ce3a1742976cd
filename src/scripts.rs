//! Script registry / invoker.
//!
//! Thin typed wrappers around [`Node::eval`] for each of the nine named
//! scripts, plus the direct `zadd`/`zcard` calls. Each wrapper formats its
//! keys/args in the declared positional order and fans the call out across
//! a node slice via a [`FanOut`], returning `(index, Result<T, NodeError>)`
//! pairs in completion order.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::fanout::FanOut;
use crate::node::{Node, NodeError, Script, ScriptOutcome};
use crate::time::Expireat;

/// Build one future per node for `script` with the given `keys`/`args`,
/// ready to hand to a [`FanOut`].
fn futures_for<N: Node + 'static>(
    nodes: &[Arc<N>],
    script: Script,
    keys: Vec<String>,
    args: Vec<String>,
) -> Vec<impl std::future::Future<Output = Result<ScriptOutcome, NodeError>> + Send + 'static> {
    nodes
        .iter()
        .map(|node| {
            let node = Arc::clone(node);
            let keys = keys.clone();
            let args = args.clone();
            async move {
                let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                node.eval(script, &key_refs, &arg_refs).await
            }
        })
        .collect()
}

/// Dispatch `script` with the given `keys`/`args` against every node in
/// `nodes`, using `fanout` for concurrency. Returns per-node results in
/// completion order, tagged with the node's index in `nodes`.
async fn dispatch<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    script: Script,
    keys: Vec<String>,
    args: Vec<String>,
) -> Vec<(usize, Result<ScriptOutcome, NodeError>)> {
    fanout.spawn_all(futures_for(nodes, script, keys, args)).collect().await
}

/// Same dispatch, but yields the completion-ordered stream directly instead
/// of collecting it, so a caller that only needs the first success (e.g.
/// `Queue::get_candidate`) can stop polling once it has one, leaving the
/// rest to resolve in the background.
fn dispatch_stream<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    script: Script,
    keys: Vec<String>,
    args: Vec<String>,
) -> BoxStream<'static, (usize, Result<ScriptOutcome, NodeError>)> {
    fanout.spawn_all(futures_for(nodes, script, keys, args))
}

/// `l_lock(path ; client_id, expireat)` on every node in `nodes`.
pub async fn l_lock<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    path: &str,
    client_id: &str,
    expireat: Expireat,
) -> Vec<(usize, Result<i64, NodeError>)> {
    let results = dispatch(
        fanout,
        nodes,
        Script::LLock,
        vec![path.to_owned()],
        vec![client_id.to_owned(), expireat.to_string()],
    )
    .await;
    map_int(results)
}

/// `l_unlock(path ; client_id)` on every node in `nodes`.
pub async fn l_unlock<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    path: &str,
    client_id: &str,
) -> Vec<(usize, Result<i64, NodeError>)> {
    let results = dispatch(
        fanout,
        nodes,
        Script::LUnlock,
        vec![path.to_owned()],
        vec![client_id.to_owned()],
    )
    .await;
    map_int(results)
}

/// `l_extend_lock(path ; expireat, client_id)` on every node in `nodes`.
pub async fn l_extend_lock<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    path: &str,
    expireat: Expireat,
    client_id: &str,
) -> Vec<(usize, Result<i64, NodeError>)> {
    let results = dispatch(
        fanout,
        nodes,
        Script::LExtendLock,
        vec![path.to_owned()],
        vec![expireat.to_string(), client_id.to_owned()],
    )
    .await;
    map_int(results)
}

/// `lq_get(Q ; client_id, expireat)` on the given node subset, as a
/// completion-ordered stream rather than a collected `Vec`: `Queue::get`
/// only needs the first success and stops polling once it has one, so this
/// does not force the caller to wait on the slowest node in the subset.
pub fn lq_get_stream<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    queue_path: &str,
    client_id: &str,
    expireat: Expireat,
) -> BoxStream<'static, (usize, Result<String, NodeError>)> {
    let stream = dispatch_stream(
        fanout,
        nodes,
        Script::LqGet,
        vec![queue_path.to_owned()],
        vec![client_id.to_owned(), expireat.to_string()],
    );
    stream
        .map(|(i, r)| (i, r.map(|v| v.into_str().unwrap_or_default())))
        .boxed()
}

/// `lq_lock(h_k, Q ; expireat, randint, client_id)` on every node in
/// `nodes`. Each node gets its own `randints[i]` (the original Lua comment
/// is explicit that the random seed "changes every time the script is
/// called", i.e. per node, not once per fan-out batch).
#[allow(clippy::too_many_arguments)]
pub async fn lq_lock<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    handle: &str,
    queue_path: &str,
    expireat: Expireat,
    randints: &[u64],
    client_id: &str,
) -> Vec<(usize, Result<i64, NodeError>)> {
    assert_eq!(nodes.len(), randints.len(), "one randint is required per node");
    let futures: Vec<_> = nodes
        .iter()
        .zip(randints.iter())
        .map(|(node, &randint)| {
            let node = Arc::clone(node);
            let handle = handle.to_owned();
            let queue_path = queue_path.to_owned();
            let client_id = client_id.to_owned();
            async move {
                let expireat_s = expireat.to_string();
                let randint_s = randint.to_string();
                node.eval(
                    Script::LqLock,
                    &[handle.as_str(), queue_path.as_str()],
                    &[expireat_s.as_str(), randint_s.as_str(), client_id.as_str()],
                )
                .await
            }
        })
        .collect();
    let results = fanout.spawn_all(futures).collect::<Vec<_>>().await;
    map_int(results)
}

/// `lq_extend_lock(h_k ; expireat, client_id)` on every node in `nodes`.
pub async fn lq_extend_lock<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    handle: &str,
    expireat: Expireat,
    client_id: &str,
) -> Vec<(usize, Result<i64, NodeError>)> {
    let results = dispatch(
        fanout,
        nodes,
        Script::LqExtendLock,
        vec![handle.to_owned()],
        vec![expireat.to_string(), client_id.to_owned()],
    )
    .await;
    map_int(results)
}

/// `lq_consume(h_k, Q ; client_id)` on every node in `nodes`.
pub async fn lq_consume<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    handle: &str,
    queue_path: &str,
    client_id: &str,
) -> Vec<(usize, Result<i64, NodeError>)> {
    let results = dispatch(
        fanout,
        nodes,
        Script::LqConsume,
        vec![handle.to_owned(), queue_path.to_owned()],
        vec![client_id.to_owned()],
    )
    .await;
    map_int(results)
}

/// `lq_unlock(h_k ; client_id)` on every node in `nodes`.
pub async fn lq_unlock<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    handle: &str,
    client_id: &str,
) -> Vec<(usize, Result<i64, NodeError>)> {
    let results = dispatch(
        fanout,
        nodes,
        Script::LqUnlock,
        vec![handle.to_owned()],
        vec![client_id.to_owned()],
    )
    .await;
    map_int(results)
}

/// `lq_qsize(Q)` on every node in `nodes`.
pub async fn lq_qsize<N: Node + 'static, F: FanOut>(
    fanout: &F,
    nodes: &[Arc<N>],
    queue_path: &str,
) -> Vec<(usize, Result<(i64, i64), NodeError>)> {
    let results = dispatch(fanout, nodes, Script::LqQsize, vec![queue_path.to_owned()], vec![]).await;
    results
        .into_iter()
        .map(|(i, r)| (i, r.map(|v| v.as_pair().unwrap_or((0, 0)))))
        .collect()
}

fn map_int(
    results: Vec<(usize, Result<ScriptOutcome, NodeError>)>,
) -> Vec<(usize, Result<i64, NodeError>)> {
    results
        .into_iter()
        .map(|(i, r)| (i, r.map(|v| v.as_int().unwrap_or(0))))
        .collect()
}
