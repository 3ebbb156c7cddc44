//! The pull side of replication: one task per configured peer, repeatedly
//! asking it for everything changed since the last checkpoint and applying
//! the result locally. Conflicts are never resolved here — `Node::get`
//! resolves LWW lazily at read time by composite-key ordering, so applying
//! a batch is just "write these pairs".

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::watch;

use crate::error::CResult;
use crate::node::Node;
use crate::replication::proto::Pairs;
use crate::replication::state::{PeerState, ReplicationState};

/// How many changed keys to request per pull.
const BATCH_SIZE: usize = 256;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// How a transport fetches one batch of changes from a named peer.
/// `kv-cli` supplies the concrete reqwest-based implementation; this
/// trait is the only thing the replication worker depends on.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn pull(&self, checkpoint: i64, count: usize) -> CResult<Pairs>;
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Runs the replication loop for a single peer until `shutdown` is
/// signalled. Pulls a batch, applies it via `Node::put_key_pairs`,
/// advances the checkpoint, persists state, and sleeps a second between
/// iterations regardless of outcome.
pub async fn run_peer_loop(
    node: Arc<Node>,
    state: Arc<ReplicationState>,
    peer_name: String,
    client: Arc<dyn PeerClient>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let mut peer_state = match state.get(&peer_name) {
            Ok(s) => s,
            Err(e) => {
                warn!("replication[{}]: failed to load state: {}", peer_name, e);
                sleep_or_shutdown(&mut shutdown).await;
                continue;
            }
        };

        match run_one_pull(&node, &client, peer_state.checkpoint).await {
            Ok(Some((applied, next))) => {
                if next > peer_state.checkpoint {
                    peer_state.checkpoint = next;
                }
                peer_state.last_timestamp = applied;
                peer_state.last_error = None;
                info!("replication[{}]: applied through ts={}, next checkpoint={}", peer_name, applied, next);
            }
            Ok(None) => {
                // Nothing new; leave the checkpoint untouched.
            }
            Err(e) => {
                warn!("replication[{}]: pull failed: {}", peer_name, e);
                peer_state.last_error = Some(e.to_string());
            }
        }

        peer_state.last_job_at = now_unix();
        if let Err(e) = state.put(peer_state) {
            warn!("replication[{}]: failed to persist state: {}", peer_name, e);
        }

        sleep_or_shutdown(&mut shutdown).await;
    }
}

async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(RETRY_DELAY) => {}
        _ = shutdown.changed() => {}
    }
}

/// Pulls one batch and applies it. Returns `Ok(Some((last_ts, next)))` if
/// anything was applied, `Ok(None)` if the peer had nothing new.
async fn run_one_pull(node: &Arc<Node>, client: &Arc<dyn PeerClient>, checkpoint: i64) -> CResult<Option<(i64, i64)>> {
    let pairs = client.pull(checkpoint, BATCH_SIZE).await?;
    if pairs.data.is_empty() {
        return Ok(None);
    }
    let next = pairs.next;
    let last_ts = pairs
        .data
        .iter()
        .filter_map(|e| crate::codec::decode(&e.key).ok().map(|(_, ts, _)| ts))
        .max()
        .unwrap_or(checkpoint);
    node.put_key_pairs(pairs.into_key_value_pairs())?;
    Ok(Some((last_ts, next)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::MemoryEngine;
    use std::sync::Mutex as StdMutex;

    struct FixedClient {
        batches: StdMutex<Vec<Pairs>>,
    }

    #[async_trait]
    impl PeerClient for FixedClient {
        async fn pull(&self, _checkpoint: i64, _count: usize) -> CResult<Pairs> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                Ok(Pairs { data: vec![], next: 0, node_internal_name: String::new() })
            } else {
                Ok(batches.remove(0))
            }
        }
    }

    fn open_node() -> Arc<Node> {
        let path = tempdir::TempDir::new("mvkv-worker").unwrap().into_path().join("mvkv.log");
        Arc::new(Node::open(Arc::new(MemoryEngine::new()), path).unwrap())
    }

    #[tokio::test]
    async fn applies_one_batch_then_stops() {
        let node = open_node();
        let other_id = [7u8; 8];
        let composite = crate::codec::encode(b"k", 10, &other_id);
        let pairs = Pairs {
            data: vec![crate::replication::proto::Entry { key: composite, value: b"v".to_vec() }],
            next: 11,
            node_internal_name: base64::encode_config(other_id, base64::URL_SAFE_NO_PAD),
        };
        let client: Arc<dyn PeerClient> = Arc::new(FixedClient { batches: StdMutex::new(vec![pairs]) });

        let result = run_one_pull(&node, &client, 0).await.unwrap();
        assert_eq!(result, Some((10, 11)));
        assert_eq!(node.get(b"k").unwrap().value, b"v");

        let result = run_one_pull(&node, &client, 11).await.unwrap();
        assert_eq!(result, None);
    }
}
