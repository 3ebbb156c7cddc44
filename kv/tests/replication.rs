//! Cross-node replication convergence: two independently-written nodes
//! pull each other's change logs and end up able to read each other's
//! writes, without either node's own log ever recording the other's data
//! (replicated writes only ever reach the engine via `put_key_pairs`).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use mvkv::error::CResult;
use mvkv::node::Node;
use mvkv::replication::{run_peer_loop, Pairs, PeerClient, ReplicationState};
use mvkv::storage::MemoryEngine;

struct DirectPeerClient {
    peer: Arc<Node>,
}

#[async_trait]
impl PeerClient for DirectPeerClient {
    async fn pull(&self, checkpoint: i64, count: usize) -> CResult<Pairs> {
        let (pairs, next) = self.peer.changed_keys_since(checkpoint, count)?;
        Ok((pairs, next, self.peer.node_id()).into())
    }
}

fn open_node(dir: &Path, name: &str) -> Arc<Node> {
    Arc::new(Node::open(Arc::new(MemoryEngine::new()), dir.join(name)).unwrap())
}

#[tokio::test]
async fn bidirectional_replication_converges() {
    let tmp = tempdir::TempDir::new("mvkv-repl-it").unwrap();
    let a = open_node(tmp.path(), "a.log");
    let b = open_node(tmp.path(), "b.log");

    a.put(b"from_a", b"1").unwrap();
    b.put(b"from_b", b"2").unwrap();

    let state_a = ReplicationState::open(tmp.path().join("state_a")).unwrap();
    let state_b = ReplicationState::open(tmp.path().join("state_b")).unwrap();

    let client_for_a = DirectPeerClient { peer: b.clone() };
    let client_for_b = DirectPeerClient { peer: a.clone() };

    let checkpoint = state_a.get("b").unwrap().checkpoint;
    let pulled = client_for_a.pull(checkpoint, 100).await.unwrap();
    a.put_key_pairs(pulled.into_key_value_pairs()).unwrap();

    let checkpoint = state_b.get("a").unwrap().checkpoint;
    let pulled = client_for_b.pull(checkpoint, 100).await.unwrap();
    b.put_key_pairs(pulled.into_key_value_pairs()).unwrap();

    assert_eq!(a.get(b"from_b").unwrap().value, b"2");
    assert_eq!(b.get(b"from_a").unwrap().value, b"1");

    // a's own log only ever recorded its own write.
    assert_eq!(a.changed_keys_since(0, 100).unwrap().0.len(), 1);
    assert_eq!(b.changed_keys_since(0, 100).unwrap().0.len(), 1);
}

#[tokio::test]
async fn last_writer_wins_on_conflicting_key() {
    let tmp = tempdir::TempDir::new("mvkv-repl-lww").unwrap();
    let a = open_node(tmp.path(), "a.log");
    let b = open_node(tmp.path(), "b.log");

    a.put(b"k", b"from-a").unwrap();
    // Ensure b's write is strictly later so it should win after sync.
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    b.put(b"k", b"from-b").unwrap();

    let client_for_a = DirectPeerClient { peer: b.clone() };
    let pulled = client_for_a.pull(0, 100).await.unwrap();
    a.put_key_pairs(pulled.into_key_value_pairs()).unwrap();

    assert_eq!(a.get(b"k").unwrap().value, b"from-b");
}

#[tokio::test]
async fn run_peer_loop_applies_then_stops_on_shutdown() {
    let tmp = tempdir::TempDir::new("mvkv-repl-loop").unwrap();
    let a = open_node(tmp.path(), "a.log");
    let b = open_node(tmp.path(), "b.log");
    b.put(b"k", b"v").unwrap();

    let state_a = Arc::new(ReplicationState::open(tmp.path().join("state_a")).unwrap());
    let client: Arc<dyn PeerClient> = Arc::new(DirectPeerClient { peer: b.clone() });
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(run_peer_loop(a.clone(), state_a.clone(), "b".to_string(), client, rx));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let _ = tx.send(true);
    handle.await.unwrap();

    assert_eq!(a.get(b"k").unwrap().value, b"v");
    assert_eq!(state_a.get("b").unwrap().checkpoint, b.changed_keys_since(0, 100).unwrap().1);
}
