//! Per-peer replication progress, persisted as one JSON document mapping
//! peer name to its checkpoint state. The original project wrote one file
//! per peer (`replicate_<name>.log`); this consolidates them into a single
//! document under `<datadir>/replication` since there is no benefit to the
//! split once each peer's state is a few plain fields.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_derive::{Deserialize, Serialize};

use crate::error::CResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerState {
    pub peer_node_name: String,
    /// Timestamp to pass as `checkpoint` on this peer's next pull.
    pub checkpoint: i64,
    /// Unix seconds of the last pull attempt, successful or not.
    pub last_job_at: i64,
    /// Timestamp of the newest record actually applied from this peer.
    pub last_timestamp: i64,
    pub last_error: Option<String>,
}

impl PeerState {
    fn fresh(peer_node_name: &str) -> Self {
        PeerState {
            peer_node_name: peer_node_name.to_string(),
            checkpoint: 0,
            last_job_at: 0,
            last_timestamp: 0,
            last_error: None,
        }
    }
}

/// Durable, file-backed store of every configured peer's replication
/// progress. Safe to share across the worker tasks (one per peer) via
/// `Arc`.
pub struct ReplicationState {
    path: PathBuf,
    peers: RwLock<HashMap<String, PeerState>>,
}

impl ReplicationState {
    pub fn open(path: impl AsRef<Path>) -> CResult<Self> {
        let path = path.as_ref().to_path_buf();
        let peers = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() { HashMap::new() } else { serde_json::from_str(&raw)? }
        } else {
            HashMap::new()
        };
        Ok(ReplicationState { path, peers: RwLock::new(peers) })
    }

    /// Returns the peer's current state, or a fresh zero-checkpoint state
    /// if this peer has never been recorded before.
    pub fn get(&self, peer_node_name: &str) -> CResult<PeerState> {
        let peers = self.peers.read()?;
        Ok(peers.get(peer_node_name).cloned().unwrap_or_else(|| PeerState::fresh(peer_node_name)))
    }

    /// Replaces the peer's state and persists the whole document to disk.
    pub fn put(&self, state: PeerState) -> CResult<()> {
        {
            let mut peers = self.peers.write()?;
            peers.insert(state.peer_node_name.clone(), state);
        }
        self.persist()
    }

    pub fn snapshot(&self) -> CResult<HashMap<String, PeerState>> {
        Ok(self.peers.read()?.clone())
    }

    fn persist(&self) -> CResult<()> {
        let peers = self.peers.read()?;
        let json = serde_json::to_string_pretty(&*peers)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, json)?;
        Ok(())
    }
}
