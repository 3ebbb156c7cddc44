//! Pull-based replication: each node periodically asks every configured
//! peer for everything changed since the last checkpoint it recorded for
//! that peer, and applies the result through `Node::put_key_pairs`, which
//! never touches the local change log — a node only ever replicates its
//! own origin writes downstream, never a peer's.

pub mod proto;
pub mod state;
pub mod worker;

pub use proto::Pairs;
pub use state::{PeerState, ReplicationState};
pub use worker::{run_peer_loop, PeerClient};
