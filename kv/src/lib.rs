//! `mvkv` is the storage and replication core of a small multi-version,
//! multi-node key-value store. A write never overwrites a previous
//! version: every `put` appends a new `(timestamp, node_id)`-versioned
//! record, and nodes converge on the same state by pulling each other's
//! append-only change logs and resolving conflicts last-writer-wins.
//!
//! This crate only defines the storage engine, the versioning scheme, and
//! the `replication::PeerClient` contract a transport must implement; the
//! HTTP server, HTTP peer client, and CLI entrypoint live in `mvkv-cli`.

pub mod clock;
pub mod codec;
pub mod entry;
pub mod error;
pub mod log;
pub mod node;
pub mod replication;
pub mod storage;

