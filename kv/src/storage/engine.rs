//! The storage engine contract. A composite key is just a byte string to
//! this layer; ordering, versioning, and LWW resolution all live above it
//! in `node::Node`. Implementations are assumed internally thread-safe
//! for any number of concurrent readers plus callers of the batch writes
//! (`Node` still serializes writes to a given real key via its striped
//! lock table, but the engine itself must tolerate concurrent calls from
//! different keys without external synchronization).

use crate::error::CResult;

/// Returned by a `seek` callback to drive the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// Advance to the next greater key and call back again.
    Next,
    /// Advance to the next lesser key and call back again.
    Prev,
    /// Stop iterating.
    Abort,
}

pub trait Engine: Send + Sync {
    /// Returns the greatest stored key `<= key`, and its value, or `None`
    /// if no such key exists. This is the engine's one read primitive;
    /// `Node::get`/`get_version` both reduce to a single `get_floor` call
    /// against an appropriately constructed probe key.
    fn get_floor(&self, key: &[u8]) -> CResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Writes every `(key, value)` pair. Implementations need not provide
    /// cross-process atomicity, only that a caller never observes a
    /// partially-applied batch through `get_floor`/`seek` (single-process
    /// serialization under the engine's own lock is sufficient).
    fn put_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> CResult<()>;

    /// Removes every given key. Missing keys are not an error.
    fn delete_batch(&self, keys: &[Vec<u8>]) -> CResult<()>;

    /// Starts at the smallest stored key `>= start`, repeatedly invoking
    /// `cb(key, value)` and moving the cursor according to its returned
    /// [`CursorStep`] until `cb` returns `Abort` or the cursor runs off
    /// either end of the keyspace.
    fn seek(&self, start: &[u8], cb: &mut dyn FnMut(&[u8], &[u8]) -> CursorStep) -> CResult<()>;
}
