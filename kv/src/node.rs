//! The node core: owns the engine and change log, assigns versions,
//! serializes per-key writes, and implements every read-path algorithm
//! (point read, point read at a version, descending version scan, merged
//! range scan) described by the composite-key model in `codec`/`entry`.

use std::sync::{Arc, Mutex};

use rand::RngCore;

use crate::codec::{self, NodeId};
use crate::entry::{self, Entry};
use crate::error::{CResult, Error};
use crate::log::ChangeLog;
use crate::storage::{CursorStep, Engine};

/// The only stored key that is not a composite key. Holds this node's
/// randomly-generated identity, created on first open and reused
/// thereafter. All scans must skip it.
pub const SENTINEL_IDENTITY_KEY: &[u8] = b"_internal_node_name";

/// A write or read past this many CAS/append envelope hops is treated as
/// corrupt rather than looped over forever.
const MAX_ENVELOPE_DEPTH: u32 = 10;

/// The greatest timestamp representable in the codec's 56-bit field.
pub const MAX_TIMESTAMP: i64 = (1 << 56) - 1;

pub struct Node {
    engine: Arc<dyn Engine>,
    log: ChangeLog,
    node_id: NodeId,
    stripes: Vec<Mutex<()>>,
}

impl Node {
    /// Opens a node over `engine`, using (creating if absent) the change
    /// log at `log_path`. Node identity is loaded from the engine's
    /// sentinel key, or generated and persisted if this is a first boot.
    pub fn open(engine: Arc<dyn Engine>, log_path: impl AsRef<std::path::Path>) -> CResult<Self> {
        let log = ChangeLog::open(log_path)?;
        let node_id = Self::load_or_create_identity(&engine)?;
        let stripes = (0..65536).map(|_| Mutex::new(())).collect();
        Ok(Node { engine, log, node_id, stripes })
    }

    fn load_or_create_identity(engine: &Arc<dyn Engine>) -> CResult<NodeId> {
        if let Some((k, v)) = engine.get_floor(SENTINEL_IDENTITY_KEY)? {
            if k == SENTINEL_IDENTITY_KEY && v.len() == codec::NODE_ID_LEN {
                let mut id = [0u8; codec::NODE_ID_LEN];
                id.copy_from_slice(&v);
                return Ok(id);
            }
        }
        let mut id = [0u8; codec::NODE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut id);
        engine.put_batch(&[(SENTINEL_IDENTITY_KEY.to_vec(), id.to_vec())])?;
        Ok(id)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// First 10 characters of this node's URL-safe base64 id, for
    /// human-facing display.
    pub fn short_id(&self) -> String {
        let full = base64::encode_config(&self.node_id, base64::URL_SAFE_NO_PAD);
        full.chars().take(10).collect()
    }

    pub fn genesis(&self) -> CResult<Option<i64>> {
        self.log.genesis()
    }

    pub fn log_size(&self) -> CResult<u64> {
        self.log.size()
    }

    fn stripe(&self, key: &[u8]) -> CResult<std::sync::MutexGuard<'_, ()>> {
        let idx = (fnv1a(key) as usize) % self.stripes.len();
        Ok(self.stripes[idx].lock()?)
    }

    /// Writes a fresh version of `key`, under the per-key write lock.
    /// Returns the timestamp that was assigned.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CResult<i64> {
        codec::validate_real_key(key)?;
        let _guard = self.stripe(key)?;
        let ts = self.log.append(key)?;
        self.engine.put_batch(&[(codec::encode(key, ts, &self.node_id), value.to_vec())])?;
        Ok(ts)
    }

    pub fn delete(&self, key: &[u8]) -> CResult<i64> {
        self.put(key, &entry::DEL_UUID)
    }

    /// Conditionally replaces `key`'s current value with `new` if it
    /// currently equals `old`, under the same per-key lock as the read
    /// that decides whether the write happens. Returns the entry the
    /// caller should compare against `old`/`new` to detect whether the
    /// swap actually fired.
    #[cfg(feature = "cas")]
    pub fn cas_put(&self, key: &[u8], old: &[u8], new: &[u8]) -> CResult<Entry> {
        codec::validate_real_key(key)?;
        let _guard = self.stripe(key)?;
        let current = self.get(key)?;
        if current.value != old {
            return Ok(current);
        }
        let ts = self.log.append(key)?;
        let raw = entry::encode_cas(old, new);
        self.engine.put_batch(&[(codec::encode(key, ts, &self.node_id), raw)])?;
        Ok(Entry { key: key.to_vec(), value: new.to_vec(), version: ts, node_id: self.node_id, deleted: false })
    }

    /// Writes `delta` as an append envelope at a fresh version. Reading
    /// back via `get` concatenates it onto the previous version's value.
    #[cfg(feature = "append")]
    pub fn append_put(&self, key: &[u8], delta: &[u8]) -> CResult<i64> {
        codec::validate_real_key(key)?;
        let _guard = self.stripe(key)?;
        let ts = self.log.append(key)?;
        let raw = entry::encode_append(delta);
        self.engine.put_batch(&[(codec::encode(key, ts, &self.node_id), raw)])?;
        Ok(ts)
    }

    /// Bypasses versioning entirely and removes raw composite keys.
    /// Operator-only: this destroys history, unlike `delete`.
    pub fn purge(&self, composite_keys: &[Vec<u8>]) -> CResult<()> {
        self.engine.delete_batch(composite_keys)
    }

    /// Latest non-deleted version of `key` as of now, resolving any
    /// CAS/append envelope chain.
    pub fn get(&self, key: &[u8]) -> CResult<Entry> {
        codec::validate_real_key(key)?;
        self.resolve(key, self.log.now(), 0)
    }

    fn resolve(&self, key: &[u8], as_of_ts: i64, depth: u32) -> CResult<Entry> {
        if depth > MAX_ENVELOPE_DEPTH {
            return Err(Error::DeepCas);
        }
        let probe = codec::upper_probe(key, as_of_ts);
        let Some((k, v)) = self.engine.get_floor(&probe)? else {
            return Err(Error::NotFound);
        };
        if !codec::belongs_to(&k, key) {
            return Err(Error::NotFound);
        }
        let (_, version, node_id) = codec::decode(&k)?;

        match entry::classify(&v) {
            entry::ValueKind::Deletion => Err(Error::NotFound),
            #[cfg(feature = "append")]
            entry::ValueKind::Append { delta } => match self.resolve(key, version - 1, depth + 1) {
                Ok(prev) => Ok(Entry {
                    key: key.to_vec(),
                    value: [prev.value, delta.to_vec()].concat(),
                    version,
                    node_id,
                    deleted: false,
                }),
                Err(Error::NotFound) => {
                    Ok(Entry { key: key.to_vec(), value: delta.to_vec(), version, node_id, deleted: false })
                }
                Err(e) => Err(e),
            },
            #[cfg(feature = "cas")]
            entry::ValueKind::Cas { old, new } => match self.resolve(key, version - 1, depth + 1) {
                Ok(prev) if prev.value == old => {
                    Ok(Entry { key: key.to_vec(), value: new.to_vec(), version, node_id, deleted: false })
                }
                Ok(prev) => Ok(prev),
                Err(e) => Err(e),
            },
            entry::ValueKind::Normal(raw) => {
                Ok(Entry { key: key.to_vec(), value: raw.to_vec(), version, node_id, deleted: false })
            }
        }
    }

    /// The exact version `ver` of `key`, without resolving any
    /// CAS/append envelope (the envelope itself is returned verbatim).
    pub fn get_version(&self, key: &[u8], ver: i64) -> CResult<Entry> {
        codec::validate_real_key(key)?;
        let probe = codec::encode_probe(key, ver, &self.node_id);
        let Some((k, v)) = self.engine.get_floor(&probe)? else {
            return Err(Error::NotFound);
        };
        if k != probe {
            return Err(Error::NotFound);
        }
        let found = Entry::from_composite(&k, &v, false)?;
        if found.deleted {
            return Err(Error::NotFound);
        }
        Ok(found)
    }

    /// Every version of `key` with timestamp `<= start_ts` (or unbounded
    /// if `start_ts == 0`), newest first. Returns up to `count` entries
    /// plus a `next` cursor (the timestamp to pass as `start_ts` on the
    /// following call) when more remain.
    pub fn get_all_versions(
        &self,
        key: &[u8],
        start_ts: i64,
        count: usize,
        key_only: bool,
    ) -> CResult<(Vec<Entry>, Option<i64>)> {
        codec::validate_real_key(key)?;
        let effective_start = if start_ts != 0 { start_ts } else { MAX_TIMESTAMP };
        let upper = codec::upper_probe(key, effective_start);

        let mut results = Vec::new();
        let mut next = None;
        let mut err = None;
        let mut skip_first = true;

        self.engine.seek(&upper, &mut |k, v| {
            if skip_first {
                skip_first = false;
                return CursorStep::Prev;
            }
            if k == SENTINEL_IDENTITY_KEY {
                return CursorStep::Prev;
            }
            if !codec::belongs_to(k, key) {
                return CursorStep::Abort;
            }
            match Entry::from_composite(k, v, key_only) {
                Ok(e) => results.push(e),
                Err(e) => {
                    err = Some(e);
                    return CursorStep::Abort;
                }
            }
            if results.len() == count + 1 {
                next = Some(results.pop().expect("just pushed").version);
                return CursorStep::Abort;
            }
            CursorStep::Prev
        })?;

        if let Some(e) = err {
            return Err(e);
        }
        Ok((results, next))
    }

    /// For each distinct real key in `[start_key, end_key)` (direction
    /// reversed if `desc`; `end_key == None` means unbounded), the single
    /// latest visible version. Returns up to `count` entries and a `next`
    /// cursor key for resuming the scan.
    pub fn range(
        &self,
        start_key: &[u8],
        end_key: Option<&[u8]>,
        count: usize,
        key_only: bool,
        include_deleted: bool,
        desc: bool,
    ) -> CResult<(Vec<Entry>, Option<Vec<u8>>)> {
        let mut collected = Vec::new();
        let mut cursor_key = start_key.to_vec();

        loop {
            let remaining = count - collected.len();
            let (partial, next) = self.range_partial(&cursor_key, end_key, remaining, key_only, desc)?;

            for e in partial {
                if e.deleted && !include_deleted {
                    continue;
                }
                collected.push(e);
                if collected.len() == count {
                    return Ok((collected, next));
                }
            }

            match next {
                Some(n) => cursor_key = n,
                None => return Ok((collected, None)),
            }
        }
    }

    fn range_partial(
        &self,
        start_key: &[u8],
        end_key: Option<&[u8]>,
        count: usize,
        key_only: bool,
        desc: bool,
    ) -> CResult<(Vec<Entry>, Option<Vec<u8>>)> {
        use std::cmp::Ordering;
        use std::collections::HashMap;

        let mut map: HashMap<Vec<u8>, Entry> = HashMap::new();
        let mut order: Vec<Vec<u8>> = Vec::new();
        let mut next: Option<Vec<u8>> = None;
        let mut err = None;
        let now = self.log.now();
        let step = if desc { CursorStep::Prev } else { CursorStep::Next };

        self.engine.seek(start_key, &mut |k, v| {
            if k == SENTINEL_IDENTITY_KEY {
                return step;
            }
            let (real_key, _ts, _node) = match codec::decode(k) {
                Ok(d) => d,
                Err(e) => {
                    err = Some(e);
                    return CursorStep::Abort;
                }
            };

            if let Some(end) = end_key {
                let cmp = real_key.cmp(end);
                let past_end = if desc { cmp != Ordering::Greater } else { cmp != Ordering::Less };
                if past_end {
                    return CursorStep::Abort;
                }
            }

            let upper = codec::upper_probe(real_key, now);
            if k > upper.as_slice() {
                return step;
            }

            let e = match Entry::from_composite(k, v, key_only) {
                Ok(e) => e,
                Err(e) => {
                    err = Some(e);
                    return CursorStep::Abort;
                }
            };
            let real_key_vec = real_key.to_vec();
            if !map.contains_key(&real_key_vec) {
                order.push(real_key_vec.clone());
                map.insert(real_key_vec, e);
            } else if !desc {
                map.insert(real_key_vec, e);
            }

            if order.len() == count + 1 {
                next = Some(order[count].clone());
                return CursorStep::Abort;
            }
            step
        })?;

        if let Some(e) = err {
            return Err(e);
        }
        order.truncate(count);
        let results = order.into_iter().map(|k| map.remove(&k).expect("key was just inserted")).collect();
        Ok((results, next))
    }

    /// Bulk-applies replicated `(composite_key, value)` pairs. Sorted
    /// first so the underlying engine sees a contiguous ascending batch.
    /// Never touches the change log: replicated writes are not this
    /// node's origin history, so they must not be re-replicated downstream.
    pub fn put_key_pairs(&self, mut pairs: Vec<(Vec<u8>, Vec<u8>)>) -> CResult<()> {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        self.engine.put_batch(&pairs)
    }

    /// Server side of a replication pull: walks the change log from
    /// `start_ts`, resolving up to `count` records into `(composite_key,
    /// value)` pairs verbatim from the engine. Returns the pairs and the
    /// checkpoint a peer should pass as `start_ts` on its next pull.
    pub fn changed_keys_since(&self, start_ts: i64, count: usize) -> CResult<(Vec<(Vec<u8>, Vec<u8>)>, i64)> {
        let mut cursor = self.log.cursor(start_ts)?;
        let mut results = Vec::new();
        let mut last_ts = start_ts;

        while results.len() < count && cursor.has_data() {
            let (ts, key) = cursor.data()?;
            let dbkey = codec::encode(&key, ts, &self.node_id);
            if let Some((found_key, value)) = self.engine.get_floor(&dbkey)? {
                if found_key == dbkey {
                    results.push((dbkey, value));
                    last_ts = ts;
                }
            }
            if !cursor.next()? {
                break;
            }
        }

        let next = if results.is_empty() { start_ts } else { last_ts + 1 };
        Ok((results, next))
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in data {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::MemoryEngine;

    fn open_node() -> Node {
        let path = tempdir::TempDir::new("mvkv-node").unwrap().into_path().join("mvkv.log");
        Node::open(Arc::new(MemoryEngine::new()), path).unwrap()
    }

    #[test]
    fn put_then_get_returns_latest_version() {
        let node = open_node();
        let t1 = node.put(b"k", b"").unwrap();
        let t2 = node.put(b"k", b"haha").unwrap();
        assert!(t2 > t1);

        let got = node.get(b"k").unwrap();
        assert_eq!(got.value, b"haha");
        assert_eq!(got.version, t2);

        let (versions, next) = node.get_all_versions(b"k", 0, 10, false).unwrap();
        assert_eq!(next, None);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].value, b"haha");
        assert_eq!(versions[1].value, b"");
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let node = open_node();
        node.put(b"k", b"v").unwrap();
        node.delete(b"k").unwrap();
        assert!(matches!(node.get(b"k"), Err(Error::NotFound)));
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let node = open_node();
        assert!(matches!(node.get(b"missing"), Err(Error::NotFound)));
    }

    #[test]
    fn get_version_rejects_wrong_version() {
        let node = open_node();
        let ts = node.put(b"k", b"v").unwrap();
        assert_eq!(node.get_version(b"k", ts).unwrap().value, b"v");
        assert!(matches!(node.get_version(b"k", ts + 1), Err(Error::NotFound)));
    }

    #[cfg(feature = "cas")]
    #[test]
    fn cas_put_fires_only_when_old_matches() {
        let node = open_node();
        assert!(matches!(node.cas_put(b"c", b"old", b"x"), Err(Error::NotFound)));

        node.put(b"c", b"old").unwrap();
        let fired = node.cas_put(b"c", b"old", b"x").unwrap();
        assert_eq!(fired.value, b"x");

        let not_fired = node.cas_put(b"c", b"old", b"y").unwrap();
        assert_eq!(not_fired.value, b"x");
        assert_eq!(node.get(b"c").unwrap().value, b"x");
    }

    #[test]
    fn range_excludes_deleted_by_default() {
        let node = open_node();
        node.put(b"a", b"1").unwrap();
        node.put(b"b", b"1").unwrap();
        node.put(b"c", b"1").unwrap();
        node.delete(b"b").unwrap();

        let (entries, next) = node.range(b"a", Some(b"z"), 10, false, false, false).unwrap();
        assert_eq!(next, None);
        let keys: Vec<_> = entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec()]);

        let (entries, _) = node.range(b"a", Some(b"z"), 10, false, true, false).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().find(|e| e.key == b"b").unwrap().deleted);
    }

    #[test]
    fn range_is_paginated_via_next_cursor() {
        let node = open_node();
        for k in [b"a", b"b", b"c", b"d"] {
            node.put(k, b"1").unwrap();
        }
        let (first, next) = node.range(b"a", None, 2, false, false, false).unwrap();
        assert_eq!(first.iter().map(|e| e.key.clone()).collect::<Vec<_>>(), vec![b"a".to_vec(), b"b".to_vec()]);
        let next_key = next.unwrap();
        let (second, next) = node.range(&next_key, None, 2, false, false, false).unwrap();
        assert_eq!(second.iter().map(|e| e.key.clone()).collect::<Vec<_>>(), vec![b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(next, None);
    }

    #[test]
    fn put_key_pairs_replication_is_idempotent() {
        let node = open_node();
        let ts = node.put(b"k", b"v").unwrap();
        let composite = codec::encode(b"k", ts, &node.node_id());
        let pairs = vec![(composite.clone(), b"v".to_vec())];
        node.put_key_pairs(pairs.clone()).unwrap();
        node.put_key_pairs(pairs).unwrap();
        assert_eq!(node.get(b"k").unwrap().value, b"v");
    }

    #[test]
    fn changed_keys_since_reflects_local_writes_not_replicated_ones() {
        let node = open_node();
        node.put(b"a", b"1").unwrap();
        node.put(b"b", b"2").unwrap();

        let (pairs, next) = node.changed_keys_since(0, 10).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(next > 0);

        // A replicated write never touches the log, so it must not
        // appear in a subsequent pull.
        let other_id: NodeId = [9; 8];
        let foreign_key = codec::encode(b"c", 1, &other_id);
        node.put_key_pairs(vec![(foreign_key, b"3".to_vec())]).unwrap();
        let (pairs, _) = node.changed_keys_since(0, 10).unwrap();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn short_id_is_ten_characters() {
        let node = open_node();
        assert_eq!(node.short_id().chars().count(), 10);
    }
}
