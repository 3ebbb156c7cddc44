//! The composite-key codec: packs `(real_key, version, node_id)` into a
//! single ordered byte string so that every write becomes an immutable,
//! lexicographically ordered record in the underlying engine.
//!
//! Layout: `real_key ‖ BE8(ts) ‖ node_id`. Since `ts` fits in 56 bits, the
//! leading byte of its big-endian encoding is always `0x00`; that byte is
//! simultaneously the delimiter between `real_key` and the 16-byte trailer
//! and the high byte of the timestamp. A real key may not itself contain
//! `0x00`, so the delimiter position is unambiguous on decode.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{CResult, Error};

/// Size in bytes of a node id.
pub const NODE_ID_LEN: usize = 8;
/// Size in bytes of the big-endian timestamp field (including its
/// always-zero high byte).
const TS_LEN: usize = 8;
/// Size in bytes of the full trailer (timestamp + node id).
const TRAILER_LEN: usize = TS_LEN + NODE_ID_LEN;

pub type NodeId = [u8; NODE_ID_LEN];

/// `0xff` repeated `NODE_ID_LEN` times; the greatest possible node id,
/// used to build upper-bound probes.
pub const MAX_NODE_ID: NodeId = [0xff; NODE_ID_LEN];

/// Rejects keys that are empty or contain a `0x00` byte — both would make
/// the composite-key delimiter ambiguous.
pub fn validate_real_key(key: &[u8]) -> CResult<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key is empty".into()));
    }
    if key.contains(&0) {
        return Err(Error::InvalidKey("key contains a 0x00 byte".into()));
    }
    Ok(())
}

/// Encodes `real_key ‖ BE8(ts) ‖ node_id` into a fresh byte vector. Does
/// not validate `real_key`; callers on the write path validate once up
/// front via [`validate_real_key`].
pub fn encode(real_key: &[u8], ts: i64, node_id: &NodeId) -> Vec<u8> {
    debug_assert!(ts >= 0 && ts >> 56 == 0, "timestamp must fit in 56 bits");
    let mut buf = Vec::with_capacity(real_key.len() + TRAILER_LEN);
    buf.extend_from_slice(real_key);
    let mut ts_buf = [0u8; TS_LEN];
    BigEndian::write_i64(&mut ts_buf, ts);
    buf.extend_from_slice(&ts_buf);
    buf.extend_from_slice(node_id);
    buf
}

/// Builds the exact composite key a given node would have written for
/// `(real_key, ts)` — used for point lookups of a specific version written
/// by `node_id`.
pub fn encode_probe(real_key: &[u8], ts: i64, node_id: &NodeId) -> Vec<u8> {
    encode(real_key, ts, node_id)
}

/// Builds a probe whose node id is maxed out, so that a floor lookup
/// (`get_floor`) against it returns the newest version of `real_key` with
/// timestamp `<= ts`, regardless of which node wrote it.
pub fn upper_probe(real_key: &[u8], ts: i64) -> Vec<u8> {
    encode(real_key, ts, &MAX_NODE_ID)
}

/// Decodes a stored composite key into `(real_key, ts, node_id)`. Returns
/// [`Error::Corruption`] if the trailer layout is invalid.
pub fn decode(bytes: &[u8]) -> CResult<(&[u8], i64, NodeId)> {
    if bytes.len() <= TRAILER_LEN {
        return Err(Error::Corruption(format!(
            "composite key too short: {} bytes",
            bytes.len()
        )));
    }
    let split = bytes.len() - TRAILER_LEN;
    let real_key = &bytes[..split];
    let trailer = &bytes[split..];
    if trailer[0] != 0 {
        return Err(Error::Corruption("timestamp high byte must be zero".into()));
    }
    let ts = BigEndian::read_i64(&trailer[..TS_LEN]);
    let mut node_id = [0u8; NODE_ID_LEN];
    node_id.copy_from_slice(&trailer[TS_LEN..]);
    Ok((real_key, ts, node_id))
}

/// True if `composite` decodes to a version of `real_key`: the first
/// `len(real_key)` bytes equal `real_key` exactly, which is unambiguous
/// because real keys cannot contain 0x00.
pub fn belongs_to(composite: &[u8], real_key: &[u8]) -> bool {
    match decode(composite) {
        Ok((decoded_key, _, _)) => decoded_key == real_key,
        Err(_) => false,
    }
}
