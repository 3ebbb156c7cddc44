//! Stored-value kinds and the user-visible [`Entry`] record. A raw value's
//! 16-byte prefix discriminates between a normal value, a deletion
//! tombstone, and the mutually-exclusive CAS/append envelope (selected at
//! compile time by the `cas`/`append` Cargo features — see
//! `SECOND_UUID_KIND` below).

use serde_derive::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::codec;

#[cfg(all(feature = "cas", feature = "append"))]
compile_error!("features `cas` and `append` are mutually exclusive; enable exactly one");
#[cfg(not(any(feature = "cas", feature = "append")))]
compile_error!("exactly one of features `cas` or `append` must be enabled");

/// Marks a stored value as a deletion tombstone.
pub const DEL_UUID: [u8; 16] = [
    0x91, 0xee, 0x48, 0xda, 0x52, 0x75, 0x4e, 0xc7, 0xa5, 0x76, 0xcb, 0x80, 0xad, 0x1c, 0x12, 0x03,
];

/// The second reserved UUID: marks a CAS envelope when the `cas` feature
/// is active, or an append envelope when `append` is active. The two
/// meanings share this slot and must never coexist in one build.
pub const SECOND_UUID: [u8; 16] = [
    0x92, 0xef, 0x49, 0xdb, 0x53, 0x76, 0x4f, 0xc8, 0xa6, 0x77, 0xcc, 0x81, 0xae, 0x1d, 0x13, 0x04,
];

#[cfg(feature = "cas")]
pub const CAS_UUID: [u8; 16] = SECOND_UUID;
#[cfg(feature = "append")]
pub const APP_UUID: [u8; 16] = SECOND_UUID;

/// Decoded meaning of a raw stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind<'a> {
    Normal(&'a [u8]),
    Deletion,
    #[cfg(feature = "cas")]
    Cas { old: &'a [u8], new: &'a [u8] },
    #[cfg(feature = "append")]
    Append { delta: &'a [u8] },
}

/// Classifies a raw stored value by its 16-byte prefix.
pub fn classify(raw: &[u8]) -> ValueKind<'_> {
    if raw == DEL_UUID {
        return ValueKind::Deletion;
    }
    #[cfg(feature = "cas")]
    if raw.len() >= 16 && raw[..16] == CAS_UUID {
        let rest = &raw[16..];
        // CAS envelope: CAS_UUID ‖ oldValue ‖ CAS_UUID ‖ newValue.
        if let Some(pos) = find_subslice(rest, &CAS_UUID) {
            return ValueKind::Cas { old: &rest[..pos], new: &rest[pos + 16..] };
        }
    }
    #[cfg(feature = "append")]
    if raw.len() >= 16 && raw[..16] == APP_UUID {
        return ValueKind::Append { delta: &raw[16..] };
    }
    ValueKind::Normal(raw)
}

#[cfg(feature = "cas")]
fn find_subslice(haystack: &[u8], needle: &[u8; 16]) -> Option<usize> {
    haystack.windows(16).position(|w| w == needle)
}

#[cfg(feature = "cas")]
pub fn encode_cas(old: &[u8], new: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + old.len() + new.len());
    buf.extend_from_slice(&CAS_UUID);
    buf.extend_from_slice(old);
    buf.extend_from_slice(&CAS_UUID);
    buf.extend_from_slice(new);
    buf
}

#[cfg(feature = "append")]
pub fn encode_append(delta: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + delta.len());
    buf.extend_from_slice(&APP_UUID);
    buf.extend_from_slice(delta);
    buf
}

/// A user-visible, fully-resolved record: the real key, the version that
/// produced it, the writing node's id, and its value (or deletion state).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    #[serde(with = "bytes_b64")]
    pub key: Vec<u8>,
    #[serde(with = "bytes_b64")]
    pub value: Vec<u8>,
    pub version: i64,
    #[serde(with = "node_id_hex")]
    pub node_id: codec::NodeId,
    pub deleted: bool,
}

impl Entry {
    pub fn from_composite(composite: &[u8], raw_value: &[u8], key_only: bool) -> crate::error::CResult<Self> {
        let (key, version, node_id) = codec::decode(composite)?;
        let (value, deleted) = match classify(raw_value) {
            ValueKind::Deletion => (Vec::new(), true),
            #[cfg(feature = "cas")]
            ValueKind::Cas { .. } => (raw_value.to_vec(), false),
            #[cfg(feature = "append")]
            ValueKind::Append { .. } => (raw_value.to_vec(), false),
            ValueKind::Normal(v) => (v.to_vec(), false),
        };
        Ok(Entry {
            key: key.to_vec(),
            value: if key_only { Vec::new() } else { value },
            version,
            node_id,
            deleted,
        })
    }

    /// Unix-seconds presentation of this entry's version.
    pub fn unix_secs(&self) -> i64 {
        Clock::unix_sec(self.version)
    }
}

mod node_id_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &[u8; 8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::encode_config(id, base64::URL_SAFE_NO_PAD))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 8], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = base64::decode_config(s.as_bytes(), base64::URL_SAFE_NO_PAD)
            .map_err(serde::de::Error::custom)?;
        let mut id = [0u8; 8];
        if bytes.len() != 8 {
            return Err(serde::de::Error::custom("node id must be 8 bytes"));
        }
        id.copy_from_slice(&bytes);
        Ok(id)
    }
}

/// `key`/`value` are arbitrary bytes, not necessarily UTF-8, so JSON
/// renders them base64-encoded rather than as a JSON array of numbers
/// (matching a JSON API's usual treatment of opaque byte strings).
mod bytes_b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::encode_config(bytes, base64::URL_SAFE_NO_PAD))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::decode_config(s.as_bytes(), base64::URL_SAFE_NO_PAD).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_deletion() {
        assert_eq!(classify(&DEL_UUID), ValueKind::Deletion);
    }

    #[test]
    fn classifies_normal() {
        assert_eq!(classify(b"hello"), ValueKind::Normal(b"hello"));
    }

    #[cfg(feature = "cas")]
    #[test]
    fn round_trips_cas_envelope() {
        let raw = encode_cas(b"old", b"new");
        match classify(&raw) {
            ValueKind::Cas { old, new } => {
                assert_eq!(old, b"old");
                assert_eq!(new, b"new");
            }
            other => panic!("expected Cas, got {:?}", other),
        }
    }

    #[cfg(feature = "append")]
    #[test]
    fn round_trips_append_envelope() {
        let raw = encode_append(b"delta");
        match classify(&raw) {
            ValueKind::Append { delta } => assert_eq!(delta, b"delta"),
            other => panic!("expected Append, got {:?}", other),
        }
    }
}
