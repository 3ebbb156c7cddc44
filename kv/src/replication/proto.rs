//! Wire format for a replication pull. A batch is a flat list of
//! `(composite_key, value)` pairs straight out of the engine plus the
//! checkpoint a peer should resume from. Keys travel as full composite
//! keys rather than decomposed `(key, version, node_id)` triples, since
//! the composite key already encodes both and the puller never needs to
//! take it apart before handing it to `put_key_pairs`. Hand-derived
//! `prost::Message` impls instead of a `.proto`/`protoc` build step.

use prost::Message;

#[derive(Clone, PartialEq, Eq, Message)]
pub struct Entry {
    /// The full `real_key ‖ ts ‖ node_id` composite key, verbatim from the
    /// serving node's engine.
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,

    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct Pairs {
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<Entry>,

    /// Checkpoint to pass as `checkpoint` on the next pull.
    #[prost(int64, tag = "2")]
    pub next: i64,

    /// The serving node's identity, string-rendered (URL-safe base64, the
    /// same alphabet `Node::short_id` uses for display) so a puller can
    /// tell which peer it is actually talking to.
    #[prost(string, tag = "3")]
    pub node_internal_name: String,
}

impl From<(Vec<(Vec<u8>, Vec<u8>)>, i64, [u8; 8])> for Pairs {
    fn from((pairs, next, node_id): (Vec<(Vec<u8>, Vec<u8>)>, i64, [u8; 8])) -> Self {
        Pairs {
            data: pairs.into_iter().map(|(key, value)| Entry { key, value }).collect(),
            next,
            node_internal_name: base64::encode_config(node_id, base64::URL_SAFE_NO_PAD),
        }
    }
}

impl Pairs {
    /// The pairs in a shape `Node::put_key_pairs` accepts directly.
    pub fn into_key_value_pairs(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data.into_iter().map(|e| (e.key, e.value)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let pairs = Pairs {
            data: vec![Entry { key: b"a-key".to_vec(), value: b"v".to_vec() }],
            next: 42,
            node_internal_name: "node-a".to_string(),
        };
        let encoded = pairs.encode_to_vec();
        let decoded = Pairs::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded, pairs);
    }
}
