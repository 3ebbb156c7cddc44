//! Route handlers for the HTTP surface: `/put`, `/delete`, `/get`,
//! `/range`, `/replicate`, plus the `/purge` and `/info` admin routes.
//! Every handler takes its arguments from the query string rather than a
//! JSON body, and `/put`/`/delete` answer on both GET and POST.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use log::info;
use serde_derive::{Deserialize, Serialize};

use mvkv::entry::Entry;
use mvkv::node::Node;
use mvkv::replication::{PeerState, ReplicationState};

use super::response::{binary_response, json_response, ApiError};

#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub replication: Arc<ReplicationState>,
}

fn truthy(flag: Option<u8>) -> bool {
    flag.unwrap_or(0) != 0
}

#[derive(Debug, Deserialize)]
pub struct PutParams {
    key: String,
    value: String,
    old_value: Option<String>,
    append: Option<u8>,
    pretty: Option<u8>,
}

pub async fn put(State(state): State<AppState>, Query(p): Query<PutParams>) -> Result<Response, ApiError> {
    let key = p.key.into_bytes();
    let value = p.value.into_bytes();

    if let Some(old) = p.old_value {
        #[cfg(feature = "cas")]
        {
            let entry = state.node.cas_put(&key, old.as_bytes(), &value)?;
            return Ok(json_response(&entry, truthy(p.pretty)));
        }
        #[cfg(not(feature = "cas"))]
        {
            let _ = old;
            return Err(mvkv::error::Error::InvalidKey("old_value requires the cas feature".into()).into());
        }
    }

    if truthy(p.append) {
        #[cfg(feature = "append")]
        {
            let ts = state.node.append_put(&key, &value)?;
            return Ok(json_response(&serde_json::json!({ "version": ts }), truthy(p.pretty)));
        }
        #[cfg(not(feature = "append"))]
        {
            return Err(mvkv::error::Error::InvalidKey("append=1 requires the append feature".into()).into());
        }
    }

    let ts = state.node.put(&key, &value)?;
    Ok(json_response(&serde_json::json!({ "version": ts }), truthy(p.pretty)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    key: String,
    pretty: Option<u8>,
}

pub async fn delete(State(state): State<AppState>, Query(p): Query<DeleteParams>) -> Result<Response, ApiError> {
    let ts = state.node.delete(p.key.as_bytes())?;
    Ok(json_response(&serde_json::json!({ "version": ts }), truthy(p.pretty)))
}

#[derive(Debug, Deserialize)]
pub struct GetParams {
    key: String,
    ver: Option<i64>,
    all_versions: Option<u8>,
    n: Option<usize>,
    key_only: Option<u8>,
    binary: Option<u8>,
    pretty: Option<u8>,
}

#[derive(Serialize)]
struct VersionsBody {
    data: Vec<Entry>,
    next: Option<i64>,
}

pub async fn get(State(state): State<AppState>, Query(p): Query<GetParams>) -> Result<Response, ApiError> {
    let key_only = truthy(p.key_only);
    let pretty = truthy(p.pretty);
    let key = p.key.as_bytes();

    if truthy(p.all_versions) {
        let (entries, next) = state.node.get_all_versions(key, p.ver.unwrap_or(0), p.n.unwrap_or(100), key_only)?;
        return Ok(json_response(&VersionsBody { data: entries, next }, pretty));
    }

    let entry = match p.ver {
        Some(ver) => state.node.get_version(key, ver)?,
        None => state.node.get(key)?,
    };

    if truthy(p.binary) {
        return Ok(binary_response(entry.value));
    }
    Ok(json_response(&entry, pretty))
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    key: String,
    end_key: Option<String>,
    n: Option<usize>,
    desc: Option<u8>,
    include_deleted: Option<u8>,
    key_only: Option<u8>,
    pretty: Option<u8>,
}

#[derive(Serialize)]
struct RangeBody {
    data: Vec<Entry>,
    next: Option<String>,
}

pub async fn range(State(state): State<AppState>, Query(p): Query<RangeParams>) -> Result<Response, ApiError> {
    let end_key = p.end_key.as_ref().map(|s| s.as_bytes());
    let (entries, next) = state.node.range(
        p.key.as_bytes(),
        end_key,
        p.n.unwrap_or(100),
        truthy(p.key_only),
        truthy(p.include_deleted),
        truthy(p.desc),
    )?;
    let next = next.map(|k| String::from_utf8_lossy(&k).into_owned());
    Ok(json_response(&RangeBody { data: entries, next }, truthy(p.pretty)))
}

#[derive(Debug, Deserialize)]
pub struct PurgeParams {
    /// Composite keys to remove, base64 (URL-safe, no pad) encoded, `;`-separated.
    keys: String,
    pretty: Option<u8>,
}

pub async fn purge(State(state): State<AppState>, Query(p): Query<PurgeParams>) -> Result<Response, ApiError> {
    let keys: Vec<Vec<u8>> = p
        .keys
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|s| base64::decode_config(s, base64::URL_SAFE_NO_PAD))
        .collect::<Result<_, _>>()
        .map_err(|e| mvkv::error::Error::InvalidKey(format!("bad base64 key: {}", e)))?;
    state.node.purge(&keys)?;
    Ok(json_response(&serde_json::json!({ "purged": keys.len() }), truthy(p.pretty)))
}

#[derive(Debug, Deserialize)]
pub struct ReplicateParams {
    /// Checkpoint to resume from (the requester's last-seen `next`).
    ver: Option<i64>,
    n: Option<usize>,
    me: Option<String>,
}

pub async fn replicate(State(state): State<AppState>, Query(p): Query<ReplicateParams>) -> Response {
    if let Some(peer) = &p.me {
        info!("serving replication pull from {}", peer);
    }
    let (pairs, next) = match state.node.changed_keys_since(p.ver.unwrap_or(0), p.n.unwrap_or(256)) {
        Ok(v) => v,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let msg: mvkv::replication::Pairs = (pairs, next, state.node.node_id()).into();
    binary_response(prost::Message::encode_to_vec(&msg))
}

#[derive(Debug, Deserialize)]
pub struct InfoParams {
    pretty: Option<u8>,
}

#[derive(Serialize)]
struct InfoBody {
    node_id: String,
    short_id: String,
    genesis: Option<i64>,
    log_size: u64,
    peers: std::collections::HashMap<String, PeerState>,
}

pub async fn info(State(state): State<AppState>, Query(p): Query<InfoParams>) -> Result<Response, ApiError> {
    let body = InfoBody {
        node_id: base64::encode_config(state.node.node_id(), base64::URL_SAFE_NO_PAD),
        short_id: state.node.short_id(),
        genesis: state.node.genesis()?,
        log_size: state.node.log_size()?,
        peers: state.replication.snapshot()?,
    };
    Ok(json_response(&body, truthy(p.pretty)))
}
