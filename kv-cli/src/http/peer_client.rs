//! The reqwest-based `PeerClient`: pulls a protobuf-framed `Pairs` batch
//! from a friend node's `/replicate` route.

use async_trait::async_trait;
use prost::Message;

use mvkv::error::{CResult, Error};
use mvkv::replication::{Pairs, PeerClient};

pub struct HttpPeerClient {
    base_url: String,
    self_name: String,
    http: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(scheme: &str, addr: &str, self_name: String) -> Self {
        HttpPeerClient { base_url: format!("{}://{}", scheme, addr), self_name, http: reqwest::Client::new() }
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn pull(&self, checkpoint: i64, count: usize) -> CResult<Pairs> {
        let url = format!("{}/replicate", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("ver", checkpoint.to_string()), ("n", count.to_string()), ("me", self.self_name.clone())])
            .send()
            .await
            .map_err(|e| Error::Transient(format!("replicate request to {}: {}", self.base_url, e)))?;

        if !resp.status().is_success() {
            return Err(Error::Transient(format!("replicate {} returned {}", self.base_url, resp.status())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Transient(format!("reading replicate response from {}: {}", self.base_url, e)))?;

        Pairs::decode(bytes.as_ref()).map_err(|e| Error::Corruption(format!("malformed Pairs from {}: {}", self.base_url, e)))
    }
}
