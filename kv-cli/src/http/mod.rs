//! The axum HTTP server: wires `handlers` routes onto `AppState`. The
//! `kv::node::Node`/`kv::replication` core never depends on axum itself —
//! this module is the only place the wire routes exist.

pub mod handlers;
pub mod peer_client;
pub mod response;

use axum::routing::{get, post};
use axum::Router;

pub use handlers::AppState;
pub use peer_client::HttpPeerClient;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/put", get(handlers::put).post(handlers::put))
        .route("/delete", get(handlers::delete).post(handlers::delete))
        .route("/get", get(handlers::get))
        .route("/range", get(handlers::range))
        .route("/replicate", get(handlers::replicate))
        .route("/purge", post(handlers::purge))
        .route("/info", get(handlers::info))
        .with_state(state)
}
