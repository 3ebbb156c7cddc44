//! CLI entrypoint, configuration, logging, and the axum/reqwest HTTP
//! transport for `mvkv`. The storage engine, versioning scheme, and
//! replication contracts themselves live in the `mvkv` library crate;
//! everything here is transport and process plumbing.

pub mod config;
pub mod http;
pub mod trace;
