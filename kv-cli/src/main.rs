use std::panic;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use mvkv::node::Node;
use mvkv::replication::{run_peer_loop, ReplicationState};
use mvkv::storage::FileEngine;

use kvcli::config::Args;
use kvcli::http::{router, AppState, HttpPeerClient};
use kvcli::trace;

#[tokio::main]
pub async fn main() -> Result<()> {
    setup_panic_hooks();

    eprintln!();
    eprintln!("██  ██  █        █");
    eprintln!("██ ██   ██      ██");
    eprintln!("███      ██    ██");
    eprintln!("██ ██     ██  ██");
    eprintln!("██  ██     ████  mvkv");
    eprintln!();

    let mut args = Args::parse();
    args.apply_file_overlay().context("loading --config overlay")?;

    let log_dir = format!("{}/.mvkvcli", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &args.log_level).await?;
    info!("mvkv-cli starting: {:?}", &args);

    std::fs::create_dir_all(&args.data_dir).context("creating data dir")?;
    let engine = Arc::new(FileEngine::open(args.data_dir.join("mvkv.db")).context("opening storage engine")?);
    let node = Arc::new(Node::open(engine, args.data_dir.join("mvkv.log")).context("opening change log")?);
    info!("node identity: {}", node.short_id());

    let replication = Arc::new(ReplicationState::open(args.data_dir.join("replication"))?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut worker_handles = Vec::new();
    for friend in args.friends() {
        let client: Arc<dyn mvkv::replication::PeerClient> =
            Arc::new(HttpPeerClient::new(&friend.scheme, &friend.addr, args.node_name.clone()));
        info!("replicating from friend {} at {}", friend.name, friend.addr);
        worker_handles.push(tokio::spawn(run_peer_loop(
            node.clone(),
            replication.clone(),
            friend.name,
            client,
            shutdown_rx.clone(),
        )));
    }

    let state = AppState { node: node.clone(), replication: replication.clone() };
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&args.bind).await.context("binding HTTP listener")?;
    info!("listening on {}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("HTTP server failed")?;

    for handle in worker_handles {
        let _ = handle.await;
    }

    Ok(())
}

fn setup_panic_hooks() {
    let meta = human_panic::Metadata {
        version: env!("CARGO_PKG_VERSION").into(),
        name: env!("CARGO_PKG_NAME").into(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    };

    let default_hook = panic::take_hook();
    if std::env::var("RUST_BACKTRACE").is_err() {
        panic::set_hook(Box::new(move |info: &panic::PanicInfo| {
            default_hook(info);
            let file_path = human_panic::handle_dump(&meta, info);
            human_panic::print_msg(file_path, &meta).expect("human-panic: printing error message to console failed");
        }));
    }
}
