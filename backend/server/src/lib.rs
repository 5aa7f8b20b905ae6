//! Documentation of the DroneWERX forum backend.
//!
//! Warfighters post capability gaps as threads, engineers and vendors answer
//! with solutions, and sponsors put bounties on the problems they care about.
//!
//!
//!
//! # General Infrastructure
//! - Axum API behind the reverse proxy, everything under `/api`
//! - Redis holds every record, counter, session and ranking
//! - Meilisearch serves thread search, fed from Redis by a background sync
//! - MinIO stores attachments, clients download through presigned URLs
//! - Containers talk to each other by service name on the internal network
//!
//!
//!
//! # Auth
//!
//! - Register or log in to get an access token (15 minutes) and a refresh token (7 days)
//! - Both carry the session id, logging out deletes the session and blacklists the access token
//! - Refreshing blacklists the old refresh token and hands out a new pair in the same session
//! - Repeated failed logins for an email are rate limited inside a sliding window
//!
//!
//!
//! # Notes
//!
//! ## Redis + Meilisearch
//! Redis gives atomic counters, sorted sets for every listing and Lua for the
//! few read-modify-write paths (vote toggles, bounty awards). Meilisearch is
//! only asked for ranked ids; results are always hydrated from Redis so a
//! stale index never serves stale content, only a stale ranking.
//!
//! ## Votes
//! One vote per user per record. Voting the same way twice takes the vote
//! back, voting the other way flips it. Author reputation follows the score.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run without any external service.
//! ```sh
//! DATA_BACKEND=memory JWT_SECRET=dev RUST_LOG=info cargo run -p dronewerx
//! ```
//!
//! Rebuild the search index from Redis.
//! ```sh
//! cargo run -p reindex -- threads
//! ```
use std::time::Duration;

use anyhow::{Context, Result};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod media;
pub mod routes;
pub mod search;
pub mod state;
pub mod storage;
pub mod utils;
pub mod votes;

use config::Config;
use search::spawn_index_sync;
use state::State;

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    let sync = spawn_index_sync(
        state.db.clone(),
        state.search.clone(),
        Duration::from_secs(state.config.search_sync_secs.max(1)),
    );

    info!("Starting server...");
    let app = routes::router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sync.abort();
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        } else {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
