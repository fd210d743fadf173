//! # ephemera-server
//!
//! Ephemeral, privacy-conscious chat relay.
//!
//! This binary provides:
//! - **Channel store**: one bounded global buffer plus lazily created,
//!   bounded local buffers keyed by an opaque server identifier
//! - **REST API** (axum) for session init, message send, and polling fetch
//! - **Rate limiting** with three independent fixed-window limiters keyed by
//!   user id or a salted hash of the caller address
//! - **Reclaimer** that drops local channels left idle
//!
//! Nothing is persisted and no caller address is stored or logged.

mod api;
mod config;
mod error;
mod rate_limit;
mod reclaimer;
mod redact;
mod relay;

use tracing::info;
use tracing_subscriber::EnvFilter;

use ephemera_shared::constants::APP_NAME;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::reclaimer::{spawn_limiter_purge, spawn_reclaimer};
use crate::redact::RedactingMakeWriter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var). Every line passes
    //    through the address scrubber on its way to stderr.
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ephemera_server=debug")),
        )
        .with_writer(RedactingMakeWriter::new(std::io::stderr))
        .init();

    info!("Starting {} relay server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        default_channel_class = %config.default_channel_class,
        sanitize_html = config.sanitize_html,
        trust_proxy = config.trust_proxy,
        "Deployment profile"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let reclaim_interval = config.reclaim_interval;
    let idle_timeout = config.local_idle_timeout;
    let app_state = AppState::from_config(config);

    // -----------------------------------------------------------------------
    // 4. Start background tasks
    // -----------------------------------------------------------------------

    // Drop local channels idle past the timeout.
    let reclaimer = spawn_reclaimer(
        app_state.relay.store().clone(),
        reclaim_interval,
        idle_timeout,
    );

    // Bound the limiter key maps (every 5 minutes).
    let limiter_purge = spawn_limiter_purge(
        app_state.limiters.clone(),
        std::time::Duration::from_secs(300),
    );

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server until Ctrl+C
    // -----------------------------------------------------------------------
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    let result = api::serve(app_state, http_addr, shutdown).await;
    if let Err(ref e) = result {
        tracing::error!(error = %e, "HTTP server failed");
    }

    // -----------------------------------------------------------------------
    // 6. Stop background tasks
    // -----------------------------------------------------------------------
    reclaimer.stop().await;
    limiter_purge.stop().await;
    info!("Shutdown complete");

    result
}
