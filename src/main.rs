// src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use domino_hub::config::CONFIG;
use domino_hub::server;
use domino_hub::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "domino-hub", about = "Persona routing hub with session memory")]
struct Args {
    /// Bind address override
    #[arg(long)]
    host: Option<String>,
    /// Port override
    #[arg(long)]
    port: Option<u16>,
    /// Database URL override
    #[arg(long)]
    database_url: Option<String>,
}

// Single-threaded cooperative scheduling: target pipelines interleave at
// await points, they do not run on parallel worker threads.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(CONFIG.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut cfg = CONFIG.clone();
    if let Some(host) = args.host {
        cfg.host = host;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(database_url) = args.database_url {
        cfg.database_url = database_url;
    }

    info!("Starting domino-hub");
    info!("Database: {}", cfg.database_url);
    info!("Default persona: {}", cfg.default_persona);

    let state = AppState::from_config(&cfg).await?;
    if !state.store.retrieval_available() {
        warn!("Retrieval corpus disabled (SQLite FTS5 missing)");
    }

    // Periodic sweep in addition to the opportunistic per-request expiry.
    let sweep_store = state.store.clone();
    let sweep_interval = std::time::Duration::from_secs(cfg.session_sweep_secs.max(60));
    let max_age_days = cfg.session_max_age_days;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweep_store.expire_stale_sessions(max_age_days).await {
                Ok(0) => {}
                Ok(n) => info!("Expired {} stale session(s)", n),
                Err(e) => warn!("Session sweep failed: {}", e),
            }
        }
    });

    let app = server::router(state);
    let bind_address = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
    Ok(())
}
