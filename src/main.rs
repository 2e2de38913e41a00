//! Permapost daemon
//!
//! Serves the post ledger and the upload relay over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (local blob storage, port 8080)
//! permapost
//!
//! # Store content on an IPFS node
//! permapost --ipfs-api-url localhost:5001
//!
//! # Start with custom config
//! permapost --config /path/to/config.toml
//!
//! # Throwaway instance, nothing written to disk
//! permapost --in-memory --http-port 8081
//! ```
//!
//! `PORT`, `IPFS_API_URL` and `GATEWAY_URL` are read from the environment,
//! and from a `.env` file in the working directory if present.

use clap::Parser;
use permapost::events::spawn_logging_listener;
use permapost::{
    BlobStore, Config, ContentStore, EventBus, HttpServer, IpfsClient, LedgerService,
    LedgerStore, MemoryContentStore, Relay, SystemClock,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "permapost")]
#[command(about = "Append-only posting ledger with content-addressed storage")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "PORT")]
    http_port: Option<u16>,

    /// Kubo RPC endpoint, e.g. localhost:5001
    #[arg(long, env = "IPFS_API_URL")]
    ipfs_api_url: Option<String>,

    /// Public gateway prefix for upload URLs
    #[arg(long, env = "GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Keep the ledger (and local content) in memory only
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Before tracing, so RUST_LOG may come from .env
    let env_file = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("permapost=info".parse()?))
        .init();

    if let Ok(path) = env_file {
        info!(path = %path.display(), "Loaded environment file");
    }

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(url) = args.ipfs_api_url {
        config.ipfs_api_url = Some(url);
    }
    if let Some(url) = args.gateway_url {
        config.gateway_url = url;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        in_memory = args.in_memory,
        "Starting permapost"
    );

    if !args.in_memory {
        tokio::fs::create_dir_all(&config.storage_dir).await?;

        // Save default config if it doesn't exist
        let config_path = config.config_path();
        if !config_path.exists() {
            config.save(&config_path)?;
            info!(path = %config_path.display(), "Created default config");
        }
    }

    // Content store: IPFS node if configured, otherwise local
    let mut blob_store: Option<Arc<BlobStore>> = None;
    let content_store: Arc<dyn ContentStore> = match &config.ipfs_api_url {
        Some(api_url) => {
            let client = IpfsClient::new(api_url, config.ipfs_timeout())?;
            if let Err(e) = client.id().await {
                error!(api = %client.api_url(), error = %e, "IPFS node unreachable");
                return Err(e.into());
            }
            Arc::new(client)
        }
        None if args.in_memory => {
            warn!("No IPFS node configured, content is kept in memory");
            Arc::new(MemoryContentStore::new())
        }
        None => {
            info!(path = %config.blobs_dir().display(), "No IPFS node configured, using local blob store");
            let store = Arc::new(BlobStore::new(config.blobs_dir()).await?);
            blob_store = Some(Arc::clone(&store));
            store
        }
    };

    // Ledger
    let events = Arc::new(EventBus::with_capacity(config.event_capacity));
    let ledger = if args.in_memory {
        LedgerService::in_memory(Arc::clone(&events))
    } else {
        let store = LedgerStore::open(config.ledger_db_path())?;
        LedgerService::open(store, Arc::clone(&events))?
    };
    let ledger = Arc::new(ledger);

    let stats = ledger.stats().await;
    info!(posts = stats.total_posts, tags = stats.distinct_tags, "Ledger ready");

    spawn_logging_listener(Arc::clone(&events));

    let relay = Arc::new(Relay::new(
        content_store,
        &config.gateway_url,
        Arc::new(SystemClock),
    ));

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(
        HttpServer::new(Arc::clone(&ledger), relay, http_addr)
            .with_allowed_origins(config.allowed_origins.clone())
            .with_max_body_bytes(config.max_body_bytes),
    );

    info!("HTTP API available at http://{}", http_addr);
    info!("Endpoints:");
    info!("  GET  /health                  - Health check");
    info!("  POST /api/upload/text         - Upload text");
    info!("  POST /api/upload/file?type=   - Upload image or video");
    info!("  GET  /api/content/{{hash}}      - Fetch metadata blob");
    info!("  POST /api/search              - Search by tag or content");
    info!("  POST /api/posts               - Append a post");
    info!("  GET  /api/posts?count=        - Latest posts");
    info!("  GET  /api/tags/top?count=     - Most used tags");
    info!("  WS   /api/events              - Ledger event stream");

    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    if let Err(e) = ledger.flush().await {
        error!(error = %e, "Failed to flush ledger");
    }

    let stats = ledger.stats().await;
    info!(
        posts = stats.total_posts,
        tags = stats.distinct_tags,
        "Final ledger stats"
    );

    if let Some(store) = blob_store {
        if let Ok(stats) = store.stats().await {
            info!(
                blobs = stats.total_blobs,
                bytes = stats.total_bytes,
                "Final storage stats"
            );
        }
    }

    Ok(())
}
