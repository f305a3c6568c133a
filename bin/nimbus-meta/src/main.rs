//! Nimbus Meta - metadata store server
//!
//! This binary serves one metadata store replica: per-namespace indexes
//! behind a bounded cache of open handles.

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use nimbus_common::Config;
use nimbus_meta::{MetaMetrics, MetaService};
use nimbus_meta_store::{CacheStats, IndexCache};
use nimbus_proto::{TcpTransport, process};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nimbus-meta")]
#[command(about = "Nimbus metadata store server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nimbus/nimbus.toml")]
    config: String,

    /// Listen address for protocol messages
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory holding one index file per namespace
    #[arg(long)]
    metadata_root: Option<PathBuf>,

    /// Maximum number of namespace indexes held open
    #[arg(long)]
    max_open_indexes: Option<usize>,

    /// Listen address for the metrics and health endpoints
    #[arg(long)]
    metrics_listen: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct MetricsState {
    metrics: Arc<MetaMetrics>,
    cache: Arc<CacheStats>,
    node: String,
    metadata_root: PathBuf,
    start_time: Instant,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    // Merge CLI args with config file (CLI takes precedence)
    let listen = args.listen.unwrap_or(config.network.meta_listen);
    let metadata_root = args.metadata_root.unwrap_or(config.storage.metadata_root);
    let max_open_indexes = args
        .max_open_indexes
        .unwrap_or(config.storage.max_open_indexes);
    let metrics_listen = args
        .metrics_listen
        .unwrap_or(config.network.meta_metrics_listen);
    let log_level = if args.log_level == "info" {
        config.logging.level
    } else {
        args.log_level
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Nimbus metadata store server");
    info!("Config file: {}", args.config);
    info!("Metadata root: {}", metadata_root.display());
    info!("Max open indexes: {}", max_open_indexes);

    std::fs::create_dir_all(&metadata_root)?;

    let indexes = IndexCache::new(&metadata_root, max_open_indexes);
    let metrics = Arc::new(MetaMetrics::default());
    let metrics_state = Arc::new(MetricsState {
        metrics: Arc::clone(&metrics),
        cache: indexes.stats(),
        node: config.node.name.clone(),
        metadata_root: metadata_root.clone(),
        start_time: Instant::now(),
    });
    let mut service = MetaService::new(indexes, metrics);

    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(&metrics_listen, metrics_state).await {
            error!("Metrics server error: {}", e);
        }
    });

    let (local, inbox) = TcpTransport::listen(&listen).await?;
    info!("Metadata store serving on {}", local);
    let transport = TcpTransport::new();

    tokio::select! {
        () = process::run(&mut service, inbox, &transport) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    service.close_all();
    info!("Metadata store shut down gracefully");
    Ok(())
}

async fn start_metrics_server(addr: &str, state: Arc<MetricsState>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    info!("Starting metrics server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    let mut body = state.metrics.export_prometheus(&state.node, &state.cache);
    body.push_str(&format!(
        "# HELP nimbus_meta_uptime_seconds Seconds since the server started\n\
         # TYPE nimbus_meta_uptime_seconds gauge\n\
         nimbus_meta_uptime_seconds{{node=\"{}\"}} {}\n",
        state.node,
        state.start_time.elapsed().as_secs()
    ));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn health_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    if state.metadata_root.is_dir() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "metadata root unavailable")
    }
}
