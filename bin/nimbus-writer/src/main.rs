//! Nimbus Writer - segment writer daemon
//!
//! This binary persists archived content and records it with the local
//! metadata store.

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use nimbus_common::{Config, ReplyAddress};
use nimbus_proto::{TcpTransport, process, routing};
use nimbus_storage::ContentStore;
use nimbus_writer::{SegmentWriter, WriterMetrics};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nimbus-writer")]
#[command(about = "Nimbus segment writer")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nimbus/nimbus.toml")]
    config: String,

    /// Listen address for protocol messages
    #[arg(short, long)]
    listen: Option<String>,

    /// Address the metadata store sends insert replies to
    /// If not set, derived from listen address
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Metadata store endpoint (host:port)
    #[arg(long)]
    meta_endpoint: Option<String>,

    /// Root directory for content blobs
    #[arg(long)]
    content_root: Option<PathBuf>,

    /// Listen address for the metrics and health endpoints
    #[arg(long)]
    metrics_listen: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct MetricsState {
    metrics: Arc<WriterMetrics>,
    node: String,
    content_root: PathBuf,
    start_time: Instant,
}

/// Wildcard listen addresses are reached through loopback
fn reachable(listen: &str) -> String {
    match listen.strip_prefix("0.0.0.0:") {
        Some(port) => format!("127.0.0.1:{port}"),
        None => listen.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    // Merge CLI args with config file (CLI takes precedence)
    let listen = args.listen.unwrap_or(config.network.writer_listen);
    let advertise_addr = args.advertise_addr.unwrap_or_else(|| reachable(&listen));
    let meta_endpoint = args
        .meta_endpoint
        .unwrap_or_else(|| reachable(&config.network.meta_listen));
    let content_root = args.content_root.unwrap_or(config.storage.content_root);
    let metrics_listen = args
        .metrics_listen
        .unwrap_or(config.network.writer_metrics_listen);
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

    info!("Starting Nimbus segment writer");
    info!("Config file: {}", args.config);
    info!("Content root: {}", content_root.display());
    info!("Metadata store: {}", meta_endpoint);

    std::fs::create_dir_all(&content_root)?;

    let metrics = Arc::new(WriterMetrics::default());
    let metrics_state = Arc::new(MetricsState {
        metrics: Arc::clone(&metrics),
        node: config.node.name.clone(),
        content_root: content_root.clone(),
        start_time: Instant::now(),
    });
    let mut writer = SegmentWriter::new(
        ContentStore::new(&content_root),
        ReplyAddress::new(meta_endpoint, routing::META_INSERT),
        ReplyAddress::new(&advertise_addr, routing::WRITER_INSERT_REPLY),
        metrics,
    );

    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(&metrics_listen, metrics_state).await {
            error!("Metrics server error: {}", e);
        }
    });

    let (local, inbox) = TcpTransport::listen(&listen).await?;
    info!("Segment writer serving on {} (advertised as {})", local, advertise_addr);
    let transport = TcpTransport::new();

    tokio::select! {
        () = process::run(&mut writer, inbox, &transport) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    if writer.pending() > 0 {
        info!("{} archives were still waiting on the metadata store", writer.pending());
    }
    info!("Segment writer shut down gracefully");
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
    let mut body = state.metrics.export_prometheus(&state.node);
    body.push_str(&format!(
        "# HELP nimbus_writer_uptime_seconds Seconds since the writer started\n\
         # TYPE nimbus_writer_uptime_seconds gauge\n\
         nimbus_writer_uptime_seconds{{node=\"{}\"}} {}\n",
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
    if state.content_root.is_dir() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "content root unavailable")
    }
}
