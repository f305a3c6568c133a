//! Nimbus CLI - operator command line interface
//!
//! Talks to segment writers and metadata stores over the Nimbus wire
//! protocol. Replies come back to an ephemeral listener opened per run.

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use clap::{Parser, Subcommand};
use nimbus_client::{
    MetaClient, MetaReplica, QuorumAggregator, ReplyRouter, SpaceUsageGetter, WriterClient,
};
use nimbus_common::{Checksum, ChecksumCalculator, Config, NamespaceId, ReplyAddress};
use nimbus_proto::{MetadataRecord, TcpTransport, Transport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Read size when loading a file to archive
const READ_CHUNK: usize = 64 * 1024;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nimbus-cli")]
#[command(about = "Nimbus operator CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nimbus/nimbus.toml")]
    config: String,

    /// Local address replies are received on; must be reachable by the servers
    #[arg(long, default_value = "127.0.0.1:0")]
    reply_addr: String,

    /// Reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Archive a file as the whole content of a key
    Archive {
        /// Segment writer endpoint (host:port)
        #[arg(long)]
        writer: Option<String>,
        #[arg(long)]
        namespace: u64,
        #[arg(long)]
        key: String,
        /// File to archive
        #[arg(long)]
        file: PathBuf,
        /// Version timestamp in seconds; defaults to now
        #[arg(long)]
        timestamp: Option<f64>,
    },
    /// Show the current record for a key on one metadata store
    Lookup {
        /// Metadata store endpoint (host:port); defaults to the first configured
        #[arg(long)]
        meta: Option<String>,
        #[arg(long)]
        namespace: u64,
        #[arg(long)]
        key: String,
    },
    /// Quorum space-usage query across metadata stores
    SpaceUsage {
        /// Metadata store endpoints; defaults to the configured cluster
        #[arg(long = "meta")]
        metas: Vec<String>,
        #[arg(long)]
        namespace: u64,
        /// Replies that must agree
        #[arg(long)]
        agreement_level: Option<usize>,
    },
}

fn reachable(listen: &str) -> String {
    match listen.strip_prefix("0.0.0.0:") {
        Some(port) => format!("127.0.0.1:{port}"),
        None => listen.to_string(),
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Load `path` and checksum it chunk by chunk as it is read
async fn read_content(path: &Path) -> Result<(Bytes, Checksum)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut content = BytesMut::new();
    let mut calculator = ChecksumCalculator::new();
    loop {
        let start = content.len();
        content.reserve(READ_CHUNK);
        let n = file
            .read_buf(&mut content)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        calculator.update(&content[start..]);
    }
    Ok((content.freeze(), calculator.finalize()))
}

fn print_record(namespace: NamespaceId, key: &str, record: &MetadataRecord, json: bool) {
    if json {
        let value = serde_json::json!({
            "namespace": namespace.get(),
            "key": key,
            "timestamp": record.timestamp,
            "tombstone": record.is_tombstone,
            "segment_number": record.segment_number,
            "segment_size": record.segment_size,
            "total_size": record.total_size,
            "adler32": format!("{:08x}", record.checksum.adler32),
            "md5": record.checksum.md5_hex(),
            "file_name": record.file_name,
        });
        println!("{value}");
        return;
    }
    println!("Key: {namespace}/{key}");
    println!("Timestamp: {}", record.timestamp);
    if record.is_tombstone {
        println!("Tombstone: yes");
        return;
    }
    println!("Segment: {} ({} bytes)", record.segment_number, record.segment_size);
    println!("Total size: {} bytes", record.total_size);
    println!("Checksum: {}", record.checksum);
    println!("File: {}", record.file_name);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let timeout = args
        .timeout_ms
        .map_or_else(|| config.cluster.quorum_timeout(), Duration::from_millis);

    let (local, inbox) = TcpTransport::listen(&args.reply_addr).await?;
    let router = ReplyRouter::new();
    router.spawn(inbox);
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new());
    let reply_to = ReplyAddress::new(local.to_string(), "cli.reply");
    debug!("Receiving replies on {}", reply_to);

    match args.command {
        Commands::Archive {
            writer,
            namespace,
            key,
            file,
            timestamp,
        } => {
            let writer = writer.unwrap_or_else(|| reachable(&config.network.writer_listen));
            let (content, checksum) = read_content(&file).await?;
            let size = content.len();
            debug!("Read {} bytes from {} ({})", size, file.display(), checksum);
            let namespace = NamespaceId::new(namespace);
            let client = WriterClient::new(&writer, transport, router, reply_to, timeout);
            let previous_size = client
                .archive_with_checksum(
                    namespace,
                    &key,
                    content,
                    checksum,
                    timestamp.unwrap_or_else(now),
                )
                .await?;
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({ "size": size, "previous_size": previous_size })
                );
            } else {
                println!("Archived {namespace}/{key} ({size} bytes) via {writer}");
                println!("Previous size: {previous_size} bytes");
            }
        }
        Commands::Lookup {
            meta,
            namespace,
            key,
        } => {
            let meta = meta
                .or_else(|| config.cluster.meta_endpoints.first().cloned())
                .unwrap_or_else(|| reachable(&config.network.meta_listen));
            let namespace = NamespaceId::new(namespace);
            let client = MetaClient::new(meta, transport, router, reply_to, timeout);
            let record = client.lookup(namespace, &key).await?;
            print_record(namespace, &key, &record, args.json);
        }
        Commands::SpaceUsage {
            metas,
            namespace,
            agreement_level,
        } => {
            let metas = if metas.is_empty() {
                config.cluster.meta_endpoints.clone()
            } else {
                metas
            };
            anyhow::ensure!(
                !metas.is_empty(),
                "no metadata stores given; use --meta or cluster.meta_endpoints"
            );
            let agreement_level = agreement_level.unwrap_or(config.cluster.agreement_level);
            let replicas = metas
                .iter()
                .map(|meta| {
                    Arc::new(MetaClient::new(
                        meta,
                        Arc::clone(&transport),
                        router.clone(),
                        reply_to.clone(),
                        timeout,
                    )) as Arc<dyn MetaReplica>
                })
                .collect();
            let getter = SpaceUsageGetter::new(
                replicas,
                QuorumAggregator::new(agreement_level, timeout),
            );
            let namespace = NamespaceId::new(namespace);
            let usage = getter.get_space_usage(namespace).await?;
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "namespace": namespace.get(),
                        "total_size": usage.total_size,
                        "live_keys": usage.live_keys,
                    })
                );
            } else {
                println!("Namespace {namespace}");
                println!("Total size: {} bytes", usage.total_size);
                println!("Live keys: {}", usage.live_keys);
                println!("Agreed by {} of {} replicas", agreement_level, metas.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_content_checksums_every_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let data: Vec<u8> = (0..READ_CHUNK * 2 + 17).map(|i| u8::try_from(i % 251).unwrap()).collect();
        std::fs::write(&path, &data).unwrap();

        let (content, checksum) = read_content(&path).await.unwrap();
        assert_eq!(content.as_ref(), data.as_slice());
        assert_eq!(checksum, Checksum::compute(&data));
    }

    #[tokio::test]
    async fn test_read_content_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_content(&dir.path().join("absent")).await.unwrap_err();
        assert!(err.to_string().contains("opening"));
    }
}
