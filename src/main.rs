use anyhow::{Context, Result, anyhow, bail};
use chunk_cluster::config::{
    ClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_FILE_PREFIX, MembershipConfig, StorageConfig,
    TRANSFER_PAYLOAD_SIZE, parse_static_nodes,
};
use chunk_cluster::generator::{generate_records, write_records};
use chunk_cluster::membership::bootstrap::{Backoff, resolve_storage_nodes};
use chunk_cluster::membership::service::MembershipService;
use chunk_cluster::membership::types::{NodeId, NodeRecord, Role};
use chunk_cluster::routing::distributor::Distributor;
use chunk_cluster::routing::router::Router;
use chunk_cluster::storage::client::QueryClient;
use chunk_cluster::storage::engine::StorageEngine;
use chunk_cluster::storage::node::StorageNode;
use chunk_cluster::transfer::receiver::TransferReceiver;
use chunk_cluster::transfer::sender::ChunkSender;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "chunk-cluster", about = "Replicated chunk storage over UDP")]
struct Cli {
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a membership node (leader or member).
    Member {
        #[arg(long)]
        id: i32,
        #[arg(long, default_value = "0.0.0.0:9001")]
        bind: SocketAddr,
        /// Coordinate the cluster instead of joining one.
        #[arg(long)]
        leader: bool,
        /// Host peers should use to reach this node.
        #[arg(long)]
        advertise: Option<String>,
        #[arg(long, env = "LEADER_HOST")]
        leader_host: Option<String>,
        #[arg(long, env = "LEADER_PORT")]
        leader_port: Option<u16>,
    },

    /// Run a storage node.
    Storage {
        #[arg(long)]
        id: i32,
        /// Data port; queries are served one thousand ports above it.
        #[arg(long, default_value = "0.0.0.0:8001")]
        bind: SocketAddr,
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
        #[arg(long, default_value = DEFAULT_FILE_PREFIX)]
        prefix: String,
        /// Also accept sequenced transfers on this address.
        #[arg(long)]
        transfer: Option<SocketAddr>,
    },

    /// Relay every incoming frame to a random peer and the one after it.
    Router {
        #[arg(long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// `host:port:id,...`; defaults to STORAGE_NODES.
        #[arg(long)]
        peers: Option<String>,
    },

    /// Split a record file into chunks and store each on a primary and a backup node.
    Distribute {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// `host:port:id,...`; discovered through the manager when omitted.
        #[arg(long)]
        nodes: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Send a file as one sequenced transfer.
    Send {
        file: PathBuf,
        /// `host:port` of a receiver, router or storage transfer port.
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = TRANSFER_PAYLOAD_SIZE)]
        frame_size: usize,
    },

    /// Receive one sequenced transfer.
    Receive {
        #[arg(long, default_value = "0.0.0.0:7000")]
        bind: SocketAddr,
        /// Where to write the reassembled bytes.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Give up after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Look records up across the storage nodes.
    Query {
        #[arg(required = true)]
        ids: Vec<i32>,
        #[arg(long)]
        nodes: Option<String>,
        #[arg(long, default_value_t = 5)]
        timeout: u64,
        #[arg(long)]
        json: bool,
    },

    /// Ask the manager for its membership snapshot.
    Members {
        #[arg(long)]
        json: bool,
    },

    /// Show a storage node's status and index.
    Index {
        #[arg(long)]
        id: i32,
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
        #[arg(long, default_value = DEFAULT_FILE_PREFIX)]
        prefix: String,
        #[arg(long)]
        json: bool,
    },

    /// Write a file of random records.
    Generate {
        #[arg(long, default_value_t = 10_000)]
        count: usize,
        #[arg(long, default_value = "records.dat")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    match cli.command {
        Command::Member {
            id,
            bind,
            leader,
            advertise,
            leader_host,
            leader_port,
        } => {
            let role = if leader { Role::Leader } else { Role::Member };
            let mut config = MembershipConfig::new(NodeId(id), bind, role);
            if let Some(host) = advertise {
                config = config.with_advertise_host(host);
            }

            let join = match (leader_host, leader_port) {
                (Some(host), Some(port)) if !leader => Some((host, port)),
                _ => None,
            };
            run_member(config, join).await
        }

        Command::Storage {
            id,
            bind,
            data_dir,
            prefix,
            transfer,
        } => {
            let config = StorageConfig {
                file_prefix: prefix,
                ..StorageConfig::new(NodeId(id), data_dir)
            };
            run_storage(config, bind, transfer).await
        }

        Command::Router { bind, peers } => {
            let peers = match peers {
                Some(list) => parse_static_nodes(&list)?,
                None => ClientConfig::from_env().static_nodes()?,
            };
            run_router(bind, peers).await
        }

        Command::Distribute {
            file,
            chunk_size,
            nodes,
            json,
        } => {
            let nodes = storage_nodes(nodes).await?;
            let distributor = Distributor::bind("0.0.0.0:0", nodes)
                .await?
                .with_chunk_size(chunk_size);

            let placements = distributor.distribute_file(&file).await?;
            if json {
                print_json(&placements)?;
            } else {
                for p in &placements {
                    println!(
                        "chunk {} ({} bytes): primary {}{}, backup {}{}",
                        p.chunk_id,
                        p.len,
                        p.primary,
                        if p.primary_sent { "" } else { " (not sent)" },
                        p.backup,
                        if p.backup_sent { "" } else { " (not sent)" },
                    );
                }
            }

            let unsent = placements.iter().filter(|p| !p.is_sent()).count();
            if unsent > 0 {
                bail!(
                    "{} of {} chunks reached no storage node; try a smaller --chunk-size",
                    unsent,
                    placements.len()
                );
            }
            Ok(())
        }

        Command::Send {
            file,
            to,
            frame_size,
        } => {
            let payload = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let (host, port) = parse_host_port(&to)?;

            let sender = ChunkSender::bind("0.0.0.0:0")
                .await?
                .with_frame_size(frame_size);
            let frames = sender.send(&payload, (host.as_str(), port)).await?;
            println!("Sent {} bytes as {} frames", payload.len(), frames);
            Ok(())
        }

        Command::Receive { bind, out, timeout } => {
            let receiver = TransferReceiver::bind(bind).await?;
            let decoded = match timeout {
                Some(secs) => tokio::time::timeout(
                    Duration::from_secs(secs),
                    receiver.receive_records(),
                )
                .await
                .map_err(|_| anyhow!("Transfer incomplete after {}s", secs))??,
                None => receiver.receive_records().await?,
            };

            println!(
                "Received {} records ({} trailing bytes)",
                decoded.records.len(),
                decoded.remainder
            );

            if let Some(path) = out {
                write_records(&path, &decoded.records).await?;
            }
            Ok(())
        }

        Command::Query {
            ids,
            nodes,
            timeout,
            json,
        } => {
            let nodes = storage_nodes(nodes).await?;
            let client = QueryClient::new(Duration::from_secs(timeout));

            for id in ids {
                let found = client.query(&nodes, id).await?;
                match (json, found) {
                    (true, found) => print_json(&QueryOutcome { id, record: found })?,
                    (false, Some(record)) => println!("{}", record),
                    (false, None) => println!("{}: NOT_FOUND", id),
                }
            }
            Ok(())
        }

        Command::Members { json } => {
            let config = ClientConfig::from_env();
            let nodes = resolve_storage_nodes(&config, &Backoff::default()).await?;

            if json {
                print_json(&nodes)?;
            } else {
                for node in &nodes {
                    println!("{}", node);
                }
            }
            Ok(())
        }

        Command::Index {
            id,
            data_dir,
            prefix,
            json,
        } => {
            let config = StorageConfig {
                file_prefix: prefix,
                ..StorageConfig::new(NodeId(id), data_dir)
            };
            let engine = StorageEngine::open(config).await?;
            let status = engine.status().await?;
            let entries = engine.entries().await?;

            if json {
                print_json(&serde_json::json!({ "status": status, "entries": entries }))?;
            } else {
                println!(
                    "node {}: {} ({} bytes), {} index entries",
                    status.node_id,
                    status.data_path.display(),
                    status.data_bytes,
                    status.index_entries
                );
                for entry in entries {
                    println!("  {}", entry);
                }
            }
            Ok(())
        }

        Command::Generate { count, out } => {
            let records = generate_records(count, &mut rand::thread_rng());
            write_records(&out, &records).await
        }
    }
}

async fn run_member(config: MembershipConfig, join: Option<(String, u16)>) -> Result<()> {
    tracing::info!("Starting membership node {} on {}", config.node_id, config.bind_addr);

    let membership = MembershipService::bind(config).await?;
    membership.clone().start().await;

    match join {
        Some((host, port)) => membership.join(&host, port).await?,
        None if !membership.role.is_leader() => {
            tracing::warn!("No leader address given, waiting to be discovered by heartbeat");
        }
        None => {}
    }

    // Stats reporter:
    let stats_service = membership.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();
            let members = stats_service.members();
            tracing::info!("Cluster stats: {} members", members.len());
            for node in members {
                tracing::info!(
                    "  - {} (last seen {:?} ago)",
                    node,
                    node.age(now).unwrap_or_default()
                );
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    membership.shutdown().await;
    Ok(())
}

async fn run_storage(
    config: StorageConfig,
    bind: SocketAddr,
    transfer: Option<SocketAddr>,
) -> Result<()> {
    let engine = StorageEngine::open(config).await?;
    let node = StorageNode::bind(engine, bind, transfer).await?;
    node.clone().start().await;

    // Stats reporter:
    let stats_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            interval.tick().await;
            match stats_node.engine().status().await {
                Ok(status) => tracing::info!(
                    "Storage stats: {} bytes in {} chunks",
                    status.data_bytes,
                    status.index_entries
                ),
                Err(e) => tracing::warn!("Failed to read storage status: {:#}", e),
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    node.shutdown().await;
    Ok(())
}

async fn run_router(bind: SocketAddr, peers: Vec<NodeRecord>) -> Result<()> {
    let router = Router::bind(bind, peers).await?;
    router.clone().start().await;

    // Stats reporter:
    let stats_router = router.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            interval.tick().await;
            tracing::info!("Router stats: {} frames forwarded", stats_router.routed());
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    router.shutdown().await;
    Ok(())
}

/// Explicit `host:port:id` list, or whatever the manager reports (falling back to STORAGE_NODES).
async fn storage_nodes(explicit: Option<String>) -> Result<Vec<NodeRecord>> {
    match explicit {
        Some(list) => parse_static_nodes(&list),
        None => resolve_storage_nodes(&ClientConfig::from_env(), &Backoff::default()).await,
    }
}

fn parse_host_port(raw: &str) -> Result<(String, u16)> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Expected host:port, got '{}'", raw))?;
    let port = port
        .parse()
        .map_err(|_| anyhow!("Invalid port in '{}'", raw))?;
    Ok((host.to_string(), port))
}

#[derive(Serialize)]
struct QueryOutcome {
    id: i32,
    record: Option<chunk_cluster::wire::FixedRecord>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
