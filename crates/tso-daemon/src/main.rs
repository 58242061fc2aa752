//! tso-daemon - Timestamp Oracle service binary
//!
//! Runs the oracle as a standalone service: opens the durable store, claims
//! the leader key (single-node bootstrap; multi-node election is an external
//! collaborator), synchronizes the allocation window, starts the background
//! advancer, and exposes Prometheus metrics at `/metrics`.
//!
//! Timestamp allocation itself is a library surface ([`tso_daemon::oracle`]);
//! the RPC layer in front of it is owned by the embedding server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use axum::Router;
use axum::routing::get;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tso_core::clock::SystemClock;
use tso_core::election::{FlagLeadership, Leadership};
use tso_core::store::{KvStore, MemoryStore, Precondition, PutOutcome, SqliteStore};
use tso_daemon::advancer::Advancer;
use tso_daemon::config::DaemonConfig;
use tso_daemon::metrics::{MetricsRegistry, SharedMetricsRegistry};
use tso_daemon::oracle::TimestampOracle;

/// tso daemon - monotonic timestamp oracle
#[derive(Parser, Debug)]
#[command(name = "tso-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage root path for the oracle's keys
    #[arg(long)]
    root_path: Option<String>,

    /// Member identity recorded under the leader key
    #[arg(long)]
    member: Option<String>,

    /// Path to the SQLite store; in-memory store when omitted
    #[arg(long)]
    store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Port for the Prometheus metrics HTTP endpoint
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Disable the Prometheus metrics HTTP endpoint
    #[arg(long)]
    no_metrics: bool,
}

fn load_config(args: &Args) -> Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => {
            DaemonConfig::from_file(path).context("failed to load configuration file")?
        },
        None => DaemonConfig::default(),
    };

    // CLI arguments override the file.
    if let Some(root_path) = &args.root_path {
        config.root_path.clone_from(root_path);
    }
    if let Some(member) = &args.member {
        config.member.clone_from(member);
    }
    if let Some(store) = &args.store {
        config.store_path = Some(store.clone());
    }
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }
    Ok(config)
}

/// Claims the leader key for single-node operation.
///
/// Succeeds when the key is absent (first start) or already carries this
/// member's identity (restart). Any other occupant is a configuration error,
/// not something to overwrite.
async fn claim_leadership(
    store: &Arc<dyn KvStore>,
    leader_key: &str,
    member: &str,
) -> Result<()> {
    match store.read(leader_key).await? {
        Some(current) if current == member.as_bytes() => {
            info!(member, "leader key already held by this member");
            return Ok(());
        },
        Some(current) => {
            bail!(
                "leader key is held by {:?}; refusing to start",
                String::from_utf8_lossy(&current)
            );
        },
        None => {},
    }

    let outcome = store
        .conditional_put(
            leader_key,
            member.as_bytes().to_vec(),
            Precondition::KeyAbsent {
                key: leader_key.to_string(),
            },
        )
        .await?;
    match outcome {
        PutOutcome::Committed => {
            info!(member, "claimed leader key");
            Ok(())
        },
        PutOutcome::PredicateFailed => bail!("leader key was claimed concurrently"),
    }
}

async fn run_metrics_server(registry: SharedMetricsRegistry, addr: SocketAddr) -> Result<()> {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let metrics_handler = {
        let registry = Arc::clone(&registry);
        move || {
            let registry = Arc::clone(&registry);
            async move {
                match registry.encode_text() {
                    Ok(body) => (
                        StatusCode::OK,
                        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                        body,
                    )
                        .into_response(),
                    Err(e) => {
                        error!("failed to encode metrics: {e}");
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("failed to encode metrics: {e}"),
                        )
                            .into_response()
                    },
                }
            }
        }
    };

    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;
    info!(addr = %addr, "metrics HTTP server listening");

    axum::serve(listener, app)
        .await
        .context("metrics server error")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging.
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = load_config(&args)?;

    let store: Arc<dyn KvStore> = match &config.store_path {
        Some(path) => {
            info!(path = %path.display(), "opening SQLite store");
            Arc::new(SqliteStore::open(path).context("failed to open store")?)
        },
        None => {
            info!("using in-memory store; save points will not survive restarts");
            Arc::new(MemoryStore::new())
        },
    };

    let metrics_registry = if args.no_metrics {
        None
    } else {
        Some(Arc::new(
            MetricsRegistry::new().context("failed to initialize metrics registry")?,
        ))
    };

    let oracle_config = config.oracle_config();
    let oracle = Arc::new(TimestampOracle::new(
        oracle_config,
        Arc::clone(&store),
        Arc::new(SystemClock),
        metrics_registry.as_ref().map(|r| r.oracle().clone()),
    ));

    claim_leadership(&store, &oracle.leader_key(), &config.member).await?;
    let leadership = Arc::new(FlagLeadership::new(config.member.clone()));
    leadership.assume();

    let leadership_dyn: Arc<dyn Leadership> = leadership.clone();
    oracle
        .sync(leadership_dyn)
        .await
        .context("initial timestamp sync failed")?;

    let advancer = Advancer::spawn(Arc::clone(&oracle));

    info!(
        pid = std::process::id(),
        member = %config.member,
        root_path = %config.root_path,
        "tso daemon started"
    );

    let metrics_task = metrics_registry.map(|registry| {
        let addr: SocketAddr = ([127, 0, 0, 1], config.metrics_port).into();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(registry, addr).await {
                error!("metrics server error: {e}");
            }
        })
    });

    // Wait for a termination signal.
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    // Graceful shutdown: stop advancing, then disarm the allocator.
    info!("shutting down");
    advancer.stop().await;
    leadership.step_down();
    oracle.reset();
    if let Some(task) = metrics_task {
        task.abort();
    }

    info!("tso daemon shutdown complete");
    Ok(())
}
