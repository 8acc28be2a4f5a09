// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # huron Validator Node
//!
//! Entry point for the `huron-node` binary. Parses CLI arguments and the
//! data directory, starts the gossip transport and the node, and serves the
//! read-only HTTP service.
//!
//! - `run`     start the validator
//! - `keygen`  write a fresh validator key to the data directory
//! - `version` print build version information

mod cli;
mod config;
mod logging;
mod metrics;
mod service;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use huron_protocol::config::{DB_DIR, KEY_FILE, PROTOCOL_VERSION};
use huron_protocol::crypto::Keypair;
use huron_protocol::hashgraph::{Event, InmemStore, PersistentStore, Store};
use huron_protocol::net::{TcpTransport, Transport};
use huron_protocol::node::{Node, Validator};
use huron_protocol::peers::load_peer_sets;
use huron_protocol::proxy::{AppProxy, DummyState, InmemProxy, SocketAppProxy};

use cli::{Commands, HuronCli};
use config::Settings;
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = HuronCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Keygen(args) => keygen(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log, LogFormat::from_str_lossy(&args.log_format));
    let settings = config::load(&args)?;
    let data_dir = &args.data_dir;

    let keypair = read_key(data_dir)?;
    let (genesis, peers) = load_peer_sets(data_dir)
        .with_context(|| format!("failed to load peers from {}", data_dir.display()))?;

    let moniker = match settings.node.moniker.as_str() {
        "" => peers
            .by_pub_key(&keypair.public_key())
            .map(|p| p.moniker.clone())
            .unwrap_or_else(|| "huron".to_string()),
        m => m.to_string(),
    };
    tracing::info!(
        moniker = %moniker,
        public_key = %keypair.public_key().to_hex(),
        listen = %settings.listen,
        peers = peers.len(),
        genesis_peers = genesis.len(),
        store = settings.store,
        "starting huron-node"
    );

    let (store, stored_events) = open_store(data_dir, &settings)?;

    let transport: Arc<dyn Transport> = TcpTransport::bind(
        &settings.listen,
        settings.advertise.clone(),
        settings.node.max_pool,
        settings.node.tcp_timeout,
        settings.node.join_timeout,
    )
    .await
    .with_context(|| format!("failed to bind gossip transport on {}", settings.listen))?;

    let proxy: Arc<dyn AppProxy> = if settings.standalone {
        tracing::info!("standalone: committing to the built-in dummy state");
        Arc::new(InmemProxy::new(Arc::new(DummyState::new())))
    } else {
        let proxy = SocketAppProxy::bind(
            &settings.proxy_listen,
            settings.client_connect.clone(),
            settings.node.tcp_timeout,
        )
        .await
        .with_context(|| format!("failed to bind app proxy on {}", settings.proxy_listen))?;
        Arc::new(proxy)
    };

    let mut node = Node::new(
        settings.node.clone(),
        Validator::new(keypair, moniker),
        &peers,
        genesis,
        store,
        transport,
        proxy,
    )
    .context("failed to create node")?;
    if !stored_events.is_empty() {
        node.bootstrap(stored_events)
            .await
            .context("failed to replay the database")?;
    }
    let (handle, mut task) = node.spawn();

    // --- HTTP service ---
    let metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let router = service::router(service::ServiceState {
        node: handle.clone(),
        metrics,
    });
    let listener = tokio::net::TcpListener::bind(&settings.service_listen)
        .await
        .with_context(|| format!("failed to bind service on {}", settings.service_listen))?;
    tracing::info!(addr = %settings.service_listen, "service listening");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "service error");
        }
    });

    // --- Run until the node stops or we are told to leave ---
    let result = tokio::select! {
        res = &mut task => res,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, leaving");
            if let Err(e) = handle.leave().await {
                tracing::warn!(error = %e, "leave did not complete");
            }
            handle.shutdown();
            (&mut task).await
        }
    };

    server.abort();
    result.context("node task panicked")??;
    tracing::info!("huron-node stopped");
    Ok(())
}

fn read_key(data_dir: &Path) -> Result<Keypair> {
    let path = data_dir.join(KEY_FILE);
    let hex = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "failed to read validator key {} (run `huron-node keygen` first)",
            path.display()
        )
    })?;
    Keypair::from_hex(&hex).with_context(|| format!("invalid key in {}", path.display()))
}

/// The store selected by the settings, plus the events to replay when
/// bootstrapping from an existing database.
fn open_store(data_dir: &Path, settings: &Settings) -> Result<(Arc<dyn Store>, Vec<Event>)> {
    if !settings.store {
        return Ok((Arc::new(InmemStore::new()), Vec::new()));
    }
    let path = data_dir.join(DB_DIR);
    let cache_size = settings.node.cache_size;
    if settings.node.bootstrap && path.exists() {
        let (store, events) = PersistentStore::load(&path, cache_size)
            .with_context(|| format!("failed to load database {}", path.display()))?;
        Ok((Arc::new(store), events))
    } else {
        let store = PersistentStore::create(&path, cache_size)
            .with_context(|| format!("failed to create database {}", path.display()))?;
        Ok((Arc::new(store), Vec::new()))
    }
}

fn keygen(args: cli::KeygenArgs) -> Result<()> {
    logging::init_logging("info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to replace it)",
            key_path.display()
        );
    }
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let keypair = Keypair::generate();
    std::fs::write(&key_path, keypair.to_hex())
        .with_context(|| format!("failed to write {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(key_path = %key_path.display(), "validator key generated");
    println!("{}", keypair.public_key().to_hex());
    Ok(())
}

fn print_version() {
    println!("huron-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
