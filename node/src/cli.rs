//! # CLI Interface
//!
//! Command-line arguments for `huron-node`, via `clap` derive. Three
//! subcommands: `run`, `keygen` and `version`.
//!
//! Every `run` flag has an environment variable. Flags left unset fall back
//! to `huron.toml` in the data directory, then to the built-in defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// huron validator node.
///
/// Gossips events with the other validators, runs hashgraph consensus and
/// delivers the resulting blocks to the application.
#[derive(Parser, Debug)]
#[command(
    name = "huron-node",
    about = "huron hashgraph validator node",
    version,
    propagate_version = true
)]
pub struct HuronCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the validator node.
    Run(RunArgs),
    /// Generate a validator key in the data directory.
    Keygen(KeygenArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Directory holding `priv_key`, the peers files, `huron.toml` and the
    /// database.
    #[arg(long, short = 'd', env = "HURON_DATA_DIR", default_value = ".huron")]
    pub data_dir: PathBuf,

    /// Address the gossip transport listens on.
    #[arg(long, short = 'l', env = "HURON_LISTEN")]
    pub listen: Option<String>,

    /// Address other validators should dial, when it differs from `--listen`.
    #[arg(long, env = "HURON_ADVERTISE")]
    pub advertise: Option<String>,

    /// Address of the HTTP service (stats, blocks, peers, metrics).
    #[arg(long, short = 's', env = "HURON_SERVICE_LISTEN")]
    pub service_listen: Option<String>,

    /// Default log level, overridden by `RUST_LOG`.
    #[arg(long, env = "HURON_LOG", default_value = "info")]
    pub log: String,

    /// Log format: `pretty` or `json`.
    #[arg(long, env = "HURON_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Human-readable node name.
    #[arg(long, env = "HURON_MONIKER")]
    pub moniker: Option<String>,

    /// Gossip interval while busy, in milliseconds.
    #[arg(long, env = "HURON_HEARTBEAT")]
    pub heartbeat: Option<u64>,

    /// Gossip interval while idle, in milliseconds.
    #[arg(long, env = "HURON_SLOW_HEARTBEAT")]
    pub slow_heartbeat: Option<u64>,

    /// RPC timeout, in milliseconds.
    #[arg(long, env = "HURON_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Join and leave timeout, in milliseconds.
    #[arg(long, env = "HURON_JOIN_TIMEOUT")]
    pub join_timeout: Option<u64>,

    /// Capacity of the store caches.
    #[arg(long, env = "HURON_CACHE_SIZE")]
    pub cache_size: Option<usize>,

    /// Maximum events per sync response.
    #[arg(long, env = "HURON_SYNC_LIMIT")]
    pub sync_limit: Option<usize>,

    /// Maximum concurrent sync workers and pooled connections per peer.
    #[arg(long, env = "HURON_MAX_POOL")]
    pub max_pool: Option<usize>,

    /// Catch up from a peer's snapshot when too far behind.
    #[arg(long, env = "HURON_FAST_SYNC")]
    pub fast_sync: bool,

    /// Keep the hashgraph in a sled database under the data directory.
    #[arg(long, env = "HURON_STORE")]
    pub store: bool,

    /// Replay the existing database on start instead of backing it up.
    #[arg(long, env = "HURON_BOOTSTRAP")]
    pub bootstrap: bool,

    /// Address the application submits transactions to.
    #[arg(long, short = 'p', env = "HURON_PROXY_LISTEN")]
    pub proxy_listen: Option<String>,

    /// Address of the application that receives committed blocks.
    #[arg(long, short = 'c', env = "HURON_CLIENT_CONNECT")]
    pub client_connect: Option<String>,

    /// Run without an external application, committing blocks to a built-in
    /// dummy state.
    #[arg(long, env = "HURON_STANDALONE")]
    pub standalone: bool,
}

/// Arguments for the `keygen` subcommand.
#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Data directory to write `priv_key` into.
    #[arg(long, short = 'd', env = "HURON_DATA_DIR", default_value = ".huron")]
    pub data_dir: PathBuf,

    /// Replace an existing key.
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        HuronCli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = HuronCli::try_parse_from([
            "huron-node",
            "run",
            "-d",
            "/tmp/h",
            "--listen",
            "127.0.0.1:1337",
            "--heartbeat",
            "20",
            "--store",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.data_dir, PathBuf::from("/tmp/h"));
        assert_eq!(args.listen.as_deref(), Some("127.0.0.1:1337"));
        assert_eq!(args.heartbeat, Some(20));
        assert!(args.store);
        assert!(!args.bootstrap);
        assert!(!args.standalone);
        assert_eq!(args.proxy_listen, None);
    }

    #[test]
    fn proxy_flags_parse() {
        let cli = HuronCli::try_parse_from([
            "huron-node",
            "run",
            "--proxy-listen",
            "127.0.0.1:2338",
            "-c",
            "127.0.0.1:2339",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.proxy_listen.as_deref(), Some("127.0.0.1:2338"));
        assert_eq!(args.client_connect.as_deref(), Some("127.0.0.1:2339"));

        let cli = HuronCli::try_parse_from(["huron-node", "run", "--standalone"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.standalone);
    }
}
