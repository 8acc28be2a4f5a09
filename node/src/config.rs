//! Run settings: built-in defaults, overlaid by `huron.toml` in the data
//! directory, overlaid by command-line flags.
//!
//! ```toml
//! listen = "0.0.0.0:1337"
//! service_listen = "127.0.0.1:8000"
//! store = true
//! proxy_listen = "127.0.0.1:1338"
//! client_connect = "127.0.0.1:1339"
//! heartbeat = 20        # milliseconds
//! sync_limit = 500
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use huron_protocol::config::NodeConfig;

use crate::cli::RunArgs;

/// Name of the optional config file inside the data directory.
pub const CONFIG_FILE: &str = "huron.toml";

const DEFAULT_LISTEN: &str = "127.0.0.1:1337";
const DEFAULT_SERVICE_LISTEN: &str = "127.0.0.1:8000";
const DEFAULT_PROXY_LISTEN: &str = "127.0.0.1:1338";
const DEFAULT_CLIENT_CONNECT: &str = "127.0.0.1:1339";

/// Contents of `huron.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    listen: Option<String>,
    advertise: Option<String>,
    service_listen: Option<String>,
    proxy_listen: Option<String>,
    client_connect: Option<String>,
    store: bool,
    standalone: bool,
    #[serde(flatten)]
    node: NodeConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen: String,
    pub advertise: Option<String>,
    pub service_listen: String,
    pub proxy_listen: String,
    pub client_connect: String,
    pub store: bool,
    /// Commit to the built-in dummy application instead of a socket one.
    pub standalone: bool,
    pub node: NodeConfig,
}

/// Resolve the settings for `run`.
pub fn load(args: &RunArgs) -> Result<Settings> {
    let file = read_file(&args.data_dir)?;
    Ok(merge(file, args))
}

fn read_file(data_dir: &Path) -> Result<FileConfig> {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}

fn merge(file: FileConfig, args: &RunArgs) -> Settings {
    let mut node = file.node;
    let ms = Duration::from_millis;

    if let Some(v) = args.heartbeat {
        node.heartbeat = ms(v);
    }
    if let Some(v) = args.slow_heartbeat {
        node.slow_heartbeat = ms(v);
    }
    if let Some(v) = args.timeout {
        node.tcp_timeout = ms(v);
    }
    if let Some(v) = args.join_timeout {
        node.join_timeout = ms(v);
    }
    if let Some(v) = args.cache_size {
        node.cache_size = v;
    }
    if let Some(v) = args.sync_limit {
        node.sync_limit = v;
    }
    if let Some(v) = args.max_pool {
        node.max_pool = v;
    }
    if let Some(v) = &args.moniker {
        node.moniker = v.clone();
    }
    node.enable_fast_sync |= args.fast_sync;
    node.bootstrap |= args.bootstrap;

    Settings {
        listen: args
            .listen
            .clone()
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
        advertise: args.advertise.clone().or(file.advertise),
        service_listen: args
            .service_listen
            .clone()
            .or(file.service_listen)
            .unwrap_or_else(|| DEFAULT_SERVICE_LISTEN.to_string()),
        proxy_listen: args
            .proxy_listen
            .clone()
            .or(file.proxy_listen)
            .unwrap_or_else(|| DEFAULT_PROXY_LISTEN.to_string()),
        client_connect: args
            .client_connect
            .clone()
            .or(file.client_connect)
            .unwrap_or_else(|| DEFAULT_CLIENT_CONNECT.to_string()),
        store: file.store || args.store,
        standalone: file.standalone || args.standalone,
        node,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = RunArgs {
            data_dir: dir.path().to_path_buf(),
            ..RunArgs::default()
        };
        let settings = load(&args).unwrap();
        assert_eq!(settings.listen, DEFAULT_LISTEN);
        assert_eq!(settings.service_listen, DEFAULT_SERVICE_LISTEN);
        assert!(!settings.store);
        assert!(!settings.standalone);
        assert_eq!(settings.proxy_listen, DEFAULT_PROXY_LISTEN);
        assert_eq!(settings.client_connect, DEFAULT_CLIENT_CONNECT);
        assert_eq!(settings.node, NodeConfig::default());
    }

    #[test]
    fn proxy_settings_come_from_file_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "client_connect = \"10.0.0.5:1339\"\nstandalone = true\n",
        )
        .unwrap();
        let args = RunArgs {
            data_dir: dir.path().to_path_buf(),
            proxy_listen: Some("0.0.0.0:2338".to_string()),
            ..RunArgs::default()
        };
        let settings = load(&args).unwrap();
        assert_eq!(settings.proxy_listen, "0.0.0.0:2338");
        assert_eq!(settings.client_connect, "10.0.0.5:1339");
        assert!(settings.standalone);
    }

    #[test]
    fn flags_override_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "listen = \"0.0.0.0:9000\"\nstore = true\nheartbeat = 40\nsync_limit = 7\n",
        )
        .unwrap();
        let args = RunArgs {
            data_dir: dir.path().to_path_buf(),
            heartbeat: Some(15),
            fast_sync: true,
            ..RunArgs::default()
        };

        let settings = load(&args).unwrap();
        assert_eq!(settings.listen, "0.0.0.0:9000");
        assert!(settings.store);
        assert_eq!(settings.node.heartbeat, Duration::from_millis(15));
        assert_eq!(settings.node.sync_limit, 7);
        assert!(settings.node.enable_fast_sync);
    }

    #[test]
    fn bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "heartbeat = \"soon\"").unwrap();
        let args = RunArgs {
            data_dir: dir.path().to_path_buf(),
            ..RunArgs::default()
        };
        assert!(load(&args).is_err());
    }
}
