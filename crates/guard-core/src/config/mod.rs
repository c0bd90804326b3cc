//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: host, port, worker count, body cap and timeouts
//! 2. **Config file**: optional TOML file named by `GUARD_CONFIG_FILE`, flat lowercase keys
//! 3. **Environment variables**: `PROXY_*`, `NODE_*`, `CONFIG_*`, `LOCAL_NODE_*`, `DB_*`, `DEV_MODE`
//!
//! Raw values land in [`EnvSettings`] and are then validated into the typed [`AppConfig`].
//!
//! # Deployment Shapes
//!
//! - **Single upstream**: `NODE_URL`, stored under `NODE_KEY`, admin at `CONFIG_PATH`.
//! - **Failover**: `NODE1_URL` + `NODE2_URL`, stored under `<NODE_KEY>_1` / `<NODE_KEY>_2`,
//!   admin at `CONFIG_PATH_1` (or `CONFIG_PATH`) and `CONFIG_PATH_2`.
//! - **Local binding** (optional): `LOCAL_NODE_PATH` + `LOCAL_NODE_URL`, never persisted.
//!
//! # Example
//!
//! ```toml
//! proxy_port = "9000"
//! proxy_methods = "getBlock, getTransaction"
//! node_key = "btc"
//! node_url = "http://bitcoind:8332/"
//! config_path = "/config"
//! db_server = "sqlite://proxy.db"
//! ```

use crate::types::{Credentials, NodeRole, TargetError, UpstreamTarget};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    time::Duration,
};
use thiserror::Error;

/// Environment variable naming the optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "GUARD_CONFIG_FILE";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_WORKERS: usize = 10;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("invalid {name} url {url:?}: {source}")]
    InvalidUrl {
        name: &'static str,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("credentials for {name} are not a valid header value")]
    InvalidCredentials { name: &'static str },
}

/// Flat view of every recognised option, as read from file and environment.
///
/// Every field is optional here; defaults and requirements are applied by [`AppConfig::from_settings`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    pub proxy_host: Option<String>,
    pub proxy_port: Option<String>,
    pub proxy_workers: Option<String>,
    pub proxy_max_body_bytes: Option<String>,
    pub proxy_token: Option<String>,
    pub proxy_user: Option<String>,
    pub proxy_password: Option<String>,
    pub proxy_methods: Option<String>,
    pub proxy_paths: Option<String>,
    pub metrics_port: Option<String>,

    pub config_path: Option<String>,
    pub config_path_1: Option<String>,
    pub config_path_2: Option<String>,
    pub config_token: Option<String>,
    pub config_user: Option<String>,
    pub config_password: Option<String>,

    pub node_key: Option<String>,
    pub node_url: Option<String>,
    pub node_token: Option<String>,
    pub node_user: Option<String>,
    pub node_password: Option<String>,
    pub node1_url: Option<String>,
    pub node1_token: Option<String>,
    pub node1_user: Option<String>,
    pub node1_password: Option<String>,
    pub node2_url: Option<String>,
    pub node2_token: Option<String>,
    pub node2_user: Option<String>,
    pub node2_password: Option<String>,

    pub local_node_path: Option<String>,
    pub local_node_url: Option<String>,
    pub local_node_token: Option<String>,
    pub local_node_user: Option<String>,
    pub local_node_password: Option<String>,

    pub db_server: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,

    pub dev_mode: Option<String>,
}

impl EnvSettings {
    /// Reads the optional config file and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Source`] if the file cannot be read or a value cannot be decoded.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(File::new(&path, FileFormat::Toml).required(true));
        }
        let settings = builder.add_source(Environment::default()).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Builds settings from an explicit variable map instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Source`] if a value cannot be decoded.
    pub fn from_map<K, V, I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let map: HashMap<String, String> =
            vars.into_iter().map(|(k, v)| (k.as_ref().to_lowercase(), v.into())).collect();
        let settings =
            Config::builder().add_source(Environment::default().source(Some(map))).build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// Returns the value if it is present and non-blank.
fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn text(value: Option<&String>) -> &str {
    non_empty(value).unwrap_or_default()
}

/// Splits a comma-separated whitelist, trimming entries and dropping empty ones.
#[must_use]
pub fn parse_list(raw: Option<&str>) -> HashSet<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    value: Option<&String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid { name, reason: e.to_string() }),
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Worker count; also the depth of the job queue.
    pub num_workers: usize,

    pub max_body_bytes: usize,

    pub header_read_timeout: Duration,

    /// Bound on reading the full request body.
    pub read_timeout: Duration,

    /// Bound on producing the whole response.
    pub write_timeout: Duration,

    /// Port for the Prometheus scrape endpoint on `host`; unset disables it.
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            num_workers: DEFAULT_WORKERS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            header_read_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(20),
            metrics_port: None,
        }
    }
}

impl ServerConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if host and port do not form a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        Self::addr(&self.host, self.port)
    }

    /// Address of the metrics endpoint, if enabled.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::socket_addr`].
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.metrics_port.map(|port| Self::addr(&self.host, port)).transpose()
    }

    fn addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
        format!("{host}:{port}").parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::Invalid { name: "PROXY_HOST", reason: e.to_string() }
        })
    }
}

/// Request admission rules; immutable for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub proxy_cred: Credentials,
    pub admin_cred: Credentials,

    /// Empty means every path is allowed.
    pub allowed_paths: HashSet<String>,

    /// Empty means every method is allowed.
    pub allowed_methods: HashSet<String>,

    pub max_body_bytes: usize,

    /// Admin path of the primary binding.
    pub admin_path: String,

    /// Prefix routing to the local binding; empty when there is none.
    pub local_prefix: String,
}

impl AccessPolicy {
    #[must_use]
    pub fn path_allowed(&self, path: &str) -> bool {
        self.allowed_paths.is_empty() || self.allowed_paths.contains(path)
    }

    #[must_use]
    pub fn method_allowed(&self, method: &str) -> bool {
        self.allowed_methods.is_empty() || self.allowed_methods.contains(method)
    }

    #[must_use]
    pub fn has_local(&self) -> bool {
        !self.local_prefix.is_empty()
    }
}

/// Boot-time description of one binding.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Store primary key.
    pub key: String,
    pub role: NodeRole,

    /// Target from the environment; used at first boot and for empty-url admin resets.
    pub defaults: UpstreamTarget,

    pub admin_path: String,
    pub store_backed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database URL, e.g. `sqlite://proxy.db`.
    pub server: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub dev_mode: bool,
}

/// Fully validated process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub policy: AccessPolicy,
    pub nodes: Vec<NodeSettings>,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads and validates configuration from the config file and process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable sources, missing required settings or invalid values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_settings(&EnvSettings::load()?)
    }

    /// Validates raw settings into a typed configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when `NODE_KEY`, an upstream URL or `DB_SERVER` is absent,
    /// and [`ConfigError::Invalid`] / [`ConfigError::InvalidUrl`] for malformed values.
    pub fn from_settings(env: &EnvSettings) -> Result<Self, ConfigError> {
        let server = ServerConfig {
            host: non_empty(env.proxy_host.as_ref()).unwrap_or(DEFAULT_HOST).to_string(),
            port: parse_number("PROXY_PORT", env.proxy_port.as_ref(), DEFAULT_PORT)?,
            num_workers: parse_number("PROXY_WORKERS", env.proxy_workers.as_ref(), DEFAULT_WORKERS)?,
            max_body_bytes: parse_number(
                "PROXY_MAX_BODY_BYTES",
                env.proxy_max_body_bytes.as_ref(),
                DEFAULT_MAX_BODY_BYTES,
            )?,
            metrics_port: non_empty(env.metrics_port.as_ref())
                .map(|raw| {
                    raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                        name: "METRICS_PORT",
                        reason: e.to_string(),
                    })
                })
                .transpose()?,
            ..ServerConfig::default()
        };
        if server.num_workers == 0 {
            return Err(ConfigError::Invalid {
                name: "PROXY_WORKERS",
                reason: "must be greater than 0".to_string(),
            });
        }

        let node_key = non_empty(env.node_key.as_ref()).ok_or(ConfigError::Missing("NODE_KEY"))?;
        let mut nodes = Vec::with_capacity(3);

        if let Some(url1) = non_empty(env.node1_url.as_ref()) {
            let url2 = non_empty(env.node2_url.as_ref()).ok_or(ConfigError::Missing("NODE2_URL"))?;
            let path1 = non_empty(env.config_path_1.as_ref())
                .or_else(|| non_empty(env.config_path.as_ref()))
                .ok_or(ConfigError::Missing("CONFIG_PATH_1"))?;
            let path2 = non_empty(env.config_path_2.as_ref())
                .ok_or(ConfigError::Missing("CONFIG_PATH_2"))?;

            nodes.push(NodeSettings {
                key: format!("{node_key}_1"),
                role: NodeRole::Primary,
                defaults: target(
                    "NODE1_URL",
                    url1,
                    text(env.node1_token.as_ref()),
                    text(env.node1_user.as_ref()),
                    text(env.node1_password.as_ref()),
                )?,
                admin_path: path1.to_string(),
                store_backed: true,
            });
            nodes.push(NodeSettings {
                key: format!("{node_key}_2"),
                role: NodeRole::Secondary,
                defaults: target(
                    "NODE2_URL",
                    url2,
                    text(env.node2_token.as_ref()),
                    text(env.node2_user.as_ref()),
                    text(env.node2_password.as_ref()),
                )?,
                admin_path: path2.to_string(),
                store_backed: true,
            });
        } else {
            let url = non_empty(env.node_url.as_ref()).ok_or(ConfigError::Missing("NODE_URL"))?;
            let path =
                non_empty(env.config_path.as_ref()).ok_or(ConfigError::Missing("CONFIG_PATH"))?;
            nodes.push(NodeSettings {
                key: node_key.to_string(),
                role: NodeRole::Primary,
                defaults: target(
                    "NODE_URL",
                    url,
                    text(env.node_token.as_ref()),
                    text(env.node_user.as_ref()),
                    text(env.node_password.as_ref()),
                )?,
                admin_path: path.to_string(),
                store_backed: true,
            });
        }

        let admin_path = nodes[0].admin_path.clone();
        for node in &nodes {
            if !node.admin_path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    name: "CONFIG_PATH",
                    reason: format!("admin path {:?} must start with '/'", node.admin_path),
                });
            }
        }

        let local_prefix = non_empty(env.local_node_path.as_ref())
            .map(|p| p.trim_end_matches('/').to_string())
            .unwrap_or_default();
        if !local_prefix.is_empty() {
            if !local_prefix.starts_with('/') {
                return Err(ConfigError::Invalid {
                    name: "LOCAL_NODE_PATH",
                    reason: "must start with '/'".to_string(),
                });
            }
            let url = non_empty(env.local_node_url.as_ref())
                .ok_or(ConfigError::Missing("LOCAL_NODE_URL"))?;
            nodes.push(NodeSettings {
                key: format!("{node_key}_local"),
                role: NodeRole::Local,
                defaults: target(
                    "LOCAL_NODE_URL",
                    url,
                    text(env.local_node_token.as_ref()),
                    text(env.local_node_user.as_ref()),
                    text(env.local_node_password.as_ref()),
                )?,
                admin_path: format!("{local_prefix}{admin_path}"),
                store_backed: false,
            });
        }

        let policy = AccessPolicy {
            proxy_cred: Credentials::from_parts(
                text(env.proxy_token.as_ref()),
                text(env.proxy_user.as_ref()),
                text(env.proxy_password.as_ref()),
            ),
            admin_cred: Credentials::from_parts(
                text(env.config_token.as_ref()),
                text(env.config_user.as_ref()),
                text(env.config_password.as_ref()),
            ),
            allowed_paths: parse_list(env.proxy_paths.as_deref()),
            allowed_methods: parse_list(env.proxy_methods.as_deref()),
            max_body_bytes: server.max_body_bytes,
            admin_path,
            local_prefix,
        };

        let store = StoreConfig {
            server: non_empty(env.db_server.as_ref())
                .ok_or(ConfigError::Missing("DB_SERVER"))?
                .to_string(),
            user: non_empty(env.db_user.as_ref()).map(str::to_string),
            password: non_empty(env.db_password.as_ref()).map(str::to_string),
        };

        let logging = LoggingConfig {
            dev_mode: non_empty(env.dev_mode.as_ref())
                .is_some_and(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0")),
        };

        Ok(Self { server, policy, nodes, store, logging })
    }

    /// Binding that answers non-admin traffic first.
    #[must_use]
    pub fn primary(&self) -> Option<&NodeSettings> {
        self.nodes.iter().find(|n| n.role == NodeRole::Primary)
    }

    #[must_use]
    pub fn has_failover(&self) -> bool {
        self.nodes.iter().any(|n| n.role == NodeRole::Secondary)
    }
}

fn target(
    name: &'static str,
    url: &str,
    token: &str,
    user: &str,
    password: &str,
) -> Result<UpstreamTarget, ConfigError> {
    UpstreamTarget::parse(url, Credentials::from_parts(token, user, password)).map_err(|e| match e {
        TargetError::Url(source) => ConfigError::InvalidUrl { name, url: url.to_string(), source },
        TargetError::Credentials => ConfigError::InvalidCredentials { name },
    })
}
