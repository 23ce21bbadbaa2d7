//! Configuration for the `tasksync` client.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tasksync/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error. An explicit `--config`
//! path that doesn't exist is.

use std::path::PathBuf;
use std::time::Duration;

use tasksync_proto::comment::Author;
use tasksync_proto::task::{TaskId, TaskStatus};
use url::Url;

use crate::connection::{DEFAULT_BACKOFF_SECS, ReconnectPolicy};
use crate::http::HttpWriteApi;
use crate::net::SyncConfig;
use crate::pending::DEFAULT_OWNED_GRACE;
use crate::transport::ws::WsConnector;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting needed to reach the hub is not set anywhere.
    #[error("missing setting: {0}")]
    Missing(&'static str),

    /// A URL setting does not parse.
    #[error("invalid {field}: {source}")]
    InvalidUrl {
        /// Which setting.
        field: &'static str,
        /// Parser error.
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    sync: SyncFileConfig,
    ui: UiFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    hub_url: Option<String>,
    api_url: Option<String>,
    user_id: Option<String>,
    display_name: Option<String>,
    connect_timeout_secs: Option<u64>,
    invoke_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    write_timeout_secs: Option<u64>,
    owned_grace_secs: Option<u64>,
    backoff_secs: Option<Vec<u64>>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Hub WebSocket URL.
    pub hub_url: Option<String>,
    /// Base URL of the REST write path.
    pub api_url: Option<String>,
    /// Acting user. Doubles as the credential presented to the hub.
    pub user_id: Option<String>,
    /// Name shown on optimistic entries. Defaults to the user id.
    pub display_name: Option<String>,
    /// Timeout for the hub handshake.
    pub connect_timeout: Duration,
    /// Timeout for a group join/leave invocation.
    pub invoke_timeout: Duration,
    /// Capacity of the driver's channels.
    pub channel_capacity: usize,

    // -- Sync --
    /// Bound on each write call.
    pub write_timeout: Duration,
    /// How long an own write's echo is suppressed.
    pub owned_grace: Duration,
    /// Reconnect delays in seconds; the last one repeats.
    pub backoff_secs: Vec<u64>,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            api_url: None,
            user_id: None,
            display_name: None,
            connect_timeout: Duration::from_secs(10),
            invoke_timeout: Duration::from_secs(5),
            channel_capacity: 256,
            write_timeout: Duration::from_secs(15),
            owned_grace: DEFAULT_OWNED_GRACE,
            backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
            timestamp_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            hub_url: cli.hub_url.clone().or_else(|| file.network.hub_url.clone()),
            api_url: cli.api_url.clone().or_else(|| file.network.api_url.clone()),
            user_id: cli.user_id.clone().or_else(|| file.network.user_id.clone()),
            display_name: cli
                .display_name
                .clone()
                .or_else(|| file.network.display_name.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            invoke_timeout: file
                .network
                .invoke_timeout_secs
                .map_or(defaults.invoke_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            write_timeout: file
                .sync
                .write_timeout_secs
                .map_or(defaults.write_timeout, Duration::from_secs),
            owned_grace: file
                .sync
                .owned_grace_secs
                .map_or(defaults.owned_grace, Duration::from_secs),
            backoff_secs: file
                .sync
                .backoff_secs
                .clone()
                .filter(|secs| !secs.is_empty())
                .unwrap_or(defaults.backoff_secs),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// The identity writes are attributed to.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if no user id is configured.
    pub fn author(&self) -> Result<Author, ConfigError> {
        let user_id = self.user_id.clone().ok_or(ConfigError::Missing("user_id"))?;
        let display_name = self.display_name.clone().unwrap_or_else(|| user_id.clone());
        Ok(Author::new(user_id, display_name))
    }

    /// Builds the hub connector.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] or [`ConfigError::InvalidUrl`] for `hub_url`.
    pub fn to_connector(&self) -> Result<WsConnector, ConfigError> {
        let raw = self.hub_url.as_deref().ok_or(ConfigError::Missing("hub_url"))?;
        let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            field: "hub_url",
            source,
        })?;
        Ok(WsConnector::new(url.as_str())
            .with_connect_timeout(self.connect_timeout)
            .with_invoke_timeout(self.invoke_timeout)
            .with_channel_capacity(self.channel_capacity))
    }

    /// Builds the REST write client.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] for `api_url` or `user_id`, or
    /// [`ConfigError::InvalidUrl`].
    pub fn to_write_api(&self) -> Result<HttpWriteApi, ConfigError> {
        let raw = self.api_url.as_deref().ok_or(ConfigError::Missing("api_url"))?;
        let mut base = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            field: "api_url",
            source,
        })?;
        // Url::join drops the last path segment unless it ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let credential = self.user_id.clone().ok_or(ConfigError::Missing("user_id"))?;
        Ok(HttpWriteApi::new(base, credential))
    }

    /// Builds the driver configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if no user id is configured.
    pub fn to_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let author = self.author()?;
        let mut config = SyncConfig::new(author.user_id.clone(), author);
        config.write_timeout = self.write_timeout;
        config.owned_grace = self.owned_grace;
        config.backoff = ReconnectPolicy::from_secs(&self.backoff_secs);
        config.channel_capacity = self.channel_capacity;
        Ok(config)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time task comment client")]
pub struct CliArgs {
    /// WebSocket URL of the hub (e.g. `ws://127.0.0.1:8080/hub`).
    #[arg(long, env = "TASKSYNC_HUB_URL")]
    pub hub_url: Option<String>,

    /// Base URL of the REST write path (e.g. `http://127.0.0.1:8080/`).
    #[arg(long, env = "TASKSYNC_API_URL")]
    pub api_url: Option<String>,

    /// Acting user id.
    #[arg(long, env = "TASKSYNC_USER")]
    pub user_id: Option<String>,

    /// Display name for your own comments.
    #[arg(long, env = "TASKSYNC_NAME")]
    pub display_name: Option<String>,

    /// Path to config file (default: `~/.config/tasksync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/tasksync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Client subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print a task's thread and follow live changes until Ctrl-C.
    Watch {
        /// Task id.
        task: TaskId,
    },
    /// Post a comment.
    Comment {
        /// Task id.
        task: TaskId,
        /// Comment text.
        text: String,
    },
    /// Reply to a comment, or to a reply with `--parent`.
    Reply {
        /// Task id.
        task: TaskId,
        /// Comment id.
        comment: u64,
        /// Reply being answered.
        #[arg(long)]
        parent: Option<u64>,
        /// Reply text.
        text: String,
    },
    /// Delete one of your comments, or a reply with `--reply`.
    Delete {
        /// Task id.
        task: TaskId,
        /// Comment or reply id.
        id: u64,
        /// Treat `id` as a reply id.
        #[arg(long)]
        reply: bool,
    },
    /// Move a task to its next status.
    Status {
        /// Task id.
        task: TaskId,
        /// Current status (pending, in-progress, completed).
        #[arg(long)]
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("tasksync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
