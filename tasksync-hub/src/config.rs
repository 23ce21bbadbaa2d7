//! Hub settings: command line over `hub.toml` over compiled defaults.
//!
//! The file is flat (no sections) and every key is optional:
//!
//! ```toml
//! bind_addr = "127.0.0.1:8080"
//! max_frame_size = 65536
//! log_level = "debug"
//! ```
//!
//! Without `--config` the file is looked up as `tasksync/hub.toml` under the
//! platform config directory, and a missing file is fine.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::hub::DEFAULT_MAX_FRAME_SIZE;

/// Largest frame limit the hub accepts. Comment bodies are small; anything
/// near this is a misconfiguration.
pub const MAX_FRAME_SIZE_LIMIT: usize = 16 * 1024 * 1024;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid {key} {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Hub command line. Every flag left unset falls through to the file.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "TaskSync hub server")]
pub struct HubCliArgs {
    /// Socket address to listen on.
    #[arg(short, long, env = "TASKSYNC_HUB_ADDR")]
    pub bind: Option<String>,

    /// Hub settings file.
    #[arg(short, long, env = "TASKSYNC_HUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Largest inbound WebSocket frame, in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Tracing filter, e.g. `info` or `tasksync_hub=debug`.
    #[arg(long, env = "TASKSYNC_HUB_LOG")]
    pub log_level: Option<String>,
}

/// Contents of `hub.toml`.
#[derive(Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct HubFile {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    log_level: Option<String>,
}

/// Settings the hub runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub bind_addr: SocketAddr,
    pub max_frame_size: usize,
    pub log_level: String,
}

impl HubConfig {
    /// Reads the settings file and layers the command line on top.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if an explicit file is missing, any file fails to
    /// parse, or a resolved value is out of range.
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_file(path)?,
            None => match default_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => HubFile::default(),
            },
        };
        Self::resolve(cli, file)
    }

    fn resolve(cli: &HubCliArgs, file: HubFile) -> Result<Self, ConfigError> {
        let bind = cli
            .bind
            .clone()
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key: "bind_addr",
            value: bind.clone(),
            reason: e.to_string(),
        })?;

        let max_frame_size = cli
            .max_frame_size
            .or(file.max_frame_size)
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);
        if max_frame_size == 0 || max_frame_size > MAX_FRAME_SIZE_LIMIT {
            return Err(ConfigError::Invalid {
                key: "max_frame_size",
                value: max_frame_size.to_string(),
                reason: format!("must be between 1 and {MAX_FRAME_SIZE_LIMIT}"),
            });
        }

        Ok(Self {
            bind_addr,
            max_frame_size,
            log_level: cli
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tasksync").join("hub.toml"))
}

fn read_file(path: &Path) -> Result<HubFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
