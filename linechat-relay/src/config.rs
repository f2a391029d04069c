//! Configuration system for the linechat relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/linechat-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading relay configuration.
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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    host: Option<String>,
    port: Option<i64>,
    max_line_length: Option<usize>,
    max_name_attempts: Option<usize>,
    outbound_queue_size: Option<usize>,
    handshake_timeout_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "linechat TCP broadcast relay")]
pub struct RelayCliArgs {
    /// Interface address to listen on.
    #[arg(long, env = "LINECHAT_HOST")]
    pub host: Option<String>,

    /// TCP port to listen on (1-65535).
    #[arg(short, long, env = "LINECHAT_PORT", allow_negative_numbers = true)]
    pub port: Option<i64>,

    /// Path to config file (default: `~/.config/linechat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Longest accepted client line in bytes.
    #[arg(long)]
    pub max_line_length: Option<usize>,

    /// Lines buffered per client before deliveries to it are dropped.
    #[arg(long)]
    pub outbound_queue_size: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LINECHAT_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
///
/// The port is kept as given; [`crate::server::Server::with_config`] rejects
/// values outside `1..=65535`.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interface address to listen on (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port to listen on.
    pub port: i64,
    /// Longest accepted client line in bytes, excluding the terminator.
    pub max_line_length: usize,
    /// Nickname candidates tried before the handshake gives up.
    pub max_name_attempts: usize,
    /// Per-client outbound queue capacity, in lines.
    pub outbound_queue_size: usize,
    /// How long a client may take to send its nickname.
    pub handshake_timeout: Duration,
    /// How long shutdown waits for connection tasks before aborting them.
    pub shutdown_grace: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_line_length: 8 * 1024,
            max_name_attempts: 16,
            outbound_queue_size: 256,
            handshake_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Default configuration listening on `port`.
    #[must_use]
    pub fn with_port(port: i64) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();
        let server = &file.server;

        Self {
            host: cli
                .host
                .clone()
                .or_else(|| server.host.clone())
                .unwrap_or(defaults.host),
            port: cli.port.or(server.port).unwrap_or(defaults.port),
            max_line_length: cli
                .max_line_length
                .or(server.max_line_length)
                .unwrap_or(defaults.max_line_length),
            max_name_attempts: server
                .max_name_attempts
                .unwrap_or(defaults.max_name_attempts),
            outbound_queue_size: cli
                .outbound_queue_size
                .or(server.outbound_queue_size)
                .unwrap_or(defaults.outbound_queue_size),
            handshake_timeout: server
                .handshake_timeout_secs
                .map_or(defaults.handshake_timeout, Duration::from_secs),
            shutdown_grace: server
                .shutdown_grace_secs
                .map_or(defaults.shutdown_grace, Duration::from_secs),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("linechat-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
