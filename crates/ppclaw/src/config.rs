use crate::error::ConfigurationError;
use clap::{Parser, Subcommand};
use ppclaw_common::types::DEFAULT_DISCOVERY_URL;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// CLI interface for the connector.
#[derive(Parser)]
#[command(name = "ppclaw", about = "ppclaw relay connector")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a custom configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Discovery endpoint override.
    #[arg(long, global = true)]
    pub discovery_url: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a relay and serve messages until interrupted.
    Start,
    /// Fetch the relay directory and print it.
    Relays,
    /// Inspect or edit stored group notes.
    Notes {
        /// Notes subcommand to run.
        #[command(subcommand)]
        action: NotesAction,
    },
}

/// Group notes subcommands.
#[derive(Subcommand)]
pub enum NotesAction {
    /// Print the notes of a group.
    Show {
        /// Group id (UUID).
        group_id: String,
    },
    /// Replace the notes of a group.
    Set {
        /// Group id (UUID).
        group_id: String,
        /// New notes content; read from stdin when omitted.
        content: Option<String>,
    },
    /// Delete the notes of a group.
    Clear {
        /// Group id (UUID).
        group_id: String,
    },
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Deserialize, Clone)]
pub struct ConnectorConfig {
    /// Discovery endpoint returning the relay list.
    pub discovery_url: String,
    /// Durable API key, once bound.
    #[serde(default)]
    pub api_key: Option<String>,
    /// One-time bind token, before binding.
    #[serde(default)]
    pub bind_token: Option<String>,
    /// Agent instance name; namespaces local storage.
    pub instance: String,
    /// Directory for local data (notes). Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Reconnection backoff settings.
    pub reconnect: ReconnectConfig,
    /// WebSocket keepalive ping settings.
    pub keepalive: KeepaliveConfig,
    /// Agent gateway settings.
    pub agent: AgentConfig,
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<REDACTED>");
        f.debug_struct("ConnectorConfig")
            .field("discovery_url", &self.discovery_url)
            .field("api_key", &redact(&self.api_key))
            .field("bind_token", &redact(&self.bind_token))
            .field("instance", &self.instance)
            .field("data_dir", &self.data_dir)
            .field("reconnect", &self.reconnect)
            .field("keepalive", &self.keepalive)
            .field("agent", &self.agent)
            .finish()
    }
}

/// Reconnect backoff parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Random spread applied to each delay (0.0 = none, max 0.5).
    pub jitter: f64,
}

/// WebSocket keepalive settings.
#[derive(Debug, Deserialize, Clone)]
pub struct KeepaliveConfig {
    /// Interval between keepalive pings, in seconds.
    pub interval_s: u64,
}

/// Agent gateway the connector forwards messages to.
#[derive(Deserialize, Clone)]
pub struct AgentConfig {
    /// HTTP endpoint receiving agent requests.
    pub url: String,
    /// Bearer token for the gateway; empty to send none.
    pub token: String,
    /// Per-request timeout, in seconds.
    pub timeout_s: u64,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("url", &self.url)
            .field("token", &"<REDACTED>")
            .field("timeout_s", &self.timeout_s)
            .finish()
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            api_key: None,
            bind_token: None,
            instance: "default".to_string(),
            data_dir: None,
            reconnect: ReconnectConfig::default(),
            keepalive: KeepaliveConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self { interval_s: 30 }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:18789/hooks/ppclaw".to_string(),
            token: String::new(),
            timeout_s: 120,
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl ConnectorConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if !is_http_url(&self.discovery_url) {
            return Err(format!(
                "discovery_url must start with http:// or https://, got: {}",
                self.discovery_url
            ));
        }

        if self.instance.is_empty()
            || self.instance.len() > 64
            || !self
                .instance
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!(
                "instance must be 1-64 characters of [A-Za-z0-9_-], got: {:?}",
                self.instance
            ));
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err("reconnect.max_delay_ms must be >= initial_delay_ms".to_string());
        }
        if !self.reconnect.backoff_factor.is_finite() || self.reconnect.backoff_factor < 1.0 {
            return Err("reconnect.backoff_factor must be a finite number >= 1".to_string());
        }
        if !(0.0..=0.5).contains(&self.reconnect.jitter) {
            return Err("reconnect.jitter must be between 0.0 and 0.5".to_string());
        }

        if self.keepalive.interval_s == 0 {
            return Err("keepalive.interval_s must be greater than 0".to_string());
        }

        if !is_http_url(&self.agent.url) {
            return Err(format!(
                "agent.url must start with http:// or https://, got: {}",
                self.agent.url
            ));
        }
        if self.agent.timeout_s == 0 {
            return Err("agent.timeout_s must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Directory for local data.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir().map_or_else(|| PathBuf::from(".ppclaw"), |d| d.join("ppclaw"))
        })
    }
}

/// Resolve the configuration file path.
///
/// An explicit path always wins. Otherwise the platform config dir is used
/// if a file exists there, then `~/.config/ppclaw/`, and finally the
/// platform location (where a first bind will create the file).
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    // Check platform-native config dir first, then fall back to ~/.config/ppclaw/
    let native_path = dirs::config_dir().map(|d| d.join("ppclaw").join("config.toml"));
    let xdg_path = dirs::home_dir().map(|d| d.join(".config").join("ppclaw").join("config.toml"));

    native_path
        .clone()
        .filter(|p| p.exists())
        .or_else(|| xdg_path.filter(|p| p.exists()))
        .or(native_path)
        .unwrap_or_else(|| PathBuf::from("ppclaw.toml"))
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: &Path) -> anyhow::Result<ConnectorConfig> {
    let defaults = ConnectorConfig::default();
    let mut builder = config::Config::builder()
        .set_default("discovery_url", defaults.discovery_url.as_str())?
        .set_default("instance", defaults.instance.as_str())?
        .set_default(
            "reconnect.initial_delay_ms",
            defaults.reconnect.initial_delay_ms as i64,
        )?
        .set_default(
            "reconnect.max_delay_ms",
            defaults.reconnect.max_delay_ms as i64,
        )?
        .set_default(
            "reconnect.backoff_factor",
            defaults.reconnect.backoff_factor,
        )?
        .set_default("reconnect.jitter", defaults.reconnect.jitter)?
        .set_default("keepalive.interval_s", defaults.keepalive.interval_s as i64)?
        .set_default("agent.url", defaults.agent.url.as_str())?
        .set_default("agent.token", defaults.agent.token.as_str())?
        .set_default("agent.timeout_s", defaults.agent.timeout_s as i64)?;

    if path.exists() {
        builder = builder.add_source(config::File::from(path));
    }

    // PPCLAW_API_KEY, PPCLAW_RECONNECT__MAX_DELAY_MS, ...
    builder = builder.add_source(
        config::Environment::with_prefix("PPCLAW")
            .prefix_separator("_")
            .separator("__"),
    );

    let settings = builder.build()?;
    let config: ConnectorConfig = settings.try_deserialize()?;

    Ok(config)
}

/// Partial configuration update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigPatch {
    /// New API key to store.
    pub api_key: Option<String>,
    /// Remove the stored bind token.
    pub clear_bind_token: bool,
}

impl ConfigPatch {
    /// Patch recorded after a successful bind.
    #[must_use]
    pub fn bound(api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            clear_bind_token: true,
        }
    }
}

/// Durable configuration storage.
pub trait ConfigStore: Send + Sync {
    /// Merge `patch` into the stored configuration and save it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Persist`] if the change cannot be saved.
    fn persist(&self, patch: &ConfigPatch) -> Result<(), ConfigurationError>;
}

/// [`ConfigStore`] that rewrites a TOML file in place.
///
/// Keys not touched by the patch are preserved.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    /// Store backed by the file at `path` (created on first persist).
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// File location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for ConfigFile {
    fn persist(&self, patch: &ConfigPatch) -> Result<(), ConfigurationError> {
        let err = |e: &dyn fmt::Display| ConfigurationError::Persist(format!("{}: {e}", self.path.display()));

        let mut table: toml::Table = if self.path.exists() {
            let contents = std::fs::read_to_string(&self.path).map_err(|e| err(&e))?;
            contents.parse().map_err(|e| err(&e))?
        } else {
            toml::Table::new()
        };

        if let Some(ref api_key) = patch.api_key {
            table.insert("api_key".to_string(), toml::Value::String(api_key.clone()));
        }
        if patch.clear_bind_token {
            table.remove("bind_token");
        }

        let contents = toml::to_string_pretty(&table).map_err(|e| err(&e))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| err(&e))?;
        }
        // Atomic save: write to temp file, then rename
        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents).map_err(|e| err(&e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| err(&e))?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(|e| err(&e))?;

        Ok(())
    }
}
