//! Configuration loading for the switchboard OSC bridge.
//!
//! Kept dependency-light so every crate in the workspace can import it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use switchconf::BridgeConfig;
//!
//! let (config, sources) = BridgeConfig::load_with_sources_from(None).expect("Failed to load config");
//! println!("loaded from: {:?}", sources.files);
//! println!("command channel: {}", config.command_addr());
//! println!("remote app: {}", config.remote_addr());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/switchboard/config.toml` (system)
//! 2. `~/.config/switchboard/config.toml` (user)
//! 3. `./switchboard.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`OSC_*`, `SWITCHBOARD_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [command]
//! host = "127.0.0.1"
//! port = 65432
//!
//! [remote]
//! host = "127.0.0.1"
//! port = 11000
//!
//! [receive]
//! port = 11001
//!
//! [correlation]
//! timeout_secs = 5.0
//! waiter_policy = "fifo"
//! address_root = "/live"
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    CommandConfig, CorrelationConfig, ReceiveConfig, RemoteConfig, TelemetryConfig, WaiterPolicy,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value in {key}: {message}")]
    InvalidEnv { key: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub command: CommandConfig,
    pub remote: RemoteConfig,
    pub receive: ReceiveConfig,
    pub correlation: CorrelationConfig,
    pub telemetry: TelemetryConfig,
}

impl BridgeConfig {
    /// Load configuration from all sources and report where values came from.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/switchboard/config.toml`
    /// 3. `~/.config/switchboard/config.toml`
    /// 4. `./switchboard.toml`, or `config_path` when given (must exist)
    /// 5. Environment variables
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = Self::load_files(&files)?;

        loader::apply_env_overrides(&mut config, &mut sources)?;
        config.validate()?;

        Ok((config, sources))
    }

    /// Merge the given files in order, without consulting the environment.
    pub fn load_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_table(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let origin = files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let config = loader::table_to_config(merged, &origin)?;

        Ok((config, sources))
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.correlation.timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "correlation.timeout_secs must be a positive number, got {}",
                timeout
            )));
        }
        if Duration::try_from_secs_f64(timeout).is_err() {
            return Err(ConfigError::Invalid(format!(
                "correlation.timeout_secs is too large, got {}",
                timeout
            )));
        }
        if self.command.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "command.max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        let root = &self.correlation.address_root;
        if !root.is_empty() && (!root.starts_with('/') || root.ends_with('/')) {
            return Err(ConfigError::Invalid(format!(
                "correlation.address_root must be empty or look like \"/live\", got \"{}\"",
                root
            )));
        }
        Ok(())
    }

    /// `host:port` of the command channel listener.
    pub fn command_addr(&self) -> String {
        format!("{}:{}", self.command.host, self.command.port)
    }

    /// `host:port` of the remote application.
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote.host, self.remote.port)
    }

    /// `host:port` the reply socket binds to.
    pub fn receive_addr(&self) -> String {
        format!("{}:{}", self.receive.host, self.receive.port)
    }

    /// Reply deadline as a `Duration`. Only meaningful on a validated config.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.correlation.timeout_secs)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# switchboard configuration\n\n");

        output.push_str("[command]\n");
        output.push_str(&format!("host = {}\n", quoted(&self.command.host)));
        output.push_str(&format!("port = {}\n", self.command.port));
        output.push_str(&format!(
            "max_frame_bytes = {}\n",
            self.command.max_frame_bytes
        ));

        output.push_str("\n[remote]\n");
        output.push_str(&format!("host = {}\n", quoted(&self.remote.host)));
        output.push_str(&format!("port = {}\n", self.remote.port));

        output.push_str("\n[receive]\n");
        output.push_str(&format!("host = {}\n", quoted(&self.receive.host)));
        output.push_str(&format!("port = {}\n", self.receive.port));

        output.push_str("\n[correlation]\n");
        output.push_str(&format!(
            "timeout_secs = {:?}\n",
            self.correlation.timeout_secs
        ));
        output.push_str(&format!(
            "waiter_policy = \"{}\"\n",
            self.correlation.waiter_policy
        ));
        output.push_str(&format!("address_root = {}\n", quoted(&self.correlation.address_root)));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = {}\n", quoted(&self.telemetry.log_level)));
        output.push_str(&format!("otlp_endpoint = {}\n", quoted(&self.telemetry.otlp_endpoint)));

        output
    }
}

/// Render a string as a TOML value, escaping as needed.
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}
