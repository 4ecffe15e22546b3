//! Config file discovery, table merging, and environment variable overlay.

use crate::{BridgeConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in load order (system, user, local).
///
/// Standard locations are skipped when absent. `cli_path` replaces the local
/// override and is always returned, so a missing file fails the load.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/switchboard/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("switchboard/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("switchboard.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse::<toml::Table>()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a typed config. Missing keys take defaults.
pub fn table_to_config(table: toml::Table, origin: &Path) -> Result<BridgeConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into::<BridgeConfig>()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
}

/// Parse a single TOML document into a config.
pub fn parse_config(contents: &str, path: &Path) -> Result<BridgeConfig, ConfigError> {
    let table = parse_table(contents, path)?;
    table_to_config(table, path)
}

/// Apply environment variable overrides to config.
///
/// Variables use the `OSC_*` names older deployments already set.
pub fn apply_env_overrides(
    config: &mut BridgeConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_overrides_from(config, sources, |key| env::var(key).ok())
}

/// Same as [`apply_env_overrides`] with an injectable lookup, so tests don't
/// have to mutate the process environment.
pub fn apply_overrides_from<F>(
    config: &mut BridgeConfig,
    sources: &mut ConfigSources,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("OSC_SOCKET_HOST") {
        config.command.host = v;
        sources.env_overrides.push("OSC_SOCKET_HOST".to_string());
    }
    if let Some(v) = lookup("OSC_SOCKET_PORT") {
        config.command.port = parse_env("OSC_SOCKET_PORT", &v)?;
        sources.env_overrides.push("OSC_SOCKET_PORT".to_string());
    }
    if let Some(v) = lookup("OSC_ABLETON_HOST") {
        config.remote.host = v;
        sources.env_overrides.push("OSC_ABLETON_HOST".to_string());
    }
    if let Some(v) = lookup("OSC_ABLETON_PORT") {
        config.remote.port = parse_env("OSC_ABLETON_PORT", &v)?;
        sources.env_overrides.push("OSC_ABLETON_PORT".to_string());
    }
    if let Some(v) = lookup("OSC_RECEIVE_PORT") {
        config.receive.port = parse_env("OSC_RECEIVE_PORT", &v)?;
        sources.env_overrides.push("OSC_RECEIVE_PORT".to_string());
    }

    if let Some(v) = lookup("SWITCHBOARD_TIMEOUT") {
        config.correlation.timeout_secs = parse_env("SWITCHBOARD_TIMEOUT", &v)?;
        sources.env_overrides.push("SWITCHBOARD_TIMEOUT".to_string());
    }
    if let Some(v) = lookup("SWITCHBOARD_WAITER_POLICY") {
        config.correlation.waiter_policy =
            v.parse().map_err(|message| ConfigError::InvalidEnv {
                key: "SWITCHBOARD_WAITER_POLICY".to_string(),
                message,
            })?;
        sources.env_overrides.push("SWITCHBOARD_WAITER_POLICY".to_string());
    }

    if let Some(v) = lookup("SWITCHBOARD_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("SWITCHBOARD_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over our own variable
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
    if let Some(v) = lookup("SWITCHBOARD_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("SWITCHBOARD_OTLP_ENDPOINT".to_string());
    }

    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WaiterPolicy;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_cli_path_replaces_local_override() {
        let explicit = Path::new("/nonexistent/explicit.toml");
        let files = discover_config_files_with_override(Some(explicit));
        assert_eq!(files.last().map(PathBuf::as_path), Some(explicit));
        assert!(!files.contains(&PathBuf::from("switchboard.toml")));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[remote]
host = "10.0.0.5"
"#;
        let config = parse_config(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.remote.host, "10.0.0.5");
        // Other values should be defaults
        assert_eq!(config.remote.port, 11000);
        assert_eq!(config.command.port, 65432);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[command]
host = "0.0.0.0"
port = 7000
max_frame_bytes = 1024

[remote]
host = "studio.local"
port = 9000

[receive]
host = "0.0.0.0"
port = 9001

[correlation]
timeout_secs = 1.5
waiter_policy = "replace"
address_root = ""

[telemetry]
log_level = "debug"
otlp_endpoint = "127.0.0.1:4317"
"#;
        let config = parse_config(toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.command.host, "0.0.0.0");
        assert_eq!(config.command.port, 7000);
        assert_eq!(config.command.max_frame_bytes, 1024);
        assert_eq!(config.remote.host, "studio.local");
        assert_eq!(config.remote.port, 9000);
        assert_eq!(config.receive.port, 9001);
        assert_eq!(config.correlation.timeout_secs, 1.5);
        assert_eq!(config.correlation.waiter_policy, WaiterPolicy::Replace);
        assert_eq!(config.correlation.address_root, "");
        assert_eq!(config.telemetry.log_level, "debug");
        assert!(config.telemetry.otlp_enabled());
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_config("[command\nport = 1", Path::new("broken.toml")).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, PathBuf::from("broken.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let toml = r#"
[correlation]
waiter_policy = "lottery"
"#;
        assert!(parse_config(toml, Path::new("test.toml")).is_err());
    }

    #[test]
    fn test_merge_tables_is_key_by_key() {
        let mut base: toml::Table = r#"
[remote]
host = "a"
port = 1
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = r#"
[remote]
port = 2
"#
        .parse()
        .unwrap();

        merge_tables(&mut base, overlay);
        let config = table_to_config(base, Path::new("merged")).unwrap();
        assert_eq!(config.remote.host, "a");
        assert_eq!(config.remote.port, 2);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BridgeConfig::default();
        let mut sources = ConfigSources::default();
        let lookup = lookup_from(&[
            ("OSC_SOCKET_PORT", "7777"),
            ("OSC_ABLETON_HOST", "192.168.1.20"),
            ("OSC_RECEIVE_PORT", "12001"),
            ("SWITCHBOARD_TIMEOUT", "2.5"),
            ("SWITCHBOARD_WAITER_POLICY", "Replace"),
        ]);

        apply_overrides_from(&mut config, &mut sources, lookup).unwrap();

        assert_eq!(config.command.port, 7777);
        assert_eq!(config.remote.host, "192.168.1.20");
        assert_eq!(config.receive.port, 12001);
        assert_eq!(config.correlation.timeout_secs, 2.5);
        assert_eq!(config.correlation.waiter_policy, WaiterPolicy::Replace);
        assert_eq!(sources.env_overrides.len(), 5);
    }

    #[test]
    fn test_rust_log_beats_own_level() {
        let mut config = BridgeConfig::default();
        let mut sources = ConfigSources::default();
        let lookup = lookup_from(&[
            ("SWITCHBOARD_LOG_LEVEL", "warn"),
            ("RUST_LOG", "switchboard=trace"),
        ]);

        apply_overrides_from(&mut config, &mut sources, lookup).unwrap();
        assert_eq!(config.telemetry.log_level, "switchboard=trace");
    }

    #[test]
    fn test_bad_env_port() {
        let mut config = BridgeConfig::default();
        let mut sources = ConfigSources::default();
        let lookup = lookup_from(&[("OSC_ABLETON_PORT", "eleven-thousand")]);

        let err = apply_overrides_from(&mut config, &mut sources, lookup).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "OSC_ABLETON_PORT"));
    }
}
