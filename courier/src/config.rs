//! Start-up configuration: one RON file plus a handful of environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use courier_api::ApiConfig;
use courier_delivery::{DispatcherConfig, TransportKind};
use serde::Deserialize;

pub const CONFIG_ENV: &str = "COURIER_CONFIG";

const DEFAULT_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Parse `path`, or fall back to defaults when there is no file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid RON.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        ron::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Apply relay and sender overrides from the environment.
    ///
    /// `var` looks a variable up by name; values may be wrapped in single or
    /// double quotes, which are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if `SMTP_PORT` is not a port number.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let get = |name: &str| var(name).map(|v| strip_quotes(&v).to_string());
        let relay = &mut self.dispatcher.relay;

        if let Some(host) = get("SMTP_SERVER") {
            relay.host = host;
        }
        if let Some(port) = get("SMTP_PORT") {
            relay.port = port
                .parse()
                .with_context(|| format!("SMTP_PORT '{port}' is not a valid port"))?;
        }
        if let Some(username) = get("SMTP_USERNAME") {
            relay.username = username;
        }
        if let Some(password) = get("SMTP_PASSWORD") {
            relay.password = password;
        }
        if let Some(sender) = get("DEFAULT_SENDER") {
            self.dispatcher.default_sender = sender;
        }
        if get("TESTING").is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1") {
            self.dispatcher.transport = TransportKind::Noop;
        }

        Ok(())
    }
}

/// Remove one pair of matching surrounding quotes.
#[must_use]
pub fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(value)
}

/// Find the configuration file using the following precedence:
/// 1. an explicit path (the `--config` flag)
/// 2. `COURIER_CONFIG`
/// 3. `./courier.config.ron`
/// 4. `/etc/courier/courier.config.ron`
///
/// Returns `None` when nothing was asked for and no default file exists.
///
/// # Errors
///
/// Returns an error if an explicitly requested file does not exist.
pub fn locate(explicit: Option<PathBuf>, from_env: Option<PathBuf>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
        return Ok(Some(path));
    }

    if let Some(path) = from_env {
        anyhow::ensure!(
            path.exists(),
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
        return Ok(Some(path));
    }

    Ok(DEFAULT_PATHS.iter().map(PathBuf::from).find(|p| p.exists()))
}
