//! Configuration
//!
//! ## Responsibilities
//!
//! - Environment-driven daemon settings with sensible defaults
//! - Line-oriented `key = value` config file for site settings
//!
//! The config file carries deployment data like the reachability target
//! and network credentials for provisioning tools; the daemon only
//! consumes the keys it knows and ignores the rest.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Config file key naming the host the reachability monitor probes
pub const KEY_PING_HOST: &str = "ping_host";

/// Daemon settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen address for the web API and stream
    pub bind_addr: String,
    /// Optional site config file
    pub config_file: Option<String>,
    /// Reachability target; `None` disables the monitor
    pub ping_host: Option<String>,
    /// Exit (for a supervisor restart) when the target stops answering
    pub restart_on_unreachable: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("CAMSTREAMD_BIND")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            config_file: std::env::var("CAMSTREAMD_CONFIG").ok(),
            ping_host: std::env::var("CAMSTREAMD_PING_HOST").ok(),
            restart_on_unreachable: std::env::var("CAMSTREAMD_RESTART_ON_UNREACHABLE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
        }
    }
}

impl AppConfig {
    /// Environment settings, merged with the config file if one is set
    ///
    /// Environment variables win over file values.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = config.config_file.clone() {
            let text = std::fs::read_to_string(Path::new(&path)).map_err(|e| {
                Error::Config(format!("cannot read config file {}: {}", path, e))
            })?;
            let values = parse_config(&text)?;
            if config.ping_host.is_none() {
                config.ping_host = values.get(KEY_PING_HOST).cloned();
            }
            tracing::info!(file = %path, keys = values.len(), "Config file loaded");
        }
        Ok(config)
    }
}

/// Parse a line-oriented `key = value` file
///
/// Blank lines and `#` comments are skipped. Keys are `[A-Za-z_]` then
/// `[A-Za-z0-9_]`; values keep interior whitespace but lose leading and
/// trailing whitespace, and may be empty. A repeated key keeps its last
/// value.
pub fn parse_config(text: &str) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::Config(format!("parse error line {}: expected '='", idx + 1))
        })?;

        let key = key.trim();
        if !valid_key(key) {
            return Err(Error::Config(format!(
                "parse error line {}: invalid key {:?}",
                idx + 1,
                key
            )));
        }

        values.insert(key.to_string(), value.trim().to_string());
    }

    Ok(values)
}

fn valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
