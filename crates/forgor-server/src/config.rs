//! Server configuration: TOML file with defaults, overridable from the CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub db_path: PathBuf,
    pub rate_limit_per_second: f64,
    pub rate_limit_burst: u32,
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
    pub snapshot_keep: usize,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            db_path: PathBuf::from("forgor.db"),
            rate_limit_per_second: 10.0,
            rate_limit_burst: 50,
            max_body_bytes: 10 * 1024 * 1024,
            request_timeout_secs: 30,
            snapshot_keep: 3,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: ServerConfig = toml::from_str("listen_addr = \"0.0.0.0:9000\"").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.snapshot_keep, 3);
    }
}
