//! TOML settings for the client daemon. The path can be overridden with
//! `HEAPTRACE_CONFIG`; a missing or unparsable file is never fatal at
//! boot, it just falls back to defaults with a warning.

use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/heaptrace/heaptraced.toml";
const ENV_CONFIG_PATH: &str = "HEAPTRACE_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Loads configuration from the file named by `HEAPTRACE_CONFIG`, or
    /// the conventional path if unset. Falls back to built-in defaults,
    /// with a warning, if the file is missing or fails to parse.
    pub fn load() -> Self {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&PathBuf::from(path))
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("config: {} failed to parse ({e}), using defaults", path.display());
                Config::default()
            }),
            Err(e) => {
                log::warn!("config: {} could not be read ({e}), using defaults", path.display());
                Config::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { server_addr: default_server_addr() }
    }
}

fn default_server_addr() -> String {
    "127.0.0.1:7777".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path(), cache_size_kib: default_cache_size_kib() }
    }
}

fn default_db_path() -> String {
    "/var/lib/heaptrace/capture.sqlite".to_string()
}

fn default_cache_size_kib() -> i64 {
    65_536
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_parses_to_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.transport.server_addr, "127.0.0.1:7777");
        assert_eq!(cfg.store.cache_size_kib, 65_536);
    }

    #[test]
    fn overrides_apply_per_field() {
        let toml = r#"
            [transport]
            server_addr = "10.0.0.5:9000"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.transport.server_addr, "10.0.0.5:9000");
        assert_eq!(cfg.store.db_path, "/var/lib/heaptrace/capture.sqlite");
    }

    #[test]
    fn missing_file_falls_back_to_defaults_without_failing() {
        let cfg = Config::load_from(std::path::Path::new("/nonexistent/heaptraced.toml"));
        assert_eq!(cfg.transport.server_addr, "127.0.0.1:7777");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not = [valid toml").unwrap();
        let cfg = Config::load_from(file.path());
        assert_eq!(cfg.transport.server_addr, "127.0.0.1:7777");
    }
}
