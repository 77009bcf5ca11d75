//! TOML settings for the server process. The path can be overridden with
//! `HEAPTRACE_CONFIG`; a missing or unparsable file is never fatal at
//! boot, it just falls back to defaults with a warning.

use serde::Deserialize;
use std::path::PathBuf;

use crate::reachability::ReachabilityConfig;

const DEFAULT_CONFIG_PATH: &str = "/etc/heaptrace/heaptrace-server.toml";
const ENV_CONFIG_PATH: &str = "HEAPTRACE_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub reachability: ReachabilityConfig,
    #[serde(default)]
    pub stopwords: StopwordsConfig,
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
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { listen_addr: default_listen_addr() }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:7777".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StopwordsConfig {
    #[serde(default = "default_stopwords")]
    pub substrings: Vec<String>,
}

fn default_stopwords() -> Vec<String> {
    vec!["ProfilerOverlay".to_string(), "System.GC".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_parses_to_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.transport.listen_addr, "127.0.0.1:7777");
        assert_eq!(cfg.reachability.scan_step_bytes, std::mem::size_of::<u64>());
        assert!(cfg.stopwords.substrings.contains(&"System.GC".to_string()));
    }

    #[test]
    fn overrides_apply_per_field() {
        let toml = r#"
            [transport]
            listen_addr = "0.0.0.0:9000"

            [reachability]
            scan_step_bytes = 1

            [stopwords]
            substrings = ["App.Internal"]
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.transport.listen_addr, "0.0.0.0:9000");
        assert_eq!(cfg.reachability.scan_step_bytes, 1);
        assert_eq!(cfg.stopwords.substrings, vec!["App.Internal".to_string()]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults_without_failing() {
        let cfg = Config::load_from(std::path::Path::new("/nonexistent/heaptrace-server.toml"));
        assert_eq!(cfg.transport.listen_addr, "127.0.0.1:7777");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not = [valid toml").unwrap();
        let cfg = Config::load_from(file.path());
        assert_eq!(cfg.transport.listen_addr, "127.0.0.1:7777");
    }
}
