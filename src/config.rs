//! Configuration model for the reader binaries.
//!
//! Loaded from a JSON file in the working directory (`config.json` by
//! default). Every key except the multicast endpoint has a sensible
//! default so a minimal file only names the group to join.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub multicast: MulticastConfig,
    /// Receive buffer length in bytes (BSE recommends 2000).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Receive-call bound in seconds; the run loop observes shutdown
    /// between attempts.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Contract-master source (token → contract details JSON).
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_output_json")]
    pub output_json: PathBuf,
    #[serde(default = "default_output_csv")]
    pub output_csv: PathBuf,
    #[serde(default)]
    pub logging_level: LogLevel,
    /// Accept the 300-byte legacy datagram format in addition to the
    /// canonical 564-byte one.
    #[serde(default)]
    pub accept_legacy: bool,
    /// Raw datagrams to spool for offline replay; 0 disables capture.
    #[serde(default = "default_store_limit")]
    pub store_limit: usize,
    #[serde(default = "default_raw_packets_dir")]
    pub raw_packets_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MulticastConfig {
    /// Multicast group address, e.g. 226.1.0.1 (simulation) or
    /// 227.0.0.21 (production equity NFCAST).
    pub ip: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}

fn default_buffer_size() -> usize {
    2000
}

fn default_timeout() -> u64 {
    1
}

fn default_token_file() -> PathBuf {
    PathBuf::from("data/tokens/token_details.json")
}

fn default_output_json() -> PathBuf {
    PathBuf::from("data/processed_json")
}

fn default_output_csv() -> PathBuf {
    PathBuf::from("data/processed_csv")
}

fn default_store_limit() -> usize {
    100
}

fn default_raw_packets_dir() -> PathBuf {
    PathBuf::from("data/raw_packets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"multicast": {"ip": "226.1.0.1", "port": 11401}}"#).unwrap();
        assert_eq!(cfg.multicast.ip, Ipv4Addr::new(226, 1, 0, 1));
        assert_eq!(cfg.multicast.port, 11401);
        assert_eq!(cfg.buffer_size, 2000);
        assert_eq!(cfg.timeout, 1);
        assert_eq!(cfg.logging_level, LogLevel::Info);
        assert!(!cfg.accept_legacy);
        assert_eq!(cfg.store_limit, 100);
    }

    #[test]
    fn full_config_round_trips() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "multicast": {"ip": "239.1.2.5", "port": 26002},
                "buffer_size": 4096,
                "timeout": 2,
                "token_file": "tokens.json",
                "output_json": "out/json",
                "output_csv": "out/csv",
                "logging_level": "debug",
                "accept_legacy": true,
                "store_limit": 0
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.buffer_size, 4096);
        assert_eq!(cfg.logging_level, LogLevel::Debug);
        assert!(cfg.accept_legacy);
        assert_eq!(cfg.store_limit, 0);
        assert_eq!(cfg.token_file, PathBuf::from("tokens.json"));
    }

    #[test]
    fn bad_level_is_rejected() {
        let err = serde_json::from_str::<Config>(
            r#"{"multicast": {"ip": "226.1.0.1", "port": 1}, "logging_level": "loud"}"#,
        );
        assert!(err.is_err());
    }
}
