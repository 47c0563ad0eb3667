//! Worker configuration parsing.
//!
//! ```kdl
//! worker "build-01" {
//!     server "https://ci.example.org"
//!     server "https://ci-mirror.example.org"
//!     build-key "0123abcd"
//!     build-configs "linux-gnu" "linux-clang"
//!     poll-interval 30
//!     single-shot #false
//!     log-dir "/var/log/gantry"
//! }
//! ```

use crate::nodes::{all_string_args, first_int_arg, first_string_arg, required_bool, required_string};
use crate::{ConfigError, ConfigResult};
use kdl::KdlDocument;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_POLL_SECS: u64 = 30;

/// Settings of one worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    /// Servers to claim jobs from, in the order they are polled.
    pub servers: Vec<Url>,
    pub build_key: String,
    pub build_configs: Vec<String>,
    pub poll_interval: Duration,
    /// Run at most one claim-run cycle, then stop.
    pub single_shot: bool,
    pub log_file: Option<PathBuf>,
    /// Directory for `gantry_client_<name>.log` when no log file is given.
    pub log_dir: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, server: Url, build_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            servers: vec![server],
            build_key: build_key.into(),
            build_configs: Vec::new(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            single_shot: false,
            log_file: None,
            log_dir: None,
        }
    }

    /// The log file this worker writes to, if any.
    pub fn resolved_log_file(&self) -> Option<PathBuf> {
        if let Some(file) = &self.log_file {
            return Some(file.clone());
        }
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("gantry_client_{}.log", self.name)))
    }
}

/// Parse a worker configuration from KDL text.
pub fn parse_worker_config(kdl: &str) -> ConfigResult<WorkerConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let node = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "worker")
        .ok_or_else(|| ConfigError::MissingField("worker".to_string()))?;

    let name = first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("worker name".to_string()))?;

    let mut servers = Vec::new();
    let mut build_key = None;
    let mut build_configs = Vec::new();
    let mut poll_interval = Duration::from_secs(DEFAULT_POLL_SECS);
    let mut single_shot = false;
    let mut log_file = None;
    let mut log_dir = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "server" => {
                    let raw = required_string(child, "server")?;
                    let url = Url::parse(&raw)
                        .map_err(|e| ConfigError::invalid("server", format!("{}: {}", raw, e)))?;
                    servers.push(url);
                }
                "build-key" => build_key = Some(required_string(child, "build-key")?),
                "build-configs" => build_configs.extend(all_string_args(child)),
                "poll-interval" => {
                    let secs = first_int_arg(child)
                        .and_then(|v| u64::try_from(v).ok())
                        .ok_or_else(|| {
                            ConfigError::invalid("poll-interval", "expected seconds >= 0")
                        })?;
                    poll_interval = Duration::from_secs(secs);
                }
                "single-shot" => single_shot = required_bool(child, "single-shot")?,
                "log-file" => log_file = Some(PathBuf::from(required_string(child, "log-file")?)),
                "log-dir" => log_dir = Some(PathBuf::from(required_string(child, "log-dir")?)),
                _ => {}
            }
        }
    }

    if servers.is_empty() {
        return Err(ConfigError::MissingField("server".to_string()));
    }
    let build_key = build_key.ok_or_else(|| ConfigError::MissingField("build-key".to_string()))?;
    if build_configs.is_empty() {
        return Err(ConfigError::MissingField("build-configs".to_string()));
    }

    Ok(WorkerConfig {
        name,
        servers,
        build_key,
        build_configs,
        poll_interval,
        single_shot,
        log_file,
        log_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_config() {
        let kdl = r#"
            worker "build-01" {
                server "https://ci.example.org"
                server "https://ci-mirror.example.org"
                build-key "0123abcd"
                build-configs "linux-gnu" "linux-clang"
                poll-interval 5
                single-shot #true
                log-dir "/var/log/gantry"
            }
        "#;

        let config = parse_worker_config(kdl).unwrap();
        assert_eq!(config.name, "build-01");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[1].host_str(), Some("ci-mirror.example.org"));
        assert_eq!(config.build_key, "0123abcd");
        assert_eq!(config.build_configs, vec!["linux-gnu", "linux-clang"]);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert!(config.single_shot);
        assert_eq!(
            config.resolved_log_file(),
            Some(PathBuf::from("/var/log/gantry/gantry_client_build-01.log"))
        );
    }

    #[test]
    fn test_log_file_wins_over_log_dir() {
        let mut config = WorkerConfig::new(
            "w",
            Url::parse("http://localhost:3000").unwrap(),
            "key",
        );
        config.log_dir = Some(PathBuf::from("/tmp"));
        config.log_file = Some(PathBuf::from("/var/log/w.log"));
        assert_eq!(config.resolved_log_file(), Some(PathBuf::from("/var/log/w.log")));
    }

    #[test]
    fn test_missing_server() {
        let kdl = r#"
            worker "build-01" {
                build-key "0123abcd"
                build-configs "linux-gnu"
            }
        "#;
        assert!(matches!(
            parse_worker_config(kdl).unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }

    #[test]
    fn test_invalid_server_url() {
        let kdl = r#"
            worker "build-01" {
                server "not a url"
                build-key "0123abcd"
                build-configs "linux-gnu"
            }
        "#;
        assert!(matches!(
            parse_worker_config(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }
}
