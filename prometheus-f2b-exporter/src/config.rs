//! Configuration for the Fail2ban exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Fail2ban control channel settings.
    #[serde(default)]
    pub fail2ban: Fail2banConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Staleness handling for the published snapshot.
    #[serde(default)]
    pub staleness: StalenessConfig,

    /// Startup behaviour.
    #[serde(default)]
    pub startup: StartupConfig,

    /// Jail filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How to reach Fail2ban and how often to poll it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fail2banConfig {
    /// Path or name of the `fail2ban-client` executable.
    #[serde(default = "default_client_path")]
    pub client_path: String,

    /// Control socket passed as `-s` (default: the client's own default).
    #[serde(default)]
    pub socket: Option<String>,

    /// Timeout for each query in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Interval between poll cycles in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_client_path() -> String {
    "fail2ban-client".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for Fail2banConfig {
    fn default() -> Self {
        Self {
            client_path: default_client_path(),
            socket: None,
            timeout_ms: default_timeout_ms(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Fail2banConfig {
    /// Per-query timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9191").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Default labels to add to all metrics.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,

    /// Metric name prefix (default: "fail2ban").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9191".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "fail2ban".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            default_labels: HashMap::new(),
            prefix: default_prefix(),
        }
    }
}

/// Snapshot staleness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessConfig {
    /// Age after which a snapshot is reported as down (seconds, 0 = never).
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

fn default_max_age() -> u64 {
    300 // 5 minutes
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age(),
        }
    }
}

impl StalenessConfig {
    /// The staleness cutoff, if one is configured.
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs))
    }
}

/// Startup validation behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Exit at startup if Fail2ban cannot be reached, instead of serving `up 0`.
    #[serde(default)]
    pub fail_fast: bool,
}

/// Jail filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Glob patterns for jails to include (empty = all).
    #[serde(default)]
    pub include_jails: Vec<String>,

    /// Glob patterns for jails to exclude.
    #[serde(default)]
    pub exclude_jails: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Paths served by the exporter itself, unavailable as the metrics path.
pub const RESERVED_PATHS: [&str; 3] = ["/health", "/ready", "/status"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ExporterConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fail2ban.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }

        if self.fail2ban.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if self.fail2ban.client_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "client_path must not be empty".to_string(),
            ));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if RESERVED_PATHS.contains(&self.prometheus.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved",
                self.prometheus.path
            )));
        }

        if !is_valid_prefix(&self.prometheus.prefix) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.prometheus.prefix
            )));
        }

        for pattern in self
            .filters
            .include_jails
            .iter()
            .chain(&self.filters.exclude_jails)
        {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::Validation(format!(
                    "Invalid jail pattern '{}': {}",
                    pattern, e
                )));
            }
        }

        Ok(())
    }
}

/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn is_valid_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.prometheus.listen, "0.0.0.0:9191");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.prefix, "fail2ban");
        assert_eq!(config.fail2ban.client_path, "fail2ban-client");
        assert_eq!(config.fail2ban.socket, None);
        assert_eq!(config.fail2ban.timeout(), Duration::from_secs(5));
        assert_eq!(config.fail2ban.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.staleness.max_age(), Some(Duration::from_secs(300)));
        assert!(!config.startup.fail_fast);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            fail2ban: {
                client_path: "/usr/bin/fail2ban-client",
                socket: "/run/fail2ban/fail2ban.sock",
                timeout_ms: 2000,
                poll_interval_secs: 15
            },
            prometheus: {
                listen: "127.0.0.1:9192",
                path: "/f2b/metrics",
                prefix: "f2b",
                default_labels: {
                    host: "edge-01"
                }
            },
            staleness: { max_age_secs: 120 },
            startup: { fail_fast: true },
            filters: {
                include_jails: ["sshd*", "nginx-*"],
                exclude_jails: ["nginx-test"]
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.fail2ban.client_path, "/usr/bin/fail2ban-client");
        assert_eq!(
            config.fail2ban.socket.as_deref(),
            Some("/run/fail2ban/fail2ban.sock")
        );
        assert_eq!(config.fail2ban.timeout_ms, 2000);
        assert_eq!(config.fail2ban.poll_interval_secs, 15);
        assert_eq!(config.prometheus.listen, "127.0.0.1:9192");
        assert_eq!(config.prometheus.path, "/f2b/metrics");
        assert_eq!(config.prometheus.prefix, "f2b");
        assert_eq!(
            config.prometheus.default_labels.get("host"),
            Some(&"edge-01".to_string())
        );
        assert_eq!(config.staleness.max_age_secs, 120);
        assert!(config.startup.fail_fast);
        assert_eq!(config.filters.include_jails, vec!["sshd*", "nginx-*"]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_staleness_disabled() {
        let config = ExporterConfig::parse("{ staleness: { max_age_secs: 0 } }").unwrap();
        assert_eq!(config.staleness.max_age(), None);
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = ExporterConfig::parse(r#"{ prometheus: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let result = ExporterConfig::parse(r#"{ prometheus: { path: "metrics" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_zero_interval() {
        let result = ExporterConfig::parse("{ fail2ban: { poll_interval_secs: 0 } }");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let result = ExporterConfig::parse("{ fail2ban: { timeout_ms: 0 } }");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_reserved_path() {
        for path in RESERVED_PATHS {
            let input = format!("{{ prometheus: {{ path: \"{}\" }} }}", path);
            let result = ExporterConfig::parse(&input);
            assert!(
                matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("reserved")),
                "{} accepted",
                path
            );
        }
    }

    #[test]
    fn test_validate_invalid_prefix() {
        let result = ExporterConfig::parse(r#"{ prometheus: { prefix: "9lives" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid metric prefix")
        );
    }

    #[test]
    fn test_validate_invalid_glob() {
        let result = ExporterConfig::parse(r#"{ filters: { include_jails: ["[sshd"] } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid jail pattern")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.json5");
        std::fs::write(&path, "{ fail2ban: { poll_interval_secs: 10 } }").unwrap();

        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.fail2ban.poll_interval_secs, 10);
    }

    #[test]
    fn test_example_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/exporter.json5");
        let config = ExporterConfig::load_from_file(path).unwrap();
        assert_eq!(config.prometheus.listen, "0.0.0.0:9191");
        assert!(config.filters.include_jails.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let result = ExporterConfig::load_from_file("/nonexistent/exporter.json5");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
