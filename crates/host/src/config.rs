//! Host configuration loaded from environment variables.

use event_bus::DEFAULT_HISTORY_LIMIT;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Host configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for structured output, anything else for human-readable
/// - `EVENT_HISTORY_LIMIT`: events kept by the local bus (default: `1000`)
/// - `BRIDGE_ENABLED`: whether to start the broker bridge (default: `true`)
/// - `KAFKA_ENSURE_TOPICS`: create missing topics on startup (default: `false`)
///
/// Bridge settings themselves come from [`bridge::BridgeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_history_limit: usize,
    pub bridge_enabled: bool,
    pub ensure_topics: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            event_history_limit: lookup("EVENT_HISTORY_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.event_history_limit),
            bridge_enabled: lookup("BRIDGE_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.bridge_enabled),
            ensure_topics: lookup("KAFKA_ENSURE_TOPICS")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.ensure_topics),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            event_history_limit: DEFAULT_HISTORY_LIMIT,
            bridge_enabled: true,
            ensure_topics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.event_history_limit, DEFAULT_HISTORY_LIMIT);
        assert!(config.bridge_enabled);
        assert!(!config.ensure_topics);
    }

    #[test]
    fn test_reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("RUST_LOG", "debug,bridge=trace"),
            ("LOG_FORMAT", "JSON"),
            ("EVENT_HISTORY_LIMIT", "50"),
            ("BRIDGE_ENABLED", "false"),
            ("KAFKA_ENSURE_TOPICS", "1"),
        ]));
        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "debug,bridge=trace");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.event_history_limit, 50);
        assert!(!config.bridge_enabled);
        assert!(config.ensure_topics);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "not-a-port"),
            ("EVENT_HISTORY_LIMIT", "-3"),
        ]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.event_history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn test_addr_default() {
        assert_eq!(Config::default().addr(), "0.0.0.0:3000");
    }
}
