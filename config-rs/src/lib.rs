//! config-rs/lib.rs
//! Environment-driven configuration for the analytics gateway
//! Loads `.env` (if present) and reads the handful of variables the gateway honours

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 5000;
/// Default desktop-surface shared secret, for local development only
pub const DEFAULT_API_KEY: &str = "dev-key";
pub const DEFAULT_SECRET_KEY: &str = "analytics-gateway-secret";
pub const DEFAULT_CAPABILITY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_METRICS_WINDOW: usize = 1000;
pub const DEFAULT_ERROR_LOG_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Runtime configuration for the gateway process
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Shared secret for the desktop surface. `None` rejects every desktop call.
    pub api_key: Option<String>,
    /// Process secret for cookie/session signing
    pub secret_key: String,
    pub host: IpAddr,
    pub port: u16,
    /// Per-invocation deadline; `None` waits forever
    pub capability_timeout: Option<Duration>,
    pub metrics_window: usize,
    pub error_log_capacity: usize,
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: Some(DEFAULT_API_KEY.to_string()),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            capability_timeout: Some(Duration::from_secs(DEFAULT_CAPABILITY_TIMEOUT_SECS)),
            metrics_window: DEFAULT_METRICS_WINDOW,
            error_log_capacity: DEFAULT_ERROR_LOG_CAPACITY,
            log_format: LogFormat::Text,
        }
    }
}

impl GatewayConfig {
    /// Load `.env` and read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_source(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    ///
    /// # Arguments
    /// * `lookup` - Returns the raw value for a variable name, if set
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_key = match lookup("PBI_DESKTOP_API_KEY") {
            Some(key) if key.trim().is_empty() => {
                log::warn!("PBI_DESKTOP_API_KEY is empty, desktop endpoints will reject every call");
                None
            }
            Some(key) => Some(key),
            None => defaults.api_key,
        };

        let secret_key = lookup("SECRET_KEY").unwrap_or(defaults.secret_key);

        let host = match lookup("HOST") {
            Some(raw) => raw
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidAddress(raw.clone()))?,
            None => defaults.host,
        };

        let port = parse_or_default(&lookup, "PORT", DEFAULT_PORT);

        let timeout_secs = parse_or_default(&lookup, "CAPABILITY_TIMEOUT_SECS", DEFAULT_CAPABILITY_TIMEOUT_SECS);
        let capability_timeout = if timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(timeout_secs))
        };

        let metrics_window = positive_or_default(
            parse_or_default(&lookup, "METRICS_WINDOW", DEFAULT_METRICS_WINDOW),
            "METRICS_WINDOW",
            DEFAULT_METRICS_WINDOW,
        );
        let error_log_capacity = positive_or_default(
            parse_or_default(&lookup, "ERROR_LOG_CAPACITY", DEFAULT_ERROR_LOG_CAPACITY),
            "ERROR_LOG_CAPACITY",
            DEFAULT_ERROR_LOG_CAPACITY,
        );

        let log_format = match lookup("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            api_key,
            secret_key,
            host,
            port,
            capability_timeout,
            metrics_window,
            error_log_capacity,
            log_format,
        })
    }

    /// Socket address the HTTP server binds to
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or_default<F, T>(lookup: &F, var_name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match lookup(var_name) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("Invalid value in {}, using default {}", var_name, default);
            default
        }),
        None => default,
    }
}

fn positive_or_default(value: usize, var_name: &str, default: usize) -> usize {
    if value == 0 {
        log::warn!("{} must be positive, using default {}", var_name, default);
        default
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> GatewayConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_source(|name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.api_key.as_deref(), Some(DEFAULT_API_KEY));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.capability_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.metrics_window, 1000);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.bind_address().to_string(), "0.0.0.0:5000");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PBI_DESKTOP_API_KEY", "s3cret"),
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("CAPABILITY_TIMEOUT_SECS", "0"),
            ("LOG_FORMAT", "JSON"),
        ]);
        assert_eq!(config.api_key.as_deref(), Some("s3cret"));
        assert_eq!(config.bind_address().to_string(), "127.0.0.1:8080");
        assert_eq!(config.capability_timeout, None);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = config_from(&[("PORT", "eighty"), ("METRICS_WINDOW", "0")]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.metrics_window, DEFAULT_METRICS_WINDOW);
    }

    #[test]
    fn test_empty_api_key_disables_desktop_surface() {
        let config = config_from(&[("PBI_DESKTOP_API_KEY", "  ")]);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_invalid_host_is_an_error() {
        let result = GatewayConfig::from_source(|name| {
            (name == "HOST").then(|| "not-an-ip".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidAddress(_))));
    }
}
