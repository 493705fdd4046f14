//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::CommissionPolicy;
use saga::{ExecutionMode, HttpGatewayConfig, RetryPolicy, SagaConfig};
use thiserror::Error;

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store when unset
/// - `HYBRID_PAYMENT_PERCENTAGE`: platform commission rate (default `0.1`)
/// - `GATEWAY_BASE_URL`, `GATEWAY_KEY_ID`, `GATEWAY_KEY_SECRET`,
///   `GATEWAY_SOURCE_ACCOUNT`, `GATEWAY_TIMEOUT_SECS`: payment gateway client;
///   in-memory gateway unless key id, secret and source account are all set
/// - `TX_MAX_RETRIES`, `TX_BASE_DELAY_MS`, `TX_MAX_DELAY_MS`,
///   `TX_MAX_DURATION_MS`: transaction retry and timeout settings
/// - `SAGA_MODE`: `auto` or `manual`
/// - `PERSIST_COMPENSATION_LOGS`: write compensation logs (default `true`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub commission_rate: f64,
    pub gateway_base_url: Option<String>,
    pub gateway_key_id: Option<String>,
    pub gateway_key_secret: Option<String>,
    pub gateway_source_account: Option<String>,
    pub gateway_timeout: Duration,
    pub tx_max_retries: usize,
    pub tx_base_delay: Duration,
    pub tx_max_delay: Duration,
    pub tx_max_duration: Duration,
    pub saga_mode: ExecutionMode,
    pub persist_compensation_logs: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from any key-value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let log_format = match var("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            None => defaults.log_format,
            Some(f) if f == "text" => LogFormat::Text,
            Some(f) if f == "json" => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected text or json, got '{other}'"),
                });
            }
        };

        let saga_mode = match var("SAGA_MODE") {
            Some(mode) => mode.parse::<ExecutionMode>().map_err(|reason| ConfigError::Invalid {
                name: "SAGA_MODE",
                reason,
            })?,
            None => defaults.saga_mode,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed(&var, "PORT")?.unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: var("DATABASE_URL"),
            commission_rate: parsed(&var, "HYBRID_PAYMENT_PERCENTAGE")?
                .unwrap_or(defaults.commission_rate),
            gateway_base_url: var("GATEWAY_BASE_URL"),
            gateway_key_id: var("GATEWAY_KEY_ID"),
            gateway_key_secret: var("GATEWAY_KEY_SECRET"),
            gateway_source_account: var("GATEWAY_SOURCE_ACCOUNT"),
            gateway_timeout: parsed(&var, "GATEWAY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.gateway_timeout),
            tx_max_retries: parsed(&var, "TX_MAX_RETRIES")?.unwrap_or(defaults.tx_max_retries),
            tx_base_delay: parsed(&var, "TX_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.tx_base_delay),
            tx_max_delay: parsed(&var, "TX_MAX_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.tx_max_delay),
            tx_max_duration: parsed(&var, "TX_MAX_DURATION_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.tx_max_duration),
            saga_mode,
            persist_compensation_logs: parsed(&var, "PERSIST_COMPENSATION_LOGS")?
                .unwrap_or(defaults.persist_compensation_logs),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings handed to the saga engine.
    pub fn saga_config(&self) -> Result<SagaConfig, ConfigError> {
        let commission =
            CommissionPolicy::from_rate(self.commission_rate).map_err(|e| ConfigError::Invalid {
                name: "HYBRID_PAYMENT_PERCENTAGE",
                reason: e.to_string(),
            })?;

        let mut config = SagaConfig::new();
        config.commission = commission;
        config.retry = RetryPolicy {
            max_retries: self.tx_max_retries,
            base_delay: self.tx_base_delay,
            max_delay: self.tx_max_delay,
        };
        config.transaction.max_duration = self.tx_max_duration;
        config.mode = self.saga_mode;
        config.persist_logs = self.persist_compensation_logs;
        Ok(config)
    }

    /// Payment gateway client settings, when credentials are configured.
    pub fn gateway_config(&self) -> Option<HttpGatewayConfig> {
        let (Some(key_id), Some(key_secret), Some(account)) = (
            &self.gateway_key_id,
            &self.gateway_key_secret,
            &self.gateway_source_account,
        ) else {
            return None;
        };

        let mut config = HttpGatewayConfig::new(key_id, key_secret, account);
        if let Some(base_url) = &self.gateway_base_url {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        config.timeout = self.gateway_timeout;
        Some(config)
    }
}

fn parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            })
        })
        .transpose()
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            commission_rate: 0.1,
            gateway_base_url: None,
            gateway_key_id: None,
            gateway_key_secret: None,
            gateway_source_account: None,
            gateway_timeout: Duration::from_secs(30),
            tx_max_retries: retry.max_retries,
            tx_base_delay: retry.base_delay,
            tx_max_delay: retry.max_delay,
            tx_max_duration: Duration::from_secs(30),
            saga_mode: ExecutionMode::Auto,
            persist_compensation_logs: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.tx_max_retries, 3);
        assert_eq!(config.tx_base_delay, Duration::from_millis(100));
        assert_eq!(config.tx_max_delay, Duration::from_secs(2));
        assert!(config.persist_compensation_logs);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_addr_default() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = from_pairs(&[("PORT", "  ")]).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.saga_mode, ExecutionMode::Auto);
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_pairs(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/rides"),
            ("HYBRID_PAYMENT_PERCENTAGE", "0.15"),
            ("TX_MAX_RETRIES", "5"),
            ("TX_BASE_DELAY_MS", "10"),
            ("SAGA_MODE", "manual"),
            ("PERSIST_COMPENSATION_LOGS", "false"),
        ])
        .unwrap();

        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/rides"));

        let saga = config.saga_config().unwrap();
        assert_eq!(saga.commission.rate_bps, 1500);
        assert_eq!(saga.retry.max_retries, 5);
        assert_eq!(saga.retry.base_delay, Duration::from_millis(10));
        assert_eq!(saga.mode, ExecutionMode::Manual);
        assert!(!saga.persist_logs);
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(from_pairs(&[("PORT", "eighty")]).is_err());
        assert!(from_pairs(&[("LOG_FORMAT", "xml")]).is_err());
        assert!(from_pairs(&[("SAGA_MODE", "sometimes")]).is_err());

        let config = from_pairs(&[("HYBRID_PAYMENT_PERCENTAGE", "1.5")]).unwrap();
        assert!(config.saga_config().is_err());
    }

    #[test]
    fn test_gateway_needs_full_credentials() {
        let partial = from_pairs(&[("GATEWAY_KEY_ID", "rzp_test")]).unwrap();
        assert!(partial.gateway_config().is_none());

        let full = from_pairs(&[
            ("GATEWAY_KEY_ID", "rzp_test"),
            ("GATEWAY_KEY_SECRET", "secret"),
            ("GATEWAY_SOURCE_ACCOUNT", "2323230000000000"),
            ("GATEWAY_BASE_URL", "http://localhost:9000/v1/"),
            ("GATEWAY_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        let gateway = full.gateway_config().unwrap();
        assert_eq!(gateway.base_url, "http://localhost:9000/v1");
        assert_eq!(gateway.timeout, Duration::from_secs(5));
        assert_eq!(gateway.key_id, "rzp_test");
    }
}
