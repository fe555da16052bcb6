//! Configuration data structures for toolgate.
//!
//! Everything has a default so an empty file (or no file at all) yields a
//! runnable gateway. Durations are humantime strings (`"5s"`, `"5m"`) and are
//! parsed on access; [`ServerConfigValidator`](super::ServerConfigValidator)
//! reports unparsable values up front.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    config::validation::{ValidationError, ValidationResult},
    core::policy::PolicyRule,
};

/// Log output format.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP listeners bind to
    pub host: String,
    /// Gateway (`POST /rpc`) port
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub cache_max_size: usize,
    pub cache_ttl: String,
    pub cache_sweep_interval: String,
    pub request_timeout: String,
    pub shutdown_timeout: String,
    pub health_enabled: bool,
    /// Serve `/healthz` on its own port; `None` shares the gateway port
    pub health_port: Option<u16>,
    pub health_check_timeout: String,
    pub health_check_interval: String,
    pub metrics_enabled: bool,
    /// Serve `/metrics` on its own port; `None` shares the gateway port
    pub metrics_port: Option<u16>,
    /// Paths of `ext` server scripts or descriptors
    pub ext_servers: Vec<String>,
    /// Paths of `app` server scripts or descriptors
    pub app_servers: Vec<String>,
    /// Policy rules added on top of the defaults
    pub policies: Vec<PolicyRule>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            cache_max_size: 1000,
            cache_ttl: "5m".to_string(),
            cache_sweep_interval: "60s".to_string(),
            request_timeout: "5s".to_string(),
            shutdown_timeout: "5s".to_string(),
            health_enabled: true,
            health_port: None,
            health_check_timeout: "2s".to_string(),
            health_check_interval: "30s".to_string(),
            metrics_enabled: true,
            metrics_port: None,
            ext_servers: Vec::new(),
            app_servers: Vec::new(),
            policies: Vec::new(),
        }
    }
}

/// Parse a humantime duration, naming the offending field on failure.
pub(crate) fn parse_duration(field: &str, value: &str) -> ValidationResult<Duration> {
    humantime::parse_duration(value).map_err(|e| ValidationError::InvalidField {
        field: field.to_string(),
        message: format!("'{value}' is not a valid duration: {e}"),
    })
}

impl GatewayConfig {
    pub fn cache_ttl_duration(&self) -> ValidationResult<Duration> {
        parse_duration("cache_ttl", &self.cache_ttl)
    }

    pub fn cache_sweep_interval_duration(&self) -> ValidationResult<Duration> {
        parse_duration("cache_sweep_interval", &self.cache_sweep_interval)
    }

    pub fn request_timeout_duration(&self) -> ValidationResult<Duration> {
        parse_duration("request_timeout", &self.request_timeout)
    }

    pub fn shutdown_timeout_duration(&self) -> ValidationResult<Duration> {
        parse_duration("shutdown_timeout", &self.shutdown_timeout)
    }

    pub fn health_check_timeout_duration(&self) -> ValidationResult<Duration> {
        parse_duration("health_check_timeout", &self.health_check_timeout)
    }

    pub fn health_check_interval_duration(&self) -> ValidationResult<Duration> {
        parse_duration("health_check_interval", &self.health_check_interval)
    }

    /// Port `/healthz` is served on.
    pub fn effective_health_port(&self) -> u16 {
        self.health_port.unwrap_or(self.port)
    }

    /// Port `/metrics` is served on.
    pub fn effective_metrics_port(&self) -> u16 {
        self.metrics_port.unwrap_or(self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_max_size, 1000);
        assert_eq!(config.cache_ttl_duration().unwrap(), Duration::from_secs(300));
        assert_eq!(config.request_timeout_duration().unwrap(), Duration::from_secs(5));
        assert_eq!(config.effective_health_port(), 3000);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "port": 4100,
            "metrics_port": 9100,
            "log_format": "pretty"
        }))
        .unwrap();
        assert_eq!(config.port, 4100);
        assert_eq!(config.effective_metrics_port(), 9100);
        assert_eq!(config.effective_health_port(), 4100);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.shutdown_timeout, "5s");
    }

    #[test]
    fn test_bad_duration_names_field() {
        let config = GatewayConfig {
            cache_ttl: "soon".to_string(),
            ..Default::default()
        };
        let err = config.cache_ttl_duration().unwrap_err();
        assert!(err.to_string().contains("cache_ttl"));
    }
}
