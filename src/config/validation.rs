use std::{collections::HashSet, path::Path};

use tracing_subscriber::EnvFilter;

use crate::config::models::{GatewayConfig, parse_duration};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid server path '{path}': {reason}")]
    InvalidServerPath { path: String, reason: String },

    #[error("Invalid policy '{pattern}': {message}")]
    InvalidPolicy { pattern: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire configuration, reporting every problem at once
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        errors.extend(Self::validate_ports(config));

        if config.host.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "host".to_string(),
            });
        }

        if EnvFilter::try_new(&config.log_level).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "log_level".to_string(),
                message: format!("'{}' is not a valid log filter", config.log_level),
            });
        }

        if config.cache_max_size == 0 {
            errors.push(ValidationError::InvalidField {
                field: "cache_max_size".to_string(),
                message: "Cache size must be greater than 0".to_string(),
            });
        }

        errors.extend(Self::validate_durations(config));
        errors.extend(Self::validate_server_paths(config));
        errors.extend(Self::validate_policies(config));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_ports(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let ports = [
            ("port", Some(config.port)),
            ("health_port", config.health_port),
            ("metrics_port", config.metrics_port),
        ];
        for (field, port) in ports {
            if port == Some(0) {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "Port must be between 1 and 65535".to_string(),
                });
            }
        }
        errors
    }

    fn validate_durations(config: &GatewayConfig) -> Vec<ValidationError> {
        let durations = [
            ("cache_ttl", &config.cache_ttl),
            ("cache_sweep_interval", &config.cache_sweep_interval),
            ("request_timeout", &config.request_timeout),
            ("shutdown_timeout", &config.shutdown_timeout),
            ("health_check_timeout", &config.health_check_timeout),
            ("health_check_interval", &config.health_check_interval),
        ];

        let mut errors = Vec::new();
        for (field, value) in durations {
            match parse_duration(field, value) {
                Ok(duration) if duration.is_zero() => errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "Duration must be greater than 0".to_string(),
                }),
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }
        errors
    }

    fn validate_server_paths(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for path in config.app_servers.iter().chain(config.ext_servers.iter()) {
            if path.trim().is_empty() {
                errors.push(ValidationError::InvalidServerPath {
                    path: path.clone(),
                    reason: "Path must not be empty".to_string(),
                });
                continue;
            }
            if !Path::new(path).exists() {
                errors.push(ValidationError::InvalidServerPath {
                    path: path.clone(),
                    reason: "File does not exist".to_string(),
                });
            }
            if !seen.insert(path.as_str()) {
                errors.push(ValidationError::InvalidServerPath {
                    path: path.clone(),
                    reason: "Listed more than once".to_string(),
                });
            }
        }
        errors
    }

    fn validate_policies(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for rule in &config.policies {
            if rule.tool_pattern.is_empty() {
                errors.push(ValidationError::InvalidPolicy {
                    pattern: rule.tool_pattern.clone(),
                    message: "Pattern must not be empty".to_string(),
                });
            } else if rule.tool_pattern.trim_end_matches('*').contains('*') {
                errors.push(ValidationError::InvalidPolicy {
                    pattern: rule.tool_pattern.clone(),
                    message: "'*' is only supported at the end of a pattern".to_string(),
                });
            }
        }
        errors
    }

    /// Format multiple validation errors into a readable message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{NamespaceSelector, PolicyAction, PolicyRule};

    #[test]
    fn validate_accepts_defaults() {
        assert!(ServerConfigValidator::validate(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn validate_rejects_zero_port() {
        let config = GatewayConfig {
            port: 0,
            ..Default::default()
        };
        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_reports_every_error() {
        let config = GatewayConfig {
            cache_ttl: "never".to_string(),
            request_timeout: "0s".to_string(),
            cache_max_size: 0,
            ext_servers: vec!["/definitely/missing/server.py".to_string()],
            ..Default::default()
        };

        let Err(ValidationError::ValidationFailed { message }) =
            ServerConfigValidator::validate(&config)
        else {
            panic!("expected validation failure");
        };
        assert!(message.starts_with("Found 4 validation errors"));
        assert!(message.contains("cache_ttl"));
        assert!(message.contains("request_timeout"));
        assert!(message.contains("/definitely/missing/server.py"));
    }

    #[test]
    fn validate_rejects_duplicate_server_paths() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tool.py");
        std::fs::write(&script, "print('hi')").unwrap();
        let script = script.to_string_lossy().to_string();

        let config = GatewayConfig {
            app_servers: vec![script.clone()],
            ext_servers: vec![script],
            ..Default::default()
        };
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("Listed more than once"));
    }

    #[test]
    fn validate_rejects_inner_wildcard_policy() {
        let config = GatewayConfig {
            policies: vec![PolicyRule::new(
                NamespaceSelector::Ext,
                "a*b",
                PolicyAction::Deny,
                10,
            )],
            ..Default::default()
        };
        assert!(ServerConfigValidator::validate(&config).is_err());
    }
}
