//! Configuration validation
//!
//! Checks the loaded configuration for problems before the gate starts
//! answering ask requests. Errors are fatal; warnings are advisory.

use std::net::SocketAddr;

use crate::error::ConfigError;
use crate::Config;

/// A non-fatal validation finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Aggregated validation outcome
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ConfigError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate the full configuration
pub fn validate_config(config: &Config) -> Result<ValidationResult, ConfigError> {
    let mut result = ValidationResult::new();

    if config.listener.address.parse::<SocketAddr>().is_err() {
        result.add_error(ConfigError::InvalidValue {
            field: "listener.address".to_string(),
            reason: format!("'{}' is not a socket address", config.listener.address),
        });
    }

    if config.listener.ask_timeout_ms == 0 {
        result.add_error(ConfigError::InvalidValue {
            field: "listener.ask-timeout-ms".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if config.listener.ask_timeout_ms > 5_000 {
        result.add_warning(ValidationWarning::new(format!(
            "ask-timeout-ms {} will stall TLS handshakes; values under 1000 are recommended",
            config.listener.ask_timeout_ms
        )));
    }

    if config.rate_limit.window_secs == 0 {
        result.add_error(ConfigError::InvalidValue {
            field: "rate-limit.window-secs".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if config.rate_limit.per_client == 0 {
        result.add_error(ConfigError::InvalidValue {
            field: "rate-limit.per-client".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if config.rate_limit.global < config.rate_limit.per_client {
        result.add_warning(ValidationWarning::new(format!(
            "global threshold {} is below per-client threshold {}; the global cap will bind first",
            config.rate_limit.global, config.rate_limit.per_client
        )));
    }
    if config.rate_limit.max_tracked_clients == 0 {
        result.add_error(ConfigError::InvalidValue {
            field: "rate-limit.max-tracked-clients".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    if config.policy.entries.is_empty() && config.policy.file.is_none() {
        result.add_warning(ValidationWarning::new(
            "no policy entries configured; every hostname will be denied",
        ));
    }

    for entry in &config.policy.entries {
        if let Err(e) = validate_pattern(&entry.pattern) {
            result.add_error(e);
        }
    }

    Ok(result)
}

/// Validate a single policy pattern
///
/// Patterns are exact hostnames or a single leading `*.` wildcard
/// followed by a hostname suffix of at least one label.
pub fn validate_pattern(pattern: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let suffix = pattern.strip_prefix("*.").unwrap_or(pattern);

    if suffix.is_empty() {
        return Err(invalid("empty pattern"));
    }
    if suffix.contains('*') {
        return Err(invalid("wildcard is only permitted as a leading '*.' prefix"));
    }
    if suffix.len() > 253 {
        return Err(invalid("exceeds 253 characters"));
    }

    for label in suffix.split('.') {
        if label.is_empty() {
            return Err(invalid("contains an empty label"));
        }
        if label.len() > 63 {
            return Err(invalid("label exceeds 63 characters"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(invalid("labels may only contain letters, digits, and hyphens"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels may not start or end with a hyphen"));
        }
    }

    Ok(())
}
