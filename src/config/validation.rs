//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (port set, queue non-empty)
//! - Check the interface and log filter parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs after CLI overrides are applied, before anything binds

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::ServerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.port must be set to a value between 1 and 65535")]
    MissingPort,

    #[error("listener.interface '{0}' is not an IP address")]
    InvalidInterface(String),

    #[error("listener.intake_capacity must be greater than zero")]
    ZeroIntakeCapacity,

    #[error("observability.log_level '{0}' is not a valid filter")]
    InvalidLogLevel(String),
}

/// Check a configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::MissingPort);
    }

    if config.listener.socket_addr().is_err() {
        errors.push(ValidationError::InvalidInterface(
            config.listener.interface.clone(),
        ));
    }

    if config.listener.intake_capacity == 0 {
        errors.push(ValidationError::ZeroIntakeCapacity);
    }

    if EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.listener.port = 3737;
        config
    }

    #[test]
    fn accepts_valid_config() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn rejects_missing_port() {
        let errors = validate_config(&ServerConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingPort]);
    }

    #[test]
    fn reports_every_error() {
        let mut config = ServerConfig::default();
        config.listener.interface = "not-an-ip".to_string();
        config.listener.intake_capacity = 0;
        config.observability.log_level = "time_server=loud".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingPort,
                ValidationError::InvalidInterface("not-an-ip".to_string()),
                ValidationError::ZeroIntakeCapacity,
                ValidationError::InvalidLogLevel("time_server=loud".to_string()),
            ]
        );
    }
}
