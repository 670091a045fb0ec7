//! Configuration validation.

use std::fmt;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_store(config, &mut result);
        Self::validate_retry(config, &mut result);
        Self::validate_dispatcher(config, &mut result);
        Self::validate_consumer(config, &mut result);
        Self::validate_handlers(config, &mut result);

        Ok(result)
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if config.store.path.as_os_str().is_empty() {
            result.add_error(ValidationError::new("store.path", "Store path cannot be empty"));
        }

        if config.store.busy_timeout_ms == 0 {
            result.add_warning(ValidationWarning::new(
                "store.busy_timeout_ms",
                "busy_timeout_ms is 0, every lock conflict will go straight to the retry policy",
            ));
        }

        if !config.store.wal {
            result.add_warning(ValidationWarning::new(
                "store.wal",
                "WAL is disabled, readers will block while a claim is in progress",
            ));
        }
    }

    fn validate_retry(config: &Config, result: &mut ValidationResult) {
        if config.retry.max_attempts == 0 {
            result.add_error(ValidationError::new(
                "retry.max_attempts",
                "max_attempts must be greater than 0",
            ));
        }
    }

    fn validate_dispatcher(config: &Config, result: &mut ValidationResult) {
        if config.dispatcher.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "dispatcher.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }

        if config.dispatcher.claimant.is_empty() {
            result.add_error(ValidationError::new(
                "dispatcher.claimant",
                "Claimant cannot be empty",
            ));
        }

        if config.dispatcher.max_deliveries == Some(0) {
            result.add_error(ValidationError::new(
                "dispatcher.max_deliveries",
                "max_deliveries must be greater than 0 when set",
            ));
        }
    }

    fn validate_consumer(config: &Config, result: &mut ValidationResult) {
        if config.consumer.max_deliveries == Some(0) {
            result.add_error(ValidationError::new(
                "consumer.max_deliveries",
                "max_deliveries must be greater than 0 when set",
            ));
        }
    }

    fn validate_handlers(config: &Config, result: &mut ValidationResult) {
        if config.handlers.is_empty() {
            result.add_warning(ValidationWarning::new(
                "handlers",
                "No handlers configured, every task will be acknowledged without work",
            ));
        }

        for (kind, handler) in &config.handlers {
            if handler.command.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("handlers.{}.command", kind),
                    "Handler command cannot be empty",
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
