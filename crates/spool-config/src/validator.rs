//! Configuration validation.

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
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_queue(config, &mut result);
        Self::validate_storage(config, &mut result);
        Self::validate_lock(config, &mut result);

        result
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        let queue = &config.queue;

        if queue.min_priority > queue.max_priority {
            result.add_error(ValidationError::new(
                "queue.max_priority",
                format!(
                    "max_priority ({}) must not be below min_priority ({})",
                    queue.max_priority, queue.min_priority
                ),
            ));
        } else if !(queue.min_priority..=queue.max_priority).contains(&queue.default_priority) {
            result.add_error(ValidationError::new(
                "queue.default_priority",
                format!(
                    "default_priority ({}) must be within {}..={}",
                    queue.default_priority, queue.min_priority, queue.max_priority
                ),
            ));
        }

        if queue.max_queue_size == 0 {
            result.add_warning(ValidationWarning::new(
                "queue.max_queue_size",
                "max_queue_size is 0, the queue is unbounded",
            ));
        }

        if queue.retention_days == 0 {
            result.add_warning(ValidationWarning::new(
                "queue.retention_days",
                "retention_days is 0, cleanup removes every finished task",
            ));
        }
    }

    fn validate_storage(config: &Config, result: &mut ValidationResult) {
        if config.storage.data_dir.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                "storage.data_dir",
                "data_dir cannot be empty",
            ));
        }

        if config.storage.backup_retention == 0 {
            result.add_error(ValidationError::new(
                "storage.backup_retention",
                "backup_retention must be greater than 0",
            ));
        }
    }

    fn validate_lock(config: &Config, result: &mut ValidationResult) {
        if config.lock.timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "lock.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        }

        if config.lock.timeout_secs > 600 {
            result.add_warning(ValidationWarning::new(
                "lock.timeout_secs",
                "timeout_secs is very high (>600), callers may appear hung",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
