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

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
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

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_kernel(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_extensions(config, &mut result);

        result
    }

    fn validate_kernel(config: &Config, result: &mut ValidationResult) {
        if config.kernel.name.trim().is_empty() {
            result.add_error(ValidationError::new("kernel.name", "Name cannot be empty"));
        }
    }

    fn validate_state(config: &Config, result: &mut ValidationResult) {
        if config.state.persistence && config.state.path.is_none() {
            result.add_warning(ValidationWarning::new(
                "state.path",
                "Persistence enabled without a path, will use default location",
            ));
        }

        if !config.state.persistence && config.state.path.is_some() {
            result.add_warning(ValidationWarning::new(
                "state.path",
                "Path is set but persistence is disabled",
            ));
        }

        if let Some(ref path) = config.state.path {
            if path.is_dir() {
                result.add_error(ValidationError::new(
                    "state.path",
                    format!("State path is a directory: {:?}", path),
                ));
            }
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = config.logging.level.to_lowercase();
        // Anything with a directive separator is passed to the filter as-is.
        if !level.contains('=') && !level.contains(',') && !valid_levels.contains(&level.as_str())
        {
            result.add_error(ValidationError::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    config.logging.level, valid_levels
                ),
            ));
        }
    }

    fn validate_extensions(config: &Config, result: &mut ValidationResult) {
        for (name, value) in &config.extensions.config {
            if !value.is_object() {
                result.add_error(ValidationError::new(
                    format!("extensions.config.{}", name),
                    "Extension configuration must be a table",
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for name in &config.extensions.disabled {
            if !seen.insert(name) {
                result.add_warning(ValidationWarning::new(
                    "extensions.disabled",
                    format!("Extension '{}' is listed more than once", name),
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
