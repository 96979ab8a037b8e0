//! # Observability Configuration
//!
//! Environment-specific settings for logging output.

use std::env;

use crate::errors::{AppError, AppResult};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Observability configuration for different environments
#[derive(Debug, Clone, PartialEq)]
pub struct ObservabilityConfig {
    /// Environment name (development, staging, production)
    pub environment: String,
    /// Log level for this crate's targets
    pub log_level: String,
    /// Output format: "json" or "pretty"
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        }
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Pretty output in development or when explicitly requested, JSON otherwise
    pub fn use_pretty_format(&self) -> bool {
        self.is_development() || self.log_format == "pretty"
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "Invalid log level: {} (expected one of {})",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.log_format != "json" && self.log_format != "pretty" {
            return Err(AppError::Config(format!(
                "Invalid log format: {} (expected json or pretty)",
                self.log_format
            )));
        }

        if self.environment.trim().is_empty() {
            return Err(AppError::Config("Environment name cannot be empty".to_string()));
        }

        Ok(())
    }
}
