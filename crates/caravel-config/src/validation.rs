// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes: both instances need a URL and credentials before any batch
//! can run, and both must actually be distinct deployments.

use crate::diagnostic::ConfigError;
use crate::model::{CaravelConfig, InstanceConfig};

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or all collected validation
/// errors (does not fail fast).
pub fn validate_config(config: &CaravelConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    validate_instance("source", &config.source, &mut errors);
    validate_instance("target", &config.target, &mut errors);

    if !config.source.base_url.trim().is_empty()
        && config.source.base_url.trim_end_matches('/')
            == config.target.base_url.trim_end_matches('/')
    {
        errors.push(ConfigError::Validation {
            message: "source.base_url and target.base_url must name different instances"
                .to_string(),
        });
    }

    if config.migration.original_id_field_title.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "migration.original_id_field_title must not be empty".to_string(),
        });
    }

    if config.migration.error_log.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "migration.error_log must not be empty".to_string(),
        });
    }

    if config.migration.progress_interval == 0 {
        errors.push(ConfigError::Validation {
            message: "migration.progress_interval must be at least 1".to_string(),
        });
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_instance(section: &str, instance: &InstanceConfig, errors: &mut Vec<ConfigError>) {
    if instance.base_url.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: format!("{section}.base_url must not be empty"),
        });
    } else if !instance.base_url.starts_with("http://")
        && !instance.base_url.starts_with("https://")
    {
        errors.push(ConfigError::Validation {
            message: format!(
                "{section}.base_url must start with http:// or https://, got `{}`",
                instance.base_url
            ),
        });
    }

    if instance.email.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: format!("{section}.email must not be empty"),
        });
    }

    if instance.password.is_empty() {
        errors.push(ConfigError::Validation {
            message: format!("{section}.password must not be empty"),
        });
    }
}
