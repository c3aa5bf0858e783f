// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./caravel.toml` > `~/.config/caravel/caravel.toml`
//! > `/etc/caravel/caravel.toml` with environment variable overrides via the
//! `CARAVEL_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::CaravelConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/caravel/caravel.toml` (system-wide)
/// 3. `~/.config/caravel/caravel.toml` (user XDG config)
/// 4. `./caravel.toml` (local directory)
/// 5. `CARAVEL_*` environment variables
pub fn load_config() -> Result<CaravelConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CaravelConfig::default()))
        .merge(Toml::file("/etc/caravel/caravel.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("caravel/caravel.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("caravel.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and for callers that already hold the TOML text.
pub fn load_config_from_str(toml_content: &str) -> Result<CaravelConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CaravelConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<CaravelConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CaravelConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `CARAVEL_SOURCE_BASE_URL` must map to
/// `source.base_url`, not `source.base.url`.
fn env_provider() -> Env {
    Env::prefixed("CARAVEL_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: CARAVEL_MIGRATION_START_TIME -> "migration_start_time"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("source_", "source.", 1)
            .replacen("target_", "target.", 1)
            .replacen("migration_", "migration.", 1);
        mapped.into()
    })
}
