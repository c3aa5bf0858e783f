// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Diagnostic rendering for configuration errors.

use thiserror::Error;

/// A configuration problem surfaced at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The files/env could not be parsed or merged.
    #[error("could not load configuration: {0}")]
    Load(#[from] figment::Error),

    /// The merged configuration parsed but is semantically invalid.
    #[error("{message}")]
    Validation { message: String },
}

/// Print collected configuration errors to stderr, one per line.
pub fn render_errors(errors: &[ConfigError]) {
    for error in errors {
        eprintln!("caravel: config error: {error}");
    }
}
