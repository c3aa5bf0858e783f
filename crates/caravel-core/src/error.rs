// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Caravel migration toolkit.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CaravelError>;

/// The primary error type used across all Caravel crates.
///
/// Entity-resolution misses are deliberately NOT errors: the resolver
/// returns `Ok(None)` and logs, and the caller decides the fallback.
/// Only initialization failures (`Config`) abort a whole run; every
/// other variant is handled per record.
#[derive(Debug, Error)]
pub enum CaravelError {
    /// Configuration or startup errors (missing credentials, absent
    /// marker field, unparseable settings). Fatal before any record
    /// is processed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A remote instance answered with a non-2xx status.
    #[error("gateway error: status {status} on {path}: {body}")]
    Gateway {
        status: u16,
        path: String,
        body: String,
    },

    /// The request never produced an HTTP response (connect failure,
    /// timeout, malformed response body).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A single attachment could not be downloaded or re-uploaded.
    /// Callers drop the attachment and keep the owning comment.
    #[error("attachment error for {url}: {message}")]
    Attachment { url: String, message: String },

    /// A problem-ticket chain revisited a source id already being
    /// migrated. Treated like any other permanent per-record failure.
    #[error("problem link cycle detected at source ticket {0}")]
    Cycle(u64),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CaravelError {
    /// True for server-side failures worth one retry: 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Gateway { status, .. } if *status == 429 || (500..=599).contains(status)
        )
    }
}
