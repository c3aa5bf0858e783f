// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only error log for batch runs.
//!
//! One timestamp-prefixed line per failed record. The file is truncated at
//! the start of each batch; its id column feeds the id-file driver for
//! retrying a known failure set. Log I/O failures are logged and swallowed:
//! bookkeeping must never abort the batch.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use caravel_core::{CaravelError, Result};

/// The per-batch failure record.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Truncate the log and write the batch header line.
    pub fn start(path: &Path) -> Result<Self> {
        let mut file = File::create(path).map_err(|e| {
            CaravelError::Internal(format!(
                "cannot create error log {}: {e}",
                path.display()
            ))
        })?;
        writeln!(file, "# batch started {}", Utc::now().to_rfc3339()).map_err(|e| {
            CaravelError::Internal(format!(
                "cannot write error log {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Append one failure line.
    pub fn append(&self, ticket_id: u64, message: &str) {
        let line = format!("{} ticket {ticket_id}: {message}\n", Utc::now().to_rfc3339());
        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(error) = result {
            warn!(path = %self.path.display(), error = %error, "failed to append to error log");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_truncates_and_append_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticket_errors.log");

        std::fs::write(&path, "stale line from last run\n").unwrap();

        let log = ErrorLog::start(&path).unwrap();
        log.append(4711, "gateway error: status 500");
        log.append(4712, "problem link cycle detected at source ticket 4712");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale line"), "start must truncate");
        assert!(content.starts_with("# batch started "));
        assert_eq!(content.lines().count(), 3);
        assert!(content.contains("ticket 4711: gateway error: status 500"));
    }
}
