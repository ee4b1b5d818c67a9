use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A failure recorded for one entry. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionError {
    pub file: String,
    pub reason: String,
}

impl ExtractionError {
    pub(crate) fn from_error(file: &str, err: &Error) -> Self {
        let reason = match err {
            Error::Entry { source, .. } => source.to_string(),
            other => other.to_string(),
        };
        Self {
            file: file.to_string(),
            reason,
        }
    }
}

/// Outcome of a scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Entries in the catalog.
    pub total: usize,
    /// Entries rejected by the include/exclude filter.
    pub skipped: usize,
    /// Entries written successfully.
    pub extracted: usize,
    /// Recorded per-entry failures, in catalog order.
    pub errors: Vec<ExtractionError>,
}

impl ExtractionReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Write the recorded errors as a pretty-printed JSON array.
    pub fn write_error_report(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.errors)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        std::fs::write(path, json).map_err(Error::fs("write error report", path))
    }
}
