//! Shape checks shared by every `*Batch` action and the per-entry
//! successful/failed partition they return.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

pub const MAX_BATCH_ENTRIES: usize = 10;
const MAX_ENTRY_ID_LEN: usize = 80;

/// A whole-batch rejection. Any of these means no entry was applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchViolation {
    #[error("There should be at least one entry in the request.")]
    Empty,
    #[error("Maximum number of entries per request are {MAX_BATCH_ENTRIES}. You have sent {0}.")]
    TooMany(usize),
    #[error("Two or more batch entries in the request have the same Id: {0}")]
    NotDistinct(String),
    #[error("A batch entry id can only contain alphanumeric characters, hyphens and underscores and be at most 80 characters long: {0}")]
    InvalidId(String),
}

pub trait BatchEntry {
    fn entry_id(&self) -> &str;
}

pub fn validate_entries<E: BatchEntry>(entries: &[E]) -> Result<(), BatchViolation> {
    if entries.is_empty() {
        return Err(BatchViolation::Empty);
    }
    if entries.len() > MAX_BATCH_ENTRIES {
        return Err(BatchViolation::TooMany(entries.len()));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = entries.iter().map(|e| e.entry_id()).find(|id| !seen.insert(*id)) {
        return Err(BatchViolation::NotDistinct(dup.to_string()));
    }
    let malformed = entries.iter().map(|e| e.entry_id()).find(|id| {
        id.is_empty()
            || id.len() > MAX_ENTRY_ID_LEN
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    if let Some(id) = malformed {
        return Err(BatchViolation::InvalidId(id.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BatchResultErrorEntry {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

/// Per-entry results of a batch that passed validation. Serialises as the
/// `Successful`/`Failed` body every batch action returns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchOutcome<S> {
    pub successful: Vec<S>,
    pub failed: Vec<BatchResultErrorEntry>,
}

/// Success entry for batch actions that return nothing but the id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BatchResultEntry {
    pub id: String,
}

impl<S> Default for BatchOutcome<S> {
    fn default() -> Self {
        BatchOutcome {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<S> BatchOutcome<S> {
    pub fn succeed(&mut self, entry: S) {
        self.successful.push(entry);
    }

    pub fn fail(&mut self, id: impl Into<String>, code: &str, message: impl Into<String>) {
        self.failed.push(BatchResultErrorEntry {
            id: id.into(),
            code: code.to_string(),
            message: message.into(),
            sender_fault: true,
        });
    }
}
