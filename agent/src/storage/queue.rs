//! Read side of the shared deploy-request queue file
//!
//! The control plane owns this file and may rewrite it at any moment. We only
//! ever read it, under a shared lock, and never modify, truncate or delete it.

use std::time::Duration;

use serde_json::Value;
use tracing::{error, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::request::QueueEntry;

/// Queue reader options
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How many times to re-read a file that does not parse yet
    pub parse_attempts: u32,

    /// Delay between those re-reads
    pub parse_retry_delay: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            parse_attempts: 3,
            parse_retry_delay: Duration::from_millis(200),
        }
    }
}

/// Reads snapshots of the queue file
#[derive(Debug, Clone)]
pub struct QueueStore {
    file: File,
    options: QueueOptions,
}

impl QueueStore {
    pub fn new(file: File, options: QueueOptions) -> Self {
        Self { file, options }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Read the current snapshot.
    ///
    /// Missing, empty and malformed files all yield an empty batch (the
    /// producer may be halfway through a rewrite). Only I/O failures are
    /// returned as errors.
    pub fn read(&self) -> Result<Vec<QueueEntry>, AgentError> {
        let attempts = self.options.parse_attempts.max(1);

        for attempt in 1..=attempts {
            let contents = match self.file.read_shared() {
                Ok(Some(contents)) => contents,
                Ok(None) => return Ok(Vec::new()),
                Err(e) => {
                    return Err(AgentError::StorageError(format!(
                        "failed to read queue {}: {}",
                        self.file.path().display(),
                        e
                    )))
                }
            };

            match parse_snapshot(&contents) {
                Ok(entries) => return Ok(entries),
                Err(e) => {
                    warn!(
                        path = %self.file.path().display(),
                        error = %e,
                        "Queue file is not valid JSON yet, retrying ({}/{})",
                        attempt,
                        attempts
                    );
                    if attempt < attempts && !self.options.parse_retry_delay.is_zero() {
                        std::thread::sleep(self.options.parse_retry_delay);
                    }
                }
            }
        }

        error!(
            path = %self.file.path().display(),
            "Failed to read valid JSON after {} attempts, treating queue as empty",
            attempts
        );
        Ok(Vec::new())
    }
}

/// Parse a queue snapshot, normalising a bare object into a one-element batch
pub fn parse_snapshot(contents: &str) -> Result<Vec<QueueEntry>, serde_json::Error> {
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries = match serde_json::from_str::<Value>(contents)? {
        Value::Array(items) => items.into_iter().map(QueueEntry::from).collect(),
        object @ Value::Object(_) => vec![QueueEntry::from(object)],
        other => {
            warn!("Queue file holds a bare {} value, ignoring it", json_kind(&other));
            Vec::new()
        }
    };
    Ok(entries)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
