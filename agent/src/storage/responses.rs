//! Local mirror of reported workflow outcomes

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::outcome::WorkflowOutcome;

/// Default number of outcomes kept
pub const DEFAULT_RESPONSE_CAP: usize = 1000;

/// Capped, append-only JSON array of outcomes, replaced atomically on append
#[derive(Debug, Clone)]
pub struct ResponseLog {
    file: File,
    cap: usize,
}

impl ResponseLog {
    pub fn new(file: File, cap: usize) -> Self {
        Self {
            file,
            cap: cap.max(1),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Append one outcome, dropping the oldest entries beyond the cap.
    ///
    /// An unreadable existing log is started over rather than blocking the
    /// mirror forever; the previous version survives as `.bak`.
    pub fn append(&self, outcome: &WorkflowOutcome) -> Result<(), AgentError> {
        let cap = self.cap;
        self.file.update_atomic(|current| {
            let mut entries: Vec<serde_json::Value> = match current.as_deref() {
                Some(contents) if !contents.trim().is_empty() => {
                    serde_json::from_str(contents).unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "Response log is unreadable, starting a new one");
                        Vec::new()
                    })
                }
                _ => Vec::new(),
            };

            entries.push(serde_json::to_value(outcome)?);
            if entries.len() > cap {
                let excess = entries.len() - cap;
                entries.drain(..excess);
            }

            Ok(serde_json::to_vec_pretty(&entries)?)
        })
    }

    /// All mirrored outcomes, oldest first
    pub fn read_all(&self) -> Result<Vec<WorkflowOutcome>, AgentError> {
        match self.file.read_owned()? {
            Some(contents) if !contents.trim().is_empty() => Ok(serde_json::from_str(&contents)?),
            _ => Ok(Vec::new()),
        }
    }
}
