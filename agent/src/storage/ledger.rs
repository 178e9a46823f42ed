//! Processed-request ledger
//!
//! Durable record of request ids that completed successfully. The dispatcher
//! consults it before running a workflow so a request is executed at most
//! once, even across restarts.

use std::collections::{HashSet, VecDeque};

use tracing::warn;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Default number of ids kept on disk
pub const DEFAULT_LEDGER_CAP: usize = 1000;

/// Ordered, bounded set of processed request ids; oldest evicted first
#[derive(Debug, Clone)]
pub struct ProcessedLedger {
    order: VecDeque<String>,
    members: HashSet<String>,
    cap: usize,
}

impl ProcessedLedger {
    /// Create an empty ledger holding at most `cap` ids
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(cap.min(DEFAULT_LEDGER_CAP)),
            members: HashSet::new(),
            cap: cap.max(1),
        }
    }

    /// Rebuild from a persisted list (oldest first)
    pub fn from_ids<I>(ids: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut ledger = Self::new(cap);
        for id in ids {
            ledger.push(id);
        }
        ledger
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Record `id` as processed. Returns false if it was already there.
    pub fn push(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.members.contains(&id) {
            return false;
        }

        self.members.insert(id.clone());
        self.order.push_back(id);

        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Ids oldest first
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}

/// Reads and persists the ledger file
#[derive(Debug, Clone)]
pub struct LedgerStore {
    file: File,
    cap: usize,
}

impl LedgerStore {
    pub fn new(file: File, cap: usize) -> Self {
        Self { file, cap }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Load the ledger. A missing file is an empty ledger; a corrupt one
    /// falls back to the `.bak` copy. If neither parses we refuse to guess.
    pub fn load(&self) -> Result<ProcessedLedger, AgentError> {
        let primary = match self.file.read_owned()? {
            None => return Ok(ProcessedLedger::new(self.cap)),
            Some(contents) => self.parse(&contents),
        };

        let primary_err = match primary {
            Ok(ledger) => return Ok(ledger),
            Err(e) => e,
        };

        warn!(
            path = %self.file.path().display(),
            error = %primary_err,
            "Ledger is unreadable, falling back to backup"
        );

        match self.file.read_backup()? {
            Some(contents) => self.parse(&contents).map_err(|e| {
                AgentError::StorageError(format!(
                    "ledger {} and its backup are both unreadable: {}; {}",
                    self.file.path().display(),
                    primary_err,
                    e
                ))
            }),
            None => Err(AgentError::StorageError(format!(
                "ledger {} is unreadable and has no backup: {}",
                self.file.path().display(),
                primary_err
            ))),
        }
    }

    fn parse(&self, contents: &str) -> Result<ProcessedLedger, serde_json::Error> {
        if contents.trim().is_empty() {
            return Ok(ProcessedLedger::new(self.cap));
        }
        let ids: Vec<String> = serde_json::from_str(contents)?;
        Ok(ProcessedLedger::from_ids(ids, self.cap))
    }

    /// Persist the ledger atomically, keeping the previous version as `.bak`
    pub fn save(&self, ledger: &ProcessedLedger) -> Result<(), AgentError> {
        self.file.write_json_atomic(&ledger.to_vec()).map_err(|e| {
            AgentError::StorageError(format!(
                "failed to write ledger {}: {}",
                self.file.path().display(),
                e
            ))
        })
    }
}
