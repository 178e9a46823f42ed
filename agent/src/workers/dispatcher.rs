//! Dispatch pass over the request queue

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::deploy::executor::WorkflowEngine;
use crate::deploy::validator::Validator;
use crate::errors::AgentError;
use crate::storage::ledger::LedgerStore;
use crate::storage::queue::QueueStore;

/// Counts for one pass over the queue
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Entries in the snapshot
    pub seen: usize,

    /// Already in the ledger, or repeated within the snapshot
    pub skipped: usize,

    /// Rejected by validation
    pub invalid: usize,

    pub succeeded: usize,

    pub failed: usize,
}

impl PassSummary {
    /// Number of workflows started
    pub fn executed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Reads the queue, filters it against the ledger and runs what is new
pub struct Dispatcher {
    queue: QueueStore,
    ledger: LedgerStore,
    validator: Validator,
    engine: Arc<WorkflowEngine>,
}

impl Dispatcher {
    pub fn new(
        queue: QueueStore,
        ledger: LedgerStore,
        validator: Validator,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        Self {
            queue,
            ledger,
            validator,
            engine,
        }
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    /// Process the current queue snapshot once.
    ///
    /// Requests run one at a time in file order. Only a successful workflow
    /// is added to the ledger, and the ledger is persisted right after it so
    /// a crash never loses a recorded success. Storage failures abort the
    /// pass; collaborator failures only fail their own request.
    pub async fn run_once(&self) -> Result<PassSummary, AgentError> {
        let ledger_store = self.ledger.clone();
        let mut ledger = blocking(move || ledger_store.load()).await?;

        let queue = self.queue.clone();
        let entries = blocking(move || queue.read()).await?;

        let mut summary = PassSummary::default();
        let mut attempted: HashSet<String> = HashSet::new();

        for entry in entries {
            summary.seen += 1;

            if let Some(id) = entry.id() {
                if ledger.contains(id) || attempted.contains(id) {
                    debug!(request_id = %id, "Request already handled, skipping");
                    summary.skipped += 1;
                    continue;
                }
            }

            let request = match self.validator.validate(&entry) {
                Ok(request) => request,
                Err(e) => {
                    warn!(
                        request_id = entry.id().unwrap_or("<missing>"),
                        subdomain = entry.subdomain().unwrap_or("<missing>"),
                        error = %e,
                        "Skipping invalid deploy request"
                    );
                    summary.invalid += 1;
                    continue;
                }
            };

            attempted.insert(request.id.clone());
            let outcome = self.engine.execute(&request).await;

            if outcome.is_success() {
                ledger.push(request.id.clone());
                let store = self.ledger.clone();
                let snapshot = ledger.clone();
                blocking(move || store.save(&snapshot)).await?;
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        if summary.seen > 0 {
            info!(
                seen = summary.seen,
                skipped = summary.skipped,
                invalid = summary.invalid,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Dispatch pass complete"
            );
        }
        Ok(summary)
    }
}

/// Run blocking file I/O off the async workers
async fn blocking<T, F>(f: F) -> Result<T, AgentError>
where
    F: FnOnce() -> Result<T, AgentError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AgentError::StorageError(format!("storage task failed: {}", e)))?
}
