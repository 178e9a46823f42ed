//! Storage layout configuration

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Files the agent reads and writes
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Shared queue written by the control plane
    pub queue_file: PathBuf,

    /// Processed-id ledger (owned)
    pub ledger_file: PathBuf,

    /// Optional local mirror of reported outcomes (owned)
    pub response_file: Option<PathBuf>,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(
        queue_file: impl Into<PathBuf>,
        ledger_file: impl Into<PathBuf>,
        response_file: Option<PathBuf>,
    ) -> Self {
        Self {
            queue_file: queue_file.into(),
            ledger_file: ledger_file.into(),
            response_file,
        }
    }

    /// Everything under one state directory, handy for tests and local runs
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join("deploy-requests.json"),
            dir.join("processed.json"),
            Some(dir.join("deploy-responses.json")),
        )
    }

    pub fn queue_file(&self) -> File {
        File::new(&self.queue_file)
    }

    pub fn ledger_file(&self) -> File {
        File::new(&self.ledger_file)
    }

    pub fn response_file(&self) -> Option<File> {
        self.response_file.as_ref().map(File::new)
    }

    /// Directory watched for queue changes
    pub fn queue_dir(&self) -> PathBuf {
        match self.queue_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Create the directories of the files we own. The queue directory
    /// belongs to the producer and must already exist.
    pub async fn setup(&self) -> Result<(), AgentError> {
        let owned = std::iter::once(&self.ledger_file).chain(self.response_file.iter());
        for path in owned {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
        }

        let queue_dir = self.queue_dir();
        if !fs::metadata(&queue_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(AgentError::ConfigError(format!(
                "queue directory {} does not exist",
                queue_dir.display()
            )));
        }
        Ok(())
    }
}
