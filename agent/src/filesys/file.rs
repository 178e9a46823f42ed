//! File operations
//!
//! Blocking by design: every operation here runs under an `flock`, which has
//! no async counterpart. Async callers go through `spawn_blocking`.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::AgentError;
use crate::filesys::lock::{FileLock, LockMode};

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// `<file>.lock`, the sidecar guarding files we replace by rename
    pub fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    /// `<file>.bak`, the previous complete version
    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".bak")
    }

    /// `<file>.tmp`, staging area for the next version
    pub fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// Read a file owned by another process under a shared lock on the file
    /// itself. `None` when the file does not exist.
    pub fn read_shared(&self) -> Result<Option<String>, AgentError> {
        match FileLock::open_shared(&self.path) {
            Ok(mut guard) => Ok(Some(guard.read_to_string()?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a file we own under a shared lock on its sidecar. `None` when the
    /// file does not exist.
    pub fn read_owned(&self) -> Result<Option<String>, AgentError> {
        let _guard = FileLock::open_sidecar(&self.lock_path(), LockMode::Shared)?;
        read_optional(&self.path)
    }

    /// Read the `.bak` copy, if any
    pub fn read_backup(&self) -> Result<Option<String>, AgentError> {
        let _guard = FileLock::open_sidecar(&self.lock_path(), LockMode::Shared)?;
        read_optional(&self.backup_path())
    }

    /// Write the next version to `<file>.tmp` and flush it to disk.
    ///
    /// Nothing visible changes until [`StagedWrite::commit`]. The caller must
    /// hold the exclusive sidecar lock.
    pub fn stage(&self, contents: &[u8]) -> Result<StagedWrite, AgentError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        if let Err(e) = write_synced(&temp, contents) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        Ok(StagedWrite {
            temp,
            target: self.path.clone(),
            backup: self.backup_path(),
        })
    }

    /// Atomically replace the file, keeping the previous version as `.bak`.
    ///
    /// Readers only ever observe the old or the new complete file. A failed
    /// replace leaves both the target and `.bak` as they were.
    pub fn write_atomic(&self, contents: &[u8]) -> Result<(), AgentError> {
        let _guard = FileLock::open_sidecar(&self.lock_path(), LockMode::Exclusive)?;
        self.replace_locked(contents)
    }

    /// Read-modify-write under one exclusive lock.
    ///
    /// `update` receives the current contents (`None` if the file is missing)
    /// and returns the next version, which replaces the file atomically.
    pub fn update_atomic<F>(&self, update: F) -> Result<(), AgentError>
    where
        F: FnOnce(Option<String>) -> Result<Vec<u8>, AgentError>,
    {
        let _guard = FileLock::open_sidecar(&self.lock_path(), LockMode::Exclusive)?;
        let current = read_optional(&self.path)?;
        let next = update(current)?;
        self.replace_locked(&next)
    }

    fn replace_locked(&self, contents: &[u8]) -> Result<(), AgentError> {
        let staged = self.stage(contents)?;
        if let Err(e) = staged.commit() {
            // The rename is atomic, so an existing target is still complete.
            // Only a vanished target is worth rebuilding from `.bak`.
            if !self.path.exists() {
                if let Err(restore_err) = self.restore_backup_locked() {
                    tracing::error!(
                        path = %self.path.display(),
                        error = %restore_err,
                        "Failed to restore backup after failed write"
                    );
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Serialize `value` as pretty JSON and replace the file atomically
    pub fn write_json_atomic<T: Serialize>(&self, value: &T) -> Result<(), AgentError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents)
    }

    /// Put the `.bak` copy back in place
    pub fn restore_backup(&self) -> Result<(), AgentError> {
        let _guard = FileLock::open_sidecar(&self.lock_path(), LockMode::Exclusive)?;
        self.restore_backup_locked()
    }

    fn restore_backup_locked(&self) -> Result<(), AgentError> {
        let backup = self.backup_path();
        if !backup.is_file() {
            return Ok(());
        }
        replace_with_copy(&backup, &self.path, &self.temp_path())?;
        sync_parent(&self.path);
        Ok(())
    }
}

/// A fully written temp file waiting to be renamed over its target
#[derive(Debug)]
pub struct StagedWrite {
    temp: PathBuf,
    target: PathBuf,
    backup: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Back up the current target, then rename the temp file over it.
    ///
    /// The backup goes through `<file>.bak.tmp` so `.bak` is always a
    /// complete earlier version. On failure the temp files are removed and
    /// the target is untouched.
    pub fn commit(self) -> Result<(), AgentError> {
        let result = self.commit_inner();
        if result.is_err() {
            let _ = fs::remove_file(&self.temp);
        }
        result.map_err(AgentError::from)
    }

    fn commit_inner(&self) -> io::Result<()> {
        if self.target.is_file() {
            let mut backup_temp = self.backup.clone().into_os_string();
            backup_temp.push(".tmp");
            replace_with_copy(&self.target, &self.backup, Path::new(&backup_temp))?;
        }
        fs::rename(&self.temp, &self.target)?;
        sync_parent(&self.target);
        Ok(())
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Copy `from` to `via`, sync it, then rename it over `to`. `to` is either
/// left alone or replaced by a complete copy.
fn replace_with_copy(from: &Path, to: &Path, via: &Path) -> io::Result<()> {
    let copied = fs::copy(from, via)
        .and_then(|_| fs::OpenOptions::new().write(true).open(via))
        .and_then(|f| f.sync_all())
        .and_then(|_| fs::rename(via, to));
    if copied.is_err() {
        let _ = fs::remove_file(via);
    }
    copied
}

fn read_optional(path: &Path) -> Result<Option<String>, AgentError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Persist the rename itself. Best effort: not every platform lets you open a
/// directory for syncing.
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
