//! Scoped advisory file locks
//!
//! A [`FileLock`] holds an `flock` on an open descriptor for as long as the
//! guard lives. The lock is released in `Drop`, so every exit path (early
//! return, `?`, panic unwind) gives it back.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use fs2::FileExt;

/// Lock flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers at once
    Shared,
    /// One writer, no readers
    Exclusive,
}

/// An open file with an advisory lock held on it
#[derive(Debug)]
pub struct FileLock {
    file: fs::File,
    mode: LockMode,
}

impl FileLock {
    /// Lock an already opened file, blocking until the lock is granted
    pub fn acquire(file: fs::File, mode: LockMode) -> io::Result<Self> {
        match mode {
            LockMode::Shared => FileExt::lock_shared(&file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
        }
        Ok(Self { file, mode })
    }

    /// Open `path` read-only and take a shared lock on it.
    ///
    /// Used for files owned by someone else: nothing is created.
    pub fn open_shared(path: &Path) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        Self::acquire(file, LockMode::Shared)
    }

    /// Open (creating if needed) a dedicated lock file and lock it
    pub fn open_sidecar(path: &Path, mode: LockMode) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::acquire(file, mode)
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Read the whole locked file as UTF-8
    pub fn read_to_string(&mut self) -> io::Result<String> {
        let mut contents = String::new();
        self.file.read_to_string(&mut contents)?;
        Ok(contents)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor would release it too; unlocking first keeps
        // the release independent of when the fd actually gets closed.
        let _ = FileExt::unlock(&self.file);
    }
}
