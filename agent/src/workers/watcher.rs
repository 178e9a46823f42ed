//! Queue file watcher

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::utils::sha256_hash;
use crate::workers::dispatcher::Dispatcher;

/// Watcher worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Minimum spacing between two accepted notifications
    pub debounce: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

/// What to do with one change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// New content: run a dispatch pass
    Dispatch,

    /// Same content as the last accepted notification, or no content
    Unchanged,

    /// New content, but too soon after the last accepted notification.
    /// Check again after the given delay.
    Debounced(Duration),
}

/// Change detection state for one watcher
#[derive(Debug, Clone)]
pub struct WatcherState {
    debounce: Duration,
    last_hash: Option<String>,
    last_accepted: Option<Instant>,
}

impl WatcherState {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_hash: None,
            last_accepted: None,
        }
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Classify a notification whose file currently hashes to `hash`
    pub fn observe(&mut self, hash: Option<String>, now: Instant) -> Decision {
        let Some(hash) = hash else {
            return Decision::Unchanged;
        };
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            return Decision::Unchanged;
        }
        if let Some(last) = self.last_accepted {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.debounce {
                return Decision::Debounced(self.debounce - elapsed);
            }
        }

        self.last_hash = Some(hash);
        self.last_accepted = Some(now);
        Decision::Dispatch
    }

    /// Drop the accepted hash so the same content is dispatched again
    pub fn forget_hash(&mut self) {
        self.last_hash = None;
    }
}

/// Whether `event` concerns `target`
pub fn is_relevant(event: &Event, target: &Path) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event.paths.iter().any(|path| path == target)
}

fn content_hash(file: &File) -> Option<String> {
    match file.read_shared() {
        Ok(Some(contents)) => Some(sha256_hash(contents.as_bytes())),
        Ok(None) => None,
        Err(e) => {
            warn!("Unable to read {}: {}", file.path().display(), e);
            None
        }
    }
}

async fn current_hash(file: &File) -> Option<String> {
    let file = file.clone();
    match tokio::task::spawn_blocking(move || content_hash(&file)).await {
        Ok(hash) => hash,
        Err(e) => {
            error!("Hash task failed: {}", e);
            None
        }
    }
}

/// Resolve the path notifications will report for the queue file
fn watch_target(queue_file: &Path) -> Result<(PathBuf, PathBuf), AgentError> {
    let name = queue_file.file_name().ok_or_else(|| {
        AgentError::ConfigError(format!("{} is not a file path", queue_file.display()))
    })?;
    let parent = match queue_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let dir = std::fs::canonicalize(&parent).map_err(|e| {
        AgentError::WatchError(format!("cannot watch {}: {}", parent.display(), e))
    })?;
    let target = dir.join(name);
    Ok((dir, target))
}

/// Run the watcher worker until `shutdown_signal` resolves.
///
/// One pass runs at startup. Afterwards every relevant notification goes
/// through [`WatcherState::observe`]; a debounced notification schedules a
/// re-check once the window has passed. A pass in progress always completes
/// before shutdown is noticed.
pub async fn run<S, F>(
    options: &Options,
    dispatcher: &Dispatcher,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Result<(), AgentError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let queue_file = dispatcher.queue().file().clone();
    let (dir, target) = watch_target(queue_file.path())?;

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!("Watching {} for deploy requests", target.display());

    let mut state = WatcherState::new(options.debounce);

    // Startup pass
    state.observe(current_hash(&queue_file).await, Instant::now());
    dispatch(dispatcher, &mut state).await;

    // Fixed deadline so unrelated events do not push the re-check back
    let mut recheck_at: Option<Instant> = None;
    let sleep_fn = &sleep_fn;

    loop {
        let remaining = recheck_at.map(|at| at.saturating_duration_since(Instant::now()));
        let recheck_timer = async move {
            match remaining {
                Some(delay) => sleep_fn(delay).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Watcher shutting down...");
                return Ok(());
            }
            _ = recheck_timer => {
                recheck_at = None;
                debug!("Re-checking {} after debounce window", target.display());
            }
            notification = rx.recv() => match notification {
                Some(Ok(event)) => {
                    if !is_relevant(&event, &target) {
                        continue;
                    }
                    debug!("Change notification: {:?}", event.kind);
                }
                Some(Err(e)) => {
                    warn!("Watch error: {}", e);
                    continue;
                }
                None => {
                    return Err(AgentError::WatchError(
                        "notification channel closed".to_string(),
                    ));
                }
            },
        }

        let hash = current_hash(&queue_file).await;
        let now = Instant::now();
        match state.observe(hash, now) {
            Decision::Dispatch => {
                info!("{} changed, processing requests", target.display());
                recheck_at = None;
                dispatch(dispatcher, &mut state).await;
            }
            Decision::Debounced(delay) => {
                debug!("Notification debounced, re-checking in {:?}", delay);
                recheck_at = Some(now + delay);
            }
            Decision::Unchanged => {
                debug!("No change in queue content, skipping");
            }
        }
    }
}

async fn dispatch(dispatcher: &Dispatcher, state: &mut WatcherState) {
    if let Err(e) = dispatcher.run_once().await {
        error!("Dispatch pass failed: {}", e);
        // Same content must be retried on the next notification
        state.forget_hash();
    }
}
