//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::storage::settings::Settings;
use crate::workers::dispatcher::PassSummary;
use crate::workers::watcher;

/// Run the autoship agent until `shutdown_signal` resolves
pub async fn run(
    settings: &Settings,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing autoship agent...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let app_state = match AppState::init(settings, &options).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to start agent: {}", e);
            return Err(e);
        }
    };

    let mut watcher_handle = init_watcher_worker(
        options.watcher.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    );

    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
            shutdown_manager.with_watcher_worker_handle(watcher_handle)?;
        }
        result = &mut watcher_handle => {
            let err = match result {
                Ok(Ok(())) => AgentError::WatchError("watcher stopped unexpectedly".to_string()),
                Ok(Err(e)) => e,
                Err(e) => AgentError::WatchError(e.to_string()),
            };
            error!("Watcher worker exited: {}", err);
            shutdown_manager.shutdown().await?;
            return Err(err);
        }
    }

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Run a single dispatch pass and return its summary
pub async fn run_once(settings: &Settings, options: AppOptions) -> Result<PassSummary, AgentError> {
    let app_state = AppState::init(settings, &options).await?;
    app_state.dispatcher.run_once().await
}

// =============================== INITIALIZATION ================================== //

fn init_watcher_worker(
    options: watcher::Options,
    app_state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<Result<(), AgentError>> {
    info!("Initializing watcher worker...");

    let dispatcher = app_state.dispatcher.clone();

    tokio::spawn(async move {
        watcher::run(
            &options,
            dispatcher.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await
    })
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    watcher_worker_handle: Option<JoinHandle<Result<(), AgentError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            watcher_worker_handle: None,
        }
    }

    pub fn with_watcher_worker_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.watcher_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("watcher_handle already set".to_string()));
        }
        self.watcher_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down autoship agent...");

        // In-flight dispatch pass finishes before the watcher returns
        if let Some(handle) = self.watcher_worker_handle.take() {
            handle
                .await
                .map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
