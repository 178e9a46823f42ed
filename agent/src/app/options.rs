//! Application configuration options

use std::time::Duration;

use crate::storage::queue::QueueOptions;
use crate::storage::settings::Settings;
use crate::workers::watcher;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Watcher worker options
    pub watcher: watcher::Options,

    /// Queue read options
    pub queue: QueueOptions,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            watcher: watcher::Options {
                debounce: settings.debounce,
            },
            ..Default::default()
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            watcher: watcher::Options::default(),
            queue: QueueOptions::default(),
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            // Long enough for an in-flight certbot run
            max_shutdown_delay: Duration::from_secs(300),
        }
    }
}
