//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::certbot::Certbot;
use crate::deploy::executor::{self, Collaborators, WorkflowEngine};
use crate::deploy::nginx::NginxConfigurator;
use crate::deploy::propagation::SystemResolver;
use crate::deploy::retry::RetryPolicy;
use crate::deploy::validator::Validator;
use crate::errors::AgentError;
use crate::http::dns::HostingerDns;
use crate::http::status::HttpStatusReporter;
use crate::storage::ledger::LedgerStore;
use crate::storage::queue::QueueStore;
use crate::storage::responses::{ResponseLog, DEFAULT_RESPONSE_CAP};
use crate::storage::settings::Settings;
use crate::utils::BackoffOptions;
use crate::workers::dispatcher::Dispatcher;

/// Main application state
pub struct AppState {
    /// Queue dispatcher shared with the watcher
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Initialize application state with the production collaborators
    pub async fn init(settings: &Settings, options: &AppOptions) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let retry = RetryPolicy::from_settings(&settings.retry);
        let collaborators = Collaborators {
            proxy: Arc::new(NginxConfigurator::new(&settings.nginx, retry.clone())),
            dns: Arc::new(HostingerDns::new(&settings.dns, retry.clone())?),
            resolver: Arc::new(SystemResolver),
            certs: Arc::new(Certbot::new(&settings.certbot, retry.clone())),
            status: Arc::new(HttpStatusReporter::new(&settings.status, retry.clone())?),
        };

        Self::with_collaborators(settings, options, collaborators).await
    }

    /// Initialize application state around the given collaborators
    pub async fn with_collaborators(
        settings: &Settings,
        options: &AppOptions,
        collaborators: Collaborators,
    ) -> Result<Self, AgentError> {
        let layout = &settings.storage;
        layout.setup().await?;

        let propagation = RetryPolicy::new(
            settings.retry.propagation_attempts,
            BackoffOptions {
                base_delay: settings.retry.base_delay,
                max_delay: settings.retry.max_delay,
                multiplier: 1.5,
            },
        );
        let mut engine = WorkflowEngine::new(
            collaborators,
            executor::Options {
                public_ip: settings.public_ip,
                propagation,
            },
        );
        if let Some(file) = layout.response_file() {
            engine = engine.with_response_log(ResponseLog::new(file, DEFAULT_RESPONSE_CAP));
        }
        let dispatcher = Arc::new(Dispatcher::new(
            QueueStore::new(layout.queue_file(), options.queue.clone()),
            LedgerStore::new(layout.ledger_file(), settings.ledger_cap),
            Validator::new(settings.static_suffix.clone()),
            Arc::new(engine),
        ));

        Ok(Self { dispatcher })
    }
}
