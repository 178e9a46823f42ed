//! Control plane status reporting

use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::deploy::retry::{retry, RetryPolicy};
use crate::errors::{AgentError, CollaboratorError};
use crate::http::client::HttpClient;
use crate::models::outcome::WorkflowOutcome;
use crate::storage::settings::StatusSettings;

/// Receives the terminal outcome of every executed workflow
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, outcome: &WorkflowOutcome) -> Result<(), CollaboratorError>;
}

/// Posts outcomes to `<control plane>/api/deployment-status`
pub struct HttpStatusReporter {
    http: HttpClient,
    path: String,
    retry: RetryPolicy,
}

impl HttpStatusReporter {
    pub fn new(settings: &StatusSettings, retry: RetryPolicy) -> Result<Self, AgentError> {
        let endpoint: &Url = &settings.endpoint;
        let origin = endpoint.origin().ascii_serialization();
        Ok(Self {
            http: HttpClient::new(&origin, settings.timeout)?,
            path: endpoint.path().to_string(),
            retry,
        })
    }
}

#[async_trait]
impl StatusReporter for HttpStatusReporter {
    async fn report(&self, outcome: &WorkflowOutcome) -> Result<(), CollaboratorError> {
        info!(
            request_id = %outcome.request_id,
            subdomain = %outcome.subdomain,
            "Sending deployment status to control plane"
        );

        retry(&self.retry, "Status report", move || async move {
            let reply = self.http.post(&self.path, None, outcome).await?;
            if reply.is_success() {
                Ok(())
            } else {
                Err(reply.into_error("Control plane"))
            }
        })
        .await
    }
}
