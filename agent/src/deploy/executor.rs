//! Workflow executor

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{error, info, warn, Instrument};

use crate::deploy::certbot::CertIssuer;
use crate::deploy::fsm::{WorkflowEvent, WorkflowFsm};
use crate::deploy::nginx::ProxyConfigurator;
use crate::deploy::propagation::{wait_for_propagation, DnsResolver};
use crate::deploy::retry::RetryPolicy;
use crate::errors::AgentError;
use crate::http::dns::DnsProvider;
use crate::http::status::StatusReporter;
use crate::models::outcome::WorkflowOutcome;
use crate::models::request::DeployRequest;
use crate::storage::responses::ResponseLog;

/// Everything a workflow talks to outside this process
#[derive(Clone)]
pub struct Collaborators {
    pub proxy: Arc<dyn ProxyConfigurator>,
    pub dns: Arc<dyn DnsProvider>,
    pub resolver: Arc<dyn DnsResolver>,
    pub certs: Arc<dyn CertIssuer>,
    pub status: Arc<dyn StatusReporter>,
}

/// Options for the workflow engine
#[derive(Debug, Clone)]
pub struct Options {
    /// Address the A record must point at
    pub public_ip: IpAddr,

    /// Polling bounds for the propagation check
    pub propagation: RetryPolicy,
}

/// Drives one validated request through provisioning and reporting
pub struct WorkflowEngine {
    collaborators: Collaborators,
    options: Options,
    responses: Option<ResponseLog>,
}

impl WorkflowEngine {
    pub fn new(collaborators: Collaborators, options: Options) -> Self {
        Self {
            collaborators,
            options,
            responses: None,
        }
    }

    /// Mirror every outcome into a local response log as well
    pub fn with_response_log(mut self, responses: ResponseLog) -> Self {
        self.responses = Some(responses);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Run the workflow for `request` to a terminal outcome.
    ///
    /// The outcome is reported exactly once, whether provisioning succeeded
    /// or not. A failed report is logged but does not change the outcome.
    pub async fn execute(&self, request: &DeployRequest) -> WorkflowOutcome {
        let span = tracing::info_span!(
            "workflow",
            request_id = %request.id,
            subdomain = %request.subdomain
        );

        async {
            info!(
                "Starting deployment of {} ({})",
                request.subdomain,
                request.target.project_type()
            );

            let mut fsm = WorkflowFsm::new();
            let outcome = match self.provision(request, &mut fsm).await {
                Ok(()) => WorkflowOutcome::success(request, fsm.state().label()),
                Err(e) => {
                    let step = fsm
                        .next_step()
                        .map(|step| step.as_str())
                        .unwrap_or_else(|| fsm.state().label());
                    let reason = format!("{} failed: {}", step, e);
                    if let Err(transition) = fsm.process(WorkflowEvent::StepFailed(reason.clone()))
                    {
                        warn!("{}", transition);
                    }
                    error!(error = %e, step, "Deployment failed");
                    WorkflowOutcome::failed(request, step, reason)
                }
            };

            self.report(&outcome, &mut fsm).await;
            self.record(&outcome).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn provision(
        &self,
        request: &DeployRequest,
        fsm: &mut WorkflowFsm,
    ) -> Result<(), AgentError> {
        let c = &self.collaborators;
        let subdomain = request.subdomain.as_str();

        c.proxy.write_config(subdomain, &request.target).await?;
        advance(fsm, WorkflowEvent::ProxyConfigured)?;

        c.dns.upsert(subdomain, self.options.public_ip).await?;
        advance(fsm, WorkflowEvent::DnsRecordCreated)?;

        wait_for_propagation(
            c.resolver.as_ref(),
            subdomain,
            self.options.public_ip,
            &self.options.propagation,
        )
        .await?;
        advance(fsm, WorkflowEvent::DnsPropagated)?;

        if c.certs.certificate_valid(subdomain).await {
            info!("Valid certificate already present for {}, skipping issuance", subdomain);
        } else {
            c.certs.issue(subdomain).await?;
        }
        advance(fsm, WorkflowEvent::CertificateIssued)?;

        c.proxy.validate_config().await?;
        c.proxy.reload().await?;
        advance(fsm, WorkflowEvent::ProxyReloaded)?;

        info!("Deployment of {} complete", subdomain);
        Ok(())
    }

    async fn report(&self, outcome: &WorkflowOutcome, fsm: &mut WorkflowFsm) {
        match self.collaborators.status.report(outcome).await {
            Ok(()) => {
                if outcome.is_success() {
                    if let Err(e) = fsm.process(WorkflowEvent::Reported) {
                        warn!("{}", e);
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to report deployment status");
            }
        }
    }

    async fn record(&self, outcome: &WorkflowOutcome) {
        let Some(responses) = self.responses.clone() else {
            return;
        };
        let outcome = outcome.clone();
        let result = tokio::task::spawn_blocking(move || responses.append(&outcome)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to append to response log"),
            Err(e) => warn!(error = %e, "Response log task failed"),
        }
    }
}

fn advance(fsm: &mut WorkflowFsm, event: WorkflowEvent) -> Result<(), AgentError> {
    fsm.process(event).map_err(AgentError::WorkflowError)
}
