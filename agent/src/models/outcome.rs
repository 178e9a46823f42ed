//! Workflow outcome models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::request::{DeployRequest, ProjectTarget};

/// Terminal status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// What gets reported to the control plane and mirrored to the response log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub request_id: String,

    pub subdomain: String,

    pub status: OutcomeStatus,

    /// "Deployed" on success, the failure reason otherwise
    pub message: String,

    /// Last step reached (on failure: the step that failed)
    pub step_reached: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_url: Option<String>,

    pub finished_at: DateTime<Utc>,
}

impl WorkflowOutcome {
    fn new(
        request: &DeployRequest,
        status: OutcomeStatus,
        message: String,
        step_reached: &str,
    ) -> Self {
        let (port, s3_url) = match &request.target {
            ProjectTarget::Dynamic { port } => (Some(*port), None),
            ProjectTarget::Static { s3_url } => (None, Some(s3_url.clone())),
        };
        Self {
            request_id: request.id.clone(),
            subdomain: request.subdomain.clone(),
            status,
            message,
            step_reached: step_reached.to_string(),
            port,
            s3_url,
            finished_at: Utc::now(),
        }
    }

    pub fn success(request: &DeployRequest, step_reached: &str) -> Self {
        Self::new(
            request,
            OutcomeStatus::Success,
            "Deployed".to_string(),
            step_reached,
        )
    }

    pub fn failed(request: &DeployRequest, step: &str, reason: impl Into<String>) -> Self {
        Self::new(request, OutcomeStatus::Failed, reason.into(), step)
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
