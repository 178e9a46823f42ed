//! Finite state machine for one provisioning workflow

use std::fmt;

use serde::{Deserialize, Serialize};

/// A provisioning step, i.e. the transition out of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStep {
    ProxyConfig,
    DnsRecord,
    DnsPropagation,
    Certificate,
    ProxyReload,
    Report,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::ProxyConfig => "proxy-config",
            WorkflowStep::DnsRecord => "dns-record",
            WorkflowStep::DnsPropagation => "dns-propagation",
            WorkflowStep::Certificate => "certificate",
            WorkflowStep::ProxyReload => "proxy-reload",
            WorkflowStep::Report => "report",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowState {
    /// Request passed validation, nothing done yet
    Validated,

    /// Proxy site config written
    ProxyConfigured,

    /// A record upserted
    DnsRecordCreated,

    /// Public IP visible through the resolver
    DnsPropagated,

    /// Valid certificate in place
    CertificateIssued,

    /// Proxy validated and reloaded
    ProxyReloaded,

    /// Success reported; terminal
    Reported,

    /// Absorbing failure state
    Failed { step: WorkflowStep, reason: String },
}

impl WorkflowState {
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowState::Validated => "validated",
            WorkflowState::ProxyConfigured => "proxy-configured",
            WorkflowState::DnsRecordCreated => "dns-record-created",
            WorkflowState::DnsPropagated => "dns-propagated",
            WorkflowState::CertificateIssued => "certificate-issued",
            WorkflowState::ProxyReloaded => "proxy-reloaded",
            WorkflowState::Reported => "reported",
            WorkflowState::Failed { step, .. } => step.as_str(),
        }
    }
}

/// Workflow event
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    ProxyConfigured,
    DnsRecordCreated,
    DnsPropagated,
    CertificateIssued,
    ProxyReloaded,
    Reported,

    /// The pending step failed after its own retries
    StepFailed(String),
}

/// Workflow FSM
#[derive(Debug, Clone)]
pub struct WorkflowFsm {
    state: WorkflowState,
}

impl WorkflowFsm {
    /// Create a new FSM for a freshly validated request
    pub fn new() -> Self {
        Self {
            state: WorkflowState::Validated,
        }
    }

    /// Get current state
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Step that would move the workflow forward, if any
    pub fn next_step(&self) -> Option<WorkflowStep> {
        match self.state {
            WorkflowState::Validated => Some(WorkflowStep::ProxyConfig),
            WorkflowState::ProxyConfigured => Some(WorkflowStep::DnsRecord),
            WorkflowState::DnsRecordCreated => Some(WorkflowStep::DnsPropagation),
            WorkflowState::DnsPropagated => Some(WorkflowStep::Certificate),
            WorkflowState::CertificateIssued => Some(WorkflowStep::ProxyReload),
            WorkflowState::ProxyReloaded => Some(WorkflowStep::Report),
            WorkflowState::Reported | WorkflowState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_step().is_none()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, WorkflowState::Failed { .. })
    }

    /// Error message if failed
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            WorkflowState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: WorkflowEvent) -> Result<(), String> {
        let new_state = match (&self.state, event) {
            (WorkflowState::Validated, WorkflowEvent::ProxyConfigured) => {
                WorkflowState::ProxyConfigured
            }
            (WorkflowState::ProxyConfigured, WorkflowEvent::DnsRecordCreated) => {
                WorkflowState::DnsRecordCreated
            }
            (WorkflowState::DnsRecordCreated, WorkflowEvent::DnsPropagated) => {
                WorkflowState::DnsPropagated
            }
            (WorkflowState::DnsPropagated, WorkflowEvent::CertificateIssued) => {
                WorkflowState::CertificateIssued
            }
            (WorkflowState::CertificateIssued, WorkflowEvent::ProxyReloaded) => {
                WorkflowState::ProxyReloaded
            }
            (WorkflowState::ProxyReloaded, WorkflowEvent::Reported) => WorkflowState::Reported,

            // Any pending step may fail
            (state, WorkflowEvent::StepFailed(reason)) if !self.is_terminal() => {
                let step = self.next_step().ok_or_else(|| {
                    format!("Invalid transition: {:?} cannot fail", state)
                })?;
                WorkflowState::Failed { step, reason }
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for WorkflowFsm {
    fn default() -> Self {
        Self::new()
    }
}
