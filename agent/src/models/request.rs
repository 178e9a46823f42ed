//! Deploy request models

use serde::{Deserialize, Serialize};

/// Where the proxy should send traffic for a subdomain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "project_type", rename_all = "lowercase")]
pub enum ProjectTarget {
    /// Static site served from an object store origin
    Static { s3_url: String },

    /// Application listening on a local port
    Dynamic { port: u16 },
}

impl ProjectTarget {
    /// Upstream the reverse proxy forwards to
    pub fn routing_target(&self) -> String {
        match self {
            ProjectTarget::Static { s3_url } => s3_url.clone(),
            ProjectTarget::Dynamic { port } => format!("http://localhost:{}", port),
        }
    }

    pub fn project_type(&self) -> &'static str {
        match self {
            ProjectTarget::Static { .. } => "static",
            ProjectTarget::Dynamic { .. } => "dynamic",
        }
    }
}

/// A validated deploy request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Globally unique, opaque; the dedup key
    pub id: String,

    /// Fully qualified host name to publish
    pub subdomain: String,

    #[serde(flatten)]
    pub target: ProjectTarget,
}

/// One raw record from the queue file, not yet validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueEntry(pub serde_json::Value);

impl QueueEntry {
    fn str_field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_str())
    }

    /// The request id, if the record carries a string one
    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    /// The subdomain, if present; only used for log context
    pub fn subdomain(&self) -> Option<&str> {
        self.str_field("subdomain")
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }
}

impl From<serde_json::Value> for QueueEntry {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}
