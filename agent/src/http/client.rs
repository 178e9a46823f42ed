//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use crate::errors::{AgentError, CollaboratorError};

/// Thin JSON client bound to one base URL
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Default mapping of a non-2xx reply onto collaborator errors
    pub fn into_error(self, what: &str) -> CollaboratorError {
        let message = format!("{} returned {}: {}", what, self.status, self.body.trim());
        if self.status == StatusCode::TOO_MANY_REQUESTS {
            CollaboratorError::RateLimited(message)
        } else if self.status.is_server_error() || self.status == StatusCode::REQUEST_TIMEOUT {
            CollaboratorError::Transient(message)
        } else {
            CollaboratorError::Rejected(message)
        }
    }
}

impl HttpClient {
    /// Create a new HTTP client with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body. Transport failures are transient; any HTTP status
    /// comes back as an [`HttpReply`] for the caller to interpret.
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        token: Option<&SecretString>,
        body: &B,
    ) -> Result<HttpReply, CollaboratorError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("POST {} -> {}", url, status);

        Ok(HttpReply { status, body })
    }
}
