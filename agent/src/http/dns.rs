//! DNS provider client

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

use crate::deploy::retry::{retry, RetryPolicy};
use crate::errors::{AgentError, CollaboratorError};
use crate::http::client::HttpClient;
use crate::storage::settings::DnsSettings;

/// Creates the A record that points a subdomain at this host
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or update the A record. "Already correct" counts as success.
    async fn upsert(&self, subdomain: &str, ip: IpAddr) -> Result<(), CollaboratorError>;
}

/// Split an FQDN into (zone, record name).
///
/// `"app.example.com"` -> `("example.com", "app")`. Hosts without a label
/// below the zone have nothing to create and are rejected.
pub fn split_domain(fqdn: &str) -> Result<(String, String), CollaboratorError> {
    let parts: Vec<&str> = fqdn.trim_end_matches('.').split('.').collect();
    if parts.len() < 3 {
        return Err(CollaboratorError::Rejected(format!(
            "{} must be in the form sub.domain.tld",
            fqdn
        )));
    }
    let zone = parts[parts.len() - 2..].join(".");
    let name = parts[..parts.len() - 2].join(".");
    Ok((zone, name))
}

#[derive(Debug, Serialize)]
struct RecordPayload<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    value: String,
    ttl: u32,
}

/// Hostinger DNS REST API
pub struct HostingerDns {
    http: HttpClient,
    token: SecretString,
    ttl: u32,
    retry: RetryPolicy,
}

impl HostingerDns {
    pub fn new(settings: &DnsSettings, retry: RetryPolicy) -> Result<Self, AgentError> {
        Ok(Self {
            http: HttpClient::new(settings.api_url.as_str(), Duration::from_secs(30))?,
            token: SecretString::from(settings.api_token.expose_secret()),
            ttl: settings.ttl,
            retry,
        })
    }

    async fn create_record(
        &self,
        zone: &str,
        name: &str,
        ip: IpAddr,
    ) -> Result<(), CollaboratorError> {
        let payload = RecordPayload {
            record_type: if ip.is_ipv4() { "A" } else { "AAAA" },
            name,
            value: ip.to_string(),
            ttl: self.ttl,
        };
        let path = format!("/domains/{}/records", zone);
        let reply = self.http.post(&path, Some(&self.token), &payload).await?;

        match reply.status {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Ok(()),
            StatusCode::UNPROCESSABLE_ENTITY if reply.body.to_lowercase().contains("exist") => {
                Ok(())
            }
            _ => Err(reply.into_error("DNS API")),
        }
    }
}

#[async_trait]
impl DnsProvider for HostingerDns {
    async fn upsert(&self, subdomain: &str, ip: IpAddr) -> Result<(), CollaboratorError> {
        let (zone, name) = split_domain(subdomain)?;
        info!("Adding A record for {} -> {}", subdomain, ip);

        let (zone, name) = (zone.as_str(), name.as_str());
        retry(&self.retry, "DNS record upsert", move || {
            self.create_record(zone, name, ip)
        })
        .await?;

        info!("DNS record in place for {}", subdomain);
        Ok(())
    }
}
