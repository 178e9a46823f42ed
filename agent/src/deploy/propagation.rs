//! DNS propagation check

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::deploy::retry::{retry, RetryPolicy};
use crate::errors::CollaboratorError;

/// Resolves host names to addresses
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, CollaboratorError>;
}

/// Resolver backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, CollaboratorError> {
        let addrs = tokio::net::lookup_host((host, 80))
            .await
            .map_err(|e| CollaboratorError::Transient(format!("lookup {} failed: {}", host, e)))?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Poll `resolver` until `host` resolves to `expected`.
///
/// An answer without `expected` and a failed lookup are both transient, so
/// the policy bounds how long to wait.
pub async fn wait_for_propagation(
    resolver: &dyn DnsResolver,
    host: &str,
    expected: IpAddr,
    policy: &RetryPolicy,
) -> Result<(), CollaboratorError> {
    retry(policy, "DNS propagation check", move || async move {
        let answers = resolver.resolve(host).await?;
        debug!("{} resolves to {:?}", host, answers);
        if answers.contains(&expected) {
            Ok(())
        } else {
            Err(CollaboratorError::Transient(format!(
                "{} does not resolve to {} yet (got {:?})",
                host, expected, answers
            )))
        }
    })
    .await?;

    info!("DNS for {} points at {}", host, expected);
    Ok(())
}
