//! TLS certificate issuance

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::deploy::command::{self, CommandOutput};
use crate::deploy::retry::{retry, RetryPolicy};
use crate::errors::CollaboratorError;
use crate::storage::settings::CertbotSettings;

/// Obtains certificates for public host names
#[async_trait]
pub trait CertIssuer: Send + Sync {
    /// Whether a certificate for `subdomain` exists and is not about to expire
    async fn certificate_valid(&self, subdomain: &str) -> bool;

    /// Obtain and install a certificate for `subdomain`
    async fn issue(&self, subdomain: &str) -> Result<(), CollaboratorError>;
}

const RATE_LIMIT_MARKERS: [&str; 2] = ["too many certificates", "rate limit"];

/// Map a failed certbot run onto a collaborator error
pub fn classify_failure(output: &CommandOutput, program: &Path) -> CollaboratorError {
    let text = output.combined().to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m)) {
        CollaboratorError::RateLimited(output.describe(program))
    } else {
        CollaboratorError::Transient(output.describe(program))
    }
}

/// certbot with the nginx installer plugin
pub struct Certbot {
    binary: PathBuf,
    openssl: PathBuf,
    email: Option<String>,
    live_dir: PathBuf,
    renew_before: Duration,
    retry: RetryPolicy,
}

impl Certbot {
    pub fn new(settings: &CertbotSettings, retry: RetryPolicy) -> Self {
        Self {
            binary: PathBuf::from(&settings.binary),
            openssl: PathBuf::from("openssl"),
            email: settings.email.clone(),
            live_dir: settings.live_dir.clone(),
            renew_before: settings.renew_before,
            retry,
        }
    }

    pub fn certificate_path(&self, subdomain: &str) -> PathBuf {
        self.live_dir.join(subdomain).join("fullchain.pem")
    }

    /// Contact address for the ACME account, `admin@<subdomain>` if unset
    pub fn contact_email(&self, subdomain: &str) -> String {
        self.email
            .clone()
            .unwrap_or_else(|| format!("admin@{}", subdomain))
    }

    pub fn issue_args(&self, subdomain: &str) -> Vec<String> {
        vec![
            "--nginx".to_string(),
            "-d".to_string(),
            subdomain.to_string(),
            "--non-interactive".to_string(),
            "--agree-tos".to_string(),
            "-m".to_string(),
            self.contact_email(subdomain),
        ]
    }
}

#[async_trait]
impl CertIssuer for Certbot {
    async fn certificate_valid(&self, subdomain: &str) -> bool {
        let cert = self.certificate_path(subdomain);
        if !tokio::fs::try_exists(&cert).await.unwrap_or(false) {
            return false;
        }

        let seconds = self.renew_before.as_secs().to_string();
        let cert_arg = cert.to_string_lossy();
        let args = ["x509", "-checkend", seconds.as_str(), "-noout", "-in", cert_arg.as_ref()];
        match command::run(&self.openssl, &args).await {
            Ok(output) => {
                debug!(
                    "Certificate {} checkend {}s: {}",
                    cert.display(),
                    seconds,
                    output.success
                );
                output.success
            }
            Err(e) => {
                warn!("Could not inspect certificate {}: {}", cert.display(), e);
                false
            }
        }
    }

    async fn issue(&self, subdomain: &str) -> Result<(), CollaboratorError> {
        info!("Requesting TLS certificate for {}", subdomain);

        let args = self.issue_args(subdomain);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let (binary, args) = (self.binary.as_path(), args.as_slice());

        retry(&self.retry, "certbot", move || async move {
            let output = command::run(binary, args).await?;
            if output.success {
                Ok(())
            } else {
                Err(classify_failure(&output, binary))
            }
        })
        .await?;

        info!("TLS certificate issued for {}", subdomain);
        Ok(())
    }
}
