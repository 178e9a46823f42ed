//! Reverse proxy configuration

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::deploy::command;
use crate::deploy::retry::{retry, RetryPolicy};
use crate::errors::CollaboratorError;
use crate::models::request::ProjectTarget;
use crate::storage::settings::NginxSettings;

/// Routes a public host name to a deployment target
#[async_trait]
pub trait ProxyConfigurator: Send + Sync {
    /// Write (or overwrite) and enable the site for `subdomain`
    async fn write_config(
        &self,
        subdomain: &str,
        target: &ProjectTarget,
    ) -> Result<(), CollaboratorError>;

    /// Check the full proxy configuration without applying it
    async fn validate_config(&self) -> Result<(), CollaboratorError>;

    /// Apply the configuration to the running proxy
    async fn reload(&self) -> Result<(), CollaboratorError>;
}

/// Render the nginx server block for one site
pub fn render_site(subdomain: &str, target: &ProjectTarget) -> String {
    let location = match target {
        ProjectTarget::Dynamic { .. } => format!(
            "        proxy_pass {};\n\
             \x20       proxy_http_version 1.1;\n\
             \x20       proxy_set_header Upgrade $http_upgrade;\n\
             \x20       proxy_set_header Connection 'upgrade';\n\
             \x20       proxy_set_header Host $host;\n\
             \x20       proxy_cache_bypass $http_upgrade;\n",
            target.routing_target()
        ),
        ProjectTarget::Static { .. } => {
            format!("        proxy_pass {};\n", target.routing_target())
        }
    };

    format!(
        "server {{\n    listen 80;\n    server_name {};\n\n    location / {{\n{}    }}\n}}\n",
        subdomain, location
    )
}

/// nginx with Debian style sites-available / sites-enabled directories
pub struct NginxConfigurator {
    binary: PathBuf,
    sites_available: PathBuf,
    sites_enabled: PathBuf,
    retry: RetryPolicy,
}

impl NginxConfigurator {
    pub fn new(settings: &NginxSettings, retry: RetryPolicy) -> Self {
        Self {
            binary: PathBuf::from(&settings.binary),
            sites_available: settings.sites_available.clone(),
            sites_enabled: settings.sites_enabled.clone(),
            retry,
        }
    }

    pub fn site_path(&self, subdomain: &str) -> PathBuf {
        self.sites_available.join(subdomain)
    }

    pub fn enabled_path(&self, subdomain: &str) -> PathBuf {
        self.sites_enabled.join(subdomain)
    }

    async fn write_site(&self, subdomain: &str, contents: &str) -> io::Result<()> {
        let site = self.site_path(subdomain);
        let temp = self.sites_available.join(format!(".{}.tmp", subdomain));

        tokio::fs::create_dir_all(&self.sites_available).await?;
        tokio::fs::write(&temp, contents).await?;
        tokio::fs::rename(&temp, &site).await?;

        tokio::fs::create_dir_all(&self.sites_enabled).await?;
        enable_site(&site, &self.enabled_path(subdomain)).await
    }
}

#[cfg(unix)]
async fn enable_site(site: &Path, link: &Path) -> io::Result<()> {
    match tokio::fs::symlink_metadata(link).await {
        Ok(_) => tokio::fs::remove_file(link).await?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::symlink(site, link).await
}

#[cfg(not(unix))]
async fn enable_site(site: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::copy(site, link).await.map(|_| ())
}

#[async_trait]
impl ProxyConfigurator for NginxConfigurator {
    async fn write_config(
        &self,
        subdomain: &str,
        target: &ProjectTarget,
    ) -> Result<(), CollaboratorError> {
        let contents = render_site(subdomain, target);
        let contents = contents.as_str();
        retry(&self.retry, "nginx site write", move || async move {
            self.write_site(subdomain, contents)
                .await
                .map_err(CollaboratorError::from)
        })
        .await?;

        info!(
            "nginx site for {} -> {} written to {}",
            subdomain,
            target.routing_target(),
            self.site_path(subdomain).display()
        );
        Ok(())
    }

    async fn validate_config(&self) -> Result<(), CollaboratorError> {
        let output = command::run(&self.binary, &["-t"]).await?;
        if output.success {
            debug!("nginx configuration test passed");
            Ok(())
        } else {
            Err(CollaboratorError::Rejected(output.describe(&self.binary)))
        }
    }

    async fn reload(&self) -> Result<(), CollaboratorError> {
        let binary = self.binary.as_path();
        retry(&self.retry, "nginx reload", move || async move {
            let output = command::run(binary, &["-s", "reload"]).await?;
            if output.success {
                Ok(())
            } else {
                Err(CollaboratorError::Transient(output.describe(binary)))
            }
        })
        .await?;

        info!("nginx configuration reloaded");
        Ok(())
    }
}
