//! Agent settings, read from the environment
//!
//! A `.env` file in the working directory is loaded first (see `main.rs`), so
//! both work. Missing mandatory values are reported all at once.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::errors::AgentError;
use crate::logs::LogLevel;
use crate::storage::ledger::DEFAULT_LEDGER_CAP;
use crate::storage::layout::StorageLayout;

/// Agent settings
#[derive(Debug)]
pub struct Settings {
    /// Log level
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    pub log_json: bool,

    /// Optional directory for daily rolling log files
    pub log_dir: Option<PathBuf>,

    /// Queue, ledger and response log paths
    pub storage: StorageLayout,

    /// Maximum number of ids kept in the ledger
    pub ledger_cap: usize,

    /// Public IP the DNS records point at
    pub public_ip: IpAddr,

    /// Suffix every static-site subdomain must carry
    pub static_suffix: String,

    /// Debounce window for queue change notifications
    pub debounce: Duration,

    /// DNS provider settings
    pub dns: DnsSettings,

    /// Reverse proxy settings
    pub nginx: NginxSettings,

    /// Certificate issuance settings
    pub certbot: CertbotSettings,

    /// Control plane status endpoint
    pub status: StatusSettings,

    /// Collaborator retry bounds
    pub retry: RetrySettings,
}

/// DNS provider (Hostinger) settings
#[derive(Debug)]
pub struct DnsSettings {
    pub api_url: Url,
    pub api_token: SecretString,
    pub ttl: u32,
}

/// nginx settings
#[derive(Debug, Clone)]
pub struct NginxSettings {
    pub binary: String,
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
}

/// certbot settings
#[derive(Debug, Clone)]
pub struct CertbotSettings {
    pub binary: String,
    /// Registration email; defaults to `admin@<subdomain>`
    pub email: Option<String>,
    pub live_dir: PathBuf,
    /// A certificate expiring sooner than this is treated as missing
    pub renew_before: Duration,
}

/// Control plane status endpoint
#[derive(Debug, Clone)]
pub struct StatusSettings {
    pub endpoint: Url,
    pub timeout: Duration,
}

/// Retry bounds shared by the collaborators
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub propagation_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            propagation_attempts: 10,
        }
    }
}

/// Collects values and every problem found while reading them
struct Reader<F> {
    lookup: F,
    missing: Vec<&'static str>,
    invalid: Vec<String>,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, key: &'static str) -> Option<String> {
        let value = self.optional(key);
        if value.is_none() {
            self.missing.push(key);
        }
        value
    }

    fn parse_or<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(value) => value,
                Err(e) => {
                    self.invalid.push(format!("{}={:?}: {}", key, raw, e));
                    default
                }
            },
        }
    }

    fn bool_or(&mut self, key: &str, default: bool) -> bool {
        match self.optional(key).map(|v| v.to_ascii_lowercase()) {
            None => default,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            Some(v) => {
                self.invalid.push(format!("{}={:?}: expected a boolean", key, v));
                default
            }
        }
    }

    fn url(&mut self, key: &str, raw: &str) -> Option<Url> {
        match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(e) => {
                self.invalid.push(format!("{}={:?}: {}", key, raw, e));
                None
            }
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut r = Reader {
            lookup,
            missing: Vec::new(),
            invalid: Vec::new(),
        };

        let queue_file = r.required("AUTOSHIP_QUEUE_FILE");
        let ledger_file = r.required("AUTOSHIP_LEDGER_FILE");
        let public_ip = r.required("EC2_PUBLIC_IP");
        let api_token = r.required("HOSTINGER_API_TOKEN");
        let status_host = r.required("GO_APP_HOST");
        let status_port = r.required("GO_APP_PORT");

        let public_ip = public_ip.and_then(|raw| match raw.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(e) => {
                r.invalid.push(format!("EC2_PUBLIC_IP={:?}: {}", raw, e));
                None
            }
        });

        let status_endpoint = match (status_host, status_port) {
            (Some(host), Some(port)) => match port.parse::<u16>() {
                Ok(port) => r.url(
                    "GO_APP_HOST",
                    &format!("http://{}:{}/api/deployment-status", host, port),
                ),
                Err(e) => {
                    r.invalid.push(format!("GO_APP_PORT={:?}: {}", port, e));
                    None
                }
            },
            _ => None,
        };

        let api_url_raw = r
            .optional("HOSTINGER_API_URL")
            .unwrap_or_else(|| "https://api.hostinger.com/v1".to_string());
        let api_url = r.url("HOSTINGER_API_URL", &api_url_raw);

        let log_level = r.parse_or("AUTOSHIP_LOG_LEVEL", LogLevel::Info);
        let log_json = r.bool_or("AUTOSHIP_LOG_JSON", false);
        let log_dir = r.optional("AUTOSHIP_LOG_DIR").map(PathBuf::from);
        let response_file = r.optional("AUTOSHIP_RESPONSE_FILE").map(PathBuf::from);
        let ledger_cap = r.parse_or("AUTOSHIP_LEDGER_CAP", DEFAULT_LEDGER_CAP);
        let static_suffix = r
            .optional("AUTOSHIP_STATIC_SUFFIX")
            .unwrap_or_else(|| ".site".to_string());
        let debounce = millis(r.parse_or("AUTOSHIP_DEBOUNCE_MS", 500));
        let ttl = r.parse_or("HOSTINGER_DNS_TTL", 300);

        let defaults = RetrySettings::default();
        let retry = RetrySettings {
            attempts: r.parse_or("AUTOSHIP_RETRY_ATTEMPTS", defaults.attempts),
            base_delay: millis(r.parse_or("AUTOSHIP_RETRY_BASE_MS", 1000)),
            max_delay: millis(r.parse_or("AUTOSHIP_RETRY_MAX_MS", 30_000)),
            propagation_attempts: r.parse_or(
                "AUTOSHIP_PROPAGATION_ATTEMPTS",
                defaults.propagation_attempts,
            ),
        };
        let status_timeout = Duration::from_secs(r.parse_or("AUTOSHIP_STATUS_TIMEOUT_SECS", 10));

        let nginx = NginxSettings {
            binary: r
                .optional("NGINX_BIN")
                .unwrap_or_else(|| "nginx".to_string()),
            sites_available: r
                .optional("NGINX_SITES_AVAILABLE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/etc/nginx/sites-available")),
            sites_enabled: r
                .optional("NGINX_SITES_ENABLED")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/etc/nginx/sites-enabled")),
        };

        let mut certbot = CertbotSettings {
            binary: r
                .optional("CERTBOT_BIN")
                .unwrap_or_else(|| "certbot".to_string()),
            email: r.optional("CERTBOT_EMAIL"),
            live_dir: r
                .optional("LETSENCRYPT_LIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/etc/letsencrypt/live")),
            renew_before: Duration::ZERO,
        };
        let renew_days = r.parse_or::<u64>("CERTBOT_RENEW_BEFORE_DAYS", 7);
        match renew_days.checked_mul(24 * 3600) {
            Some(secs) => certbot.renew_before = Duration::from_secs(secs),
            None => r.invalid.push(format!(
                "CERTBOT_RENEW_BEFORE_DAYS={}: too large",
                renew_days
            )),
        }

        if ledger_cap == 0 {
            r.invalid
                .push("AUTOSHIP_LEDGER_CAP must be at least 1".to_string());
        }
        if retry.attempts == 0 {
            r.invalid
                .push("AUTOSHIP_RETRY_ATTEMPTS must be at least 1".to_string());
        }

        let mut problems = Vec::new();
        if !r.missing.is_empty() {
            problems.push(format!("missing {}", r.missing.join(", ")));
        }
        problems.extend(r.invalid);
        if !problems.is_empty() {
            return Err(AgentError::ConfigError(problems.join("; ")));
        }

        // All Options below are Some: any None was recorded as a problem above
        match (
            queue_file,
            ledger_file,
            public_ip,
            api_token,
            status_endpoint,
            api_url,
        ) {
            (
                Some(queue_file),
                Some(ledger_file),
                Some(public_ip),
                Some(api_token),
                Some(endpoint),
                Some(api_url),
            ) => Ok(Self {
                log_level,
                log_json,
                log_dir,
                storage: StorageLayout::new(queue_file, ledger_file, response_file),
                ledger_cap,
                public_ip,
                static_suffix,
                debounce,
                dns: DnsSettings {
                    api_url,
                    api_token: SecretString::from(api_token),
                    ttl,
                },
                nginx,
                certbot,
                status: StatusSettings {
                    endpoint,
                    timeout: status_timeout,
                },
                retry,
            }),
            _ => Err(AgentError::ConfigError(
                "incomplete configuration".to_string(),
            )),
        }
    }

    /// Human readable view of the resolved settings, secrets redacted
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let opt_path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        vec![
            ("queue file", self.storage.queue_file.display().to_string()),
            ("ledger file", self.storage.ledger_file.display().to_string()),
            ("response log", opt_path(&self.storage.response_file)),
            ("ledger cap", self.ledger_cap.to_string()),
            ("public ip", self.public_ip.to_string()),
            ("static suffix", self.static_suffix.clone()),
            ("debounce", format!("{:?}", self.debounce)),
            ("dns api", self.dns.api_url.to_string()),
            ("dns token", "<redacted>".to_string()),
            (
                "nginx sites",
                format!(
                    "{} -> {}",
                    self.nginx.sites_available.display(),
                    self.nginx.sites_enabled.display()
                ),
            ),
            ("letsencrypt", self.certbot.live_dir.display().to_string()),
            ("status endpoint", self.status.endpoint.to_string()),
            (
                "retries",
                format!(
                    "{} attempts, {:?}..{:?}, {} propagation checks",
                    self.retry.attempts,
                    self.retry.base_delay,
                    self.retry.max_delay,
                    self.retry.propagation_attempts
                ),
            ),
            ("log level", self.log_level.to_filter_string().to_string()),
            ("log dir", opt_path(&self.log_dir)),
        ]
    }
}
