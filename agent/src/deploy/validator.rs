//! Structural and safety validation of queue records
//!
//! Values from the queue end up in file paths, nginx config and subprocess
//! arguments, so the host-name grammar is deliberately narrow.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::errors::ValidationError;
use crate::models::request::{DeployRequest, ProjectTarget, QueueEntry};

fn host_name_grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-.]*[A-Za-z0-9]$").expect("host name grammar compiles")
    })
}

/// Check one identifier-like value (`id`, `subdomain`) against the grammar
pub fn check_safe_name(field: &'static str, value: Option<&Value>) -> Result<String, ValidationError> {
    let value = match value {
        None | Some(Value::Null) => return Err(ValidationError::new(field, "missing")),
        Some(Value::String(s)) => s,
        Some(other) => {
            return Err(ValidationError::new(
                field,
                format!("must be a string, got {}", other),
            ))
        }
    };

    if value.is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    if value.contains("..") || value.contains('/') || value.contains(';') {
        return Err(ValidationError::new(field, "contains unsafe characters"));
    }
    if !host_name_grammar().is_match(value) {
        return Err(ValidationError::new(field, "contains invalid characters"));
    }
    Ok(value.clone())
}

/// Validates queue records into [`DeployRequest`]s
#[derive(Debug, Clone)]
pub struct Validator {
    static_suffix: String,
}

impl Validator {
    /// `static_suffix` is the domain suffix reserved for static sites
    pub fn new(static_suffix: impl Into<String>) -> Self {
        Self {
            static_suffix: static_suffix.into(),
        }
    }

    /// Rules run in order and stop at the first failure
    pub fn validate(&self, entry: &QueueEntry) -> Result<DeployRequest, ValidationError> {
        if !entry.0.is_object() {
            return Err(ValidationError::new("request", "must be a JSON object"));
        }

        let id = check_safe_name("id", entry.get("id"))?;
        let subdomain = check_safe_name("subdomain", entry.get("subdomain"))?;

        let target = match entry.get("project_type").and_then(Value::as_str) {
            Some("dynamic") => ProjectTarget::Dynamic {
                port: parse_port(entry.get("port"))?,
            },
            Some("static") => {
                let s3_url = parse_s3_url(entry.get("s3_url"))?;
                if !subdomain.ends_with(&self.static_suffix) {
                    return Err(ValidationError::new(
                        "subdomain",
                        format!("static sites must end with {}", self.static_suffix),
                    ));
                }
                ProjectTarget::Static { s3_url }
            }
            _ => {
                return Err(ValidationError::new(
                    "project_type",
                    "must be \"static\" or \"dynamic\"",
                ))
            }
        };

        Ok(DeployRequest {
            id,
            subdomain,
            target,
        })
    }
}

/// The URL lands verbatim in a `proxy_pass` directive, so anything that
/// could end the directive or open a block is refused.
fn parse_s3_url(value: Option<&Value>) -> Result<String, ValidationError> {
    let raw = match value {
        Some(Value::String(url)) if !url.trim().is_empty() => url,
        _ => {
            return Err(ValidationError::new(
                "s3_url",
                "static projects need a non-empty s3_url",
            ))
        }
    };

    let unsafe_char =
        |c: char| c.is_whitespace() || c.is_control() || matches!(c, ';' | '{' | '}' | '\'' | '"');
    if raw.chars().any(unsafe_char) {
        return Err(ValidationError::new("s3_url", "contains unsafe characters"));
    }

    let url = Url::parse(raw)
        .map_err(|e| ValidationError::new("s3_url", format!("not a valid URL: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ValidationError::new(
            "s3_url",
            "must be an http or https URL with a host",
        ));
    }
    Ok(raw.clone())
}

fn parse_port(value: Option<&Value>) -> Result<u16, ValidationError> {
    let port = value
        .and_then(Value::as_u64)
        .ok_or_else(|| ValidationError::new("port", "dynamic projects need an integer port"))?;

    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ValidationError::new(
            "port",
            format!("{} is not a valid TCP port", port),
        )),
    }
}
