use super::error::RegistryError;
use crate::config::ServerConfig;
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
/// Abbreviated metadata is much smaller than the full packument and still carries `dist-tags`.
const ACCEPT: &str = "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8";
const MAX_NAME_LEN: usize = 214;

/// Source of published version information.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Return the `latest` dist-tag version for `name`.
    async fn fetch_latest_version(&self, name: &str) -> Result<String, RegistryError>;
}

/// HTTP client for npm-compatible registries.
pub struct NpmRegistry {
    client: reqwest::Client,
    default_registry: String,
    scoped_registries: HashMap<String, String>,
    max_retries: u32,
    backoff: Duration,
}

impl NpmRegistry {
    pub fn new(config: &ServerConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RegistryError::Client(e.to_string()))?;

        let scoped_registries = config
            .scoped_registries
            .iter()
            .map(|(scope, url)| (scope.clone(), url.trim_end_matches('/').to_owned()))
            .collect();

        Ok(Self {
            client,
            default_registry: config.registry_url.trim_end_matches('/').to_owned(),
            scoped_registries,
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
        })
    }

    fn package_url(&self, name: &str) -> String {
        let registry = scope_of(name)
            .and_then(|scope| self.scoped_registries.get(scope))
            .unwrap_or(&self.default_registry);
        format!("{registry}/{}", encode_name(name))
    }

    async fn fetch_once(&self, name: &str, url: &str) -> Result<String, RegistryError> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, ACCEPT)
            .send()
            .await
            .map_err(|e| RegistryError::Transient {
                package: name.to_owned(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(name.to_owned()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(RegistryError::Transient {
                package: name.to_owned(),
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(RegistryError::Rejected {
                package: name.to_owned(),
                status: status.as_u16(),
            });
        }

        let document: PackageDocument = response.json().await.map_err(|e| {
            if e.is_decode() {
                RegistryError::InvalidResponse {
                    package: name.to_owned(),
                    message: e.to_string(),
                }
            } else {
                RegistryError::Transient {
                    package: name.to_owned(),
                    message: e.to_string(),
                }
            }
        })?;

        document
            .dist_tags
            .latest
            .ok_or_else(|| RegistryError::InvalidResponse {
                package: name.to_owned(),
                message: "missing dist-tags.latest".into(),
            })
    }
}

#[async_trait]
impl PackageRegistry for NpmRegistry {
    #[instrument(skip(self))]
    async fn fetch_latest_version(&self, name: &str) -> Result<String, RegistryError> {
        validate_package_name(name)?;

        let url = self.package_url(name);
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(name, &url).await {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = backoff_delay(self.backoff, attempt);
                    warn!("Registry lookup failed ({err}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    if let Ok(version) = &result {
                        debug!("Latest version of {name} is {version}");
                    }
                    return result;
                }
            }
        }
    }
}

/// Delay before retry number `attempt + 1`: the base doubled once per earlier retry.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Only `dist-tags.latest` is read; everything else in the document is skipped.
#[derive(Deserialize)]
struct PackageDocument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: DistTags,
}

#[derive(Deserialize, Default)]
struct DistTags {
    latest: Option<String>,
}

/// Reject names the registry could never serve before touching the network.
pub fn validate_package_name(name: &str) -> Result<(), RegistryError> {
    let invalid = |reason: &'static str| {
        Err(RegistryError::InvalidName {
            name: name.to_owned(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("name is longer than 214 characters");
    }
    if name.starts_with('.') || name.starts_with('_') {
        return invalid("name cannot start with '.' or '_'");
    }
    if name.contains("..") || name.contains('\\') {
        return invalid("name contains path traversal characters");
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return invalid("name contains whitespace or control characters");
    }
    if name.contains(['%', '?', '#']) {
        return invalid("name contains URL-reserved characters");
    }

    match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, package))
                if !scope.is_empty() && !package.is_empty() && !package.contains('/') =>
            {
                Ok(())
            }
            _ => invalid("scoped name must look like @scope/name"),
        },
        None if name.contains('/') => invalid("name contains '/' outside a scope"),
        None => Ok(()),
    }
}

fn scope_of(name: &str) -> Option<&str> {
    if !name.starts_with('@') {
        return None;
    }
    name.split_once('/').map(|(scope, _)| scope)
}

/// `@scope/name` → `@scope%2Fname`, the form npm registries expect in the path.
fn encode_name(name: &str) -> String {
    match name.strip_prefix('@') {
        Some(rest) => format!("@{}", urlencoding::encode(rest)),
        None => urlencoding::encode(name).into_owned(),
    }
}
