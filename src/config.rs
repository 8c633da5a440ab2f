use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";
const DEFAULT_CACHE_TTL_SECS: u64 = 600; // 10 minutes
const DEFAULT_CACHE_CAPACITY: u64 = 1024;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// `@scope` → registry base URL, for packages published to a private registry.
    #[serde(default)]
    pub scoped_registries: HashMap<String, String>,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_owned()
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_backoff() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            scoped_registries: HashMap::new(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl ServerConfig {
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_options_keep_defaults() {
        let config = ServerConfig::from_value(json!({
            "registry_url": "http://localhost:4873",
            "max_retries": 0
        }));
        assert_eq!(config.registry_url, "http://localhost:4873");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.cache_ttl_secs, DEFAULT_CACHE_TTL_SECS);
        assert!(config.scoped_registries.is_empty());
    }

    #[test]
    fn test_invalid_options_fall_back_to_default() {
        let config = ServerConfig::from_value(json!({ "cache_ttl_secs": "soon" }));
        assert_eq!(config.cache_ttl(), Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
        assert_eq!(config.registry_url, DEFAULT_REGISTRY_URL);
    }

    #[test]
    fn test_scoped_registries() {
        let config = ServerConfig::from_value(json!({
            "scoped_registries": { "@acme": "https://npm.acme.test" }
        }));
        assert_eq!(
            config.scoped_registries.get("@acme").map(String::as_str),
            Some("https://npm.acme.test")
        );
    }
}
