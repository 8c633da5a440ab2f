use super::client::PackageRegistry;
use super::error::RegistryError;
use crate::config::ServerConfig;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type LookupResult = Result<Arc<str>, RegistryError>;
type PendingLookup = Shared<BoxFuture<'static, LookupResult>>;

/// Time source for TTL checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    version: Arc<str>,
    fetched_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub version: Arc<str>,
    /// Set when the refresh failed and `version` is the last known one.
    pub refresh_error: Option<RegistryError>,
}

/// Latest-version cache with per-name single-flight lookups.
///
/// Fresh entries are returned without touching the registry. Concurrent
/// misses for the same name share one registry fetch. A failed refresh falls
/// back to the previous entry, however old.
pub struct VersionCache {
    registry: Arc<dyn PackageRegistry>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    // Expiry is judged against `clock`, not moka's TTL, so stale entries survive for fallback.
    entries: Cache<String, RegistryEntry>,
    pending: Arc<DashMap<String, PendingLookup>>,
}

impl VersionCache {
    pub fn new(registry: Arc<dyn PackageRegistry>, config: &ServerConfig) -> Self {
        Self::with_clock(registry, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        registry: Arc<dyn PackageRegistry>,
        clock: Arc<dyn Clock>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            clock,
            ttl: config.cache_ttl(),
            entries: Cache::builder()
                .max_capacity(config.cache_capacity)
                .build(),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Resolve the latest version of `name`.
    pub async fn resolve(&self, name: &str) -> Result<Resolved, RegistryError> {
        if let Some(entry) = self.entries.get(name).await {
            if self.is_fresh(&entry) {
                return Ok(Resolved {
                    version: entry.version,
                    refresh_error: None,
                });
            }
            debug!("Cached version of {name} expired, refreshing");
        }

        match self.join_or_start(name).await {
            Ok(version) => Ok(Resolved {
                version,
                refresh_error: None,
            }),
            Err(err) => match self.entries.get(name).await {
                Some(entry) => {
                    warn!("Refresh of {name} failed ({err}), serving stale {}", entry.version);
                    Ok(Resolved {
                        version: entry.version,
                        refresh_error: Some(err),
                    })
                }
                None => Err(err),
            },
        }
    }

    fn is_fresh(&self, entry: &RegistryEntry) -> bool {
        self.clock.now().saturating_duration_since(entry.fetched_at) < self.ttl
    }

    /// Attach to the in-flight lookup for `name`, or start one.
    ///
    /// The check-and-insert happens under the map's entry lock, so at most one
    /// lookup per name is ever outstanding.
    fn join_or_start(&self, name: &str) -> PendingLookup {
        match self.pending.entry(name.to_owned()) {
            Entry::Occupied(occupied) => {
                debug!("Joining in-flight lookup for {name}");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let lookup = self.spawn_lookup(name);
                vacant.insert(lookup.clone());
                lookup
            }
        }
    }

    /// Run the registry fetch on its own task so it completes (and populates
    /// the cache) even if every waiting caller is dropped.
    fn spawn_lookup(&self, name: &str) -> PendingLookup {
        let registry = Arc::clone(&self.registry);
        let clock = Arc::clone(&self.clock);
        let entries = self.entries.clone();
        let pending = Arc::clone(&self.pending);
        let key = name.to_owned();

        let handle = tokio::spawn(async move {
            let result = registry
                .fetch_latest_version(&key)
                .await
                .map(Arc::<str>::from);

            // Store before unregistering so a caller arriving in between sees the entry.
            if let Ok(version) = &result {
                entries
                    .insert(
                        key.clone(),
                        RegistryEntry {
                            version: Arc::clone(version),
                            fetched_at: clock.now(),
                        },
                    )
                    .await;
            }
            pending.remove(&key);
            result
        });

        let pending = Arc::clone(&self.pending);
        let package = name.to_owned();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    pending.remove(&package);
                    Err(RegistryError::Transient {
                        package,
                        message: format!("lookup task failed: {join_err}"),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
impl VersionCache {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
