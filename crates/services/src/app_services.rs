use std::sync::Arc;

use tracing::info;

use cache::{CacheFacade, CacheOptions, RedisRemote};
use storage::repository::Storage;

use crate::Clock;
use crate::aggregator::ProgressAggregator;
use crate::config::AppConfig;
use crate::error::AppServicesError;
use crate::queries::ProgressQueryService;
use crate::status::AssignmentStatusResolver;
use crate::write::ProgressWriteService;

/// Assembles the progress engine from storage, cache and configuration.
#[derive(Clone)]
pub struct AppServices {
    cache: CacheFacade,
    resolver: Arc<AssignmentStatusResolver>,
    writes: Arc<ProgressWriteService>,
    queries: Arc<ProgressQueryService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage and the configured cache.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails or the
    /// Redis URL is malformed. An unreachable Redis server is not an error.
    pub async fn from_config(config: &AppConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        let cache = build_cache(config).await?;
        Ok(Self::new(storage, cache, clock, config))
    }

    /// Wire services over already constructed collaborators.
    #[must_use]
    pub fn new(storage: Storage, cache: CacheFacade, clock: Clock, config: &AppConfig) -> Self {
        let resolver = AssignmentStatusResolver::new(
            clock,
            config.regression_policy,
            Arc::clone(&storage.assignments),
        );
        let aggregator =
            ProgressAggregator::new(Arc::clone(&storage.catalog), Arc::clone(&storage.progress));
        let writes = ProgressWriteService::new(
            clock,
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.progress),
            resolver.clone(),
            cache.clone(),
            config.cache_ttl,
        );
        let queries =
            ProgressQueryService::new(aggregator, resolver.clone(), cache.clone(), config.cache_ttl);

        Self {
            cache,
            resolver: Arc::new(resolver),
            writes: Arc::new(writes),
            queries: Arc::new(queries),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &CacheFacade {
        &self.cache
    }

    #[must_use]
    pub fn resolver(&self) -> Arc<AssignmentStatusResolver> {
        Arc::clone(&self.resolver)
    }

    #[must_use]
    pub fn writes(&self) -> Arc<ProgressWriteService> {
        Arc::clone(&self.writes)
    }

    #[must_use]
    pub fn queries(&self) -> Arc<ProgressQueryService> {
        Arc::clone(&self.queries)
    }
}

/// Local-only facade when no Redis URL is configured, otherwise a Redis
/// remote with a background health probe.
///
/// # Errors
///
/// Returns `AppServicesError::Cache` if the Redis URL cannot be parsed.
pub async fn build_cache(config: &AppConfig) -> Result<CacheFacade, AppServicesError> {
    let options = CacheOptions {
        remote_timeout: config.cache_timeout,
        fallback_max_entries: config.fallback_max_entries,
        recovery_interval: config.health_interval,
    };
    let Some(url) = config.redis_url.as_deref() else {
        info!("no remote cache configured, running with the local fallback store only");
        return Ok(CacheFacade::local_only(options));
    };

    let remote = RedisRemote::open(url, &config.cache_prefix)?;
    let cache = CacheFacade::connect(remote.clone(), options).await;
    // started after the initial ping so a healthy start does not emit a stray Reconnecting
    remote.spawn_health_probe(config.health_interval, config.cache_timeout);
    Ok(cache)
}
