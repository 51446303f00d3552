use crate::{
    error::{Error, Result},
    model::ChallengeDefinition,
    single_flight::SingleFlight,
    telemetry::Metrics,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

pub mod cache;
pub mod repository;

pub use cache::ConfigCache;
pub use repository::{ChallengeRepository, InMemoryChallengeRepository, KubeChallengeRepository};

/// Read API over the configuration cache and repository.
///
/// Fresh cache hits perform no I/O. Misses and stale entries are read through
/// the repository, with concurrent lookups for the same id coalesced into one
/// repository call whose result (or error) every caller receives.
#[derive(Clone)]
pub struct ChallengeConfigStore {
    cache: Arc<ConfigCache>,
    repository: Arc<dyn ChallengeRepository>,
    flights: SingleFlight<String, ChallengeDefinition>,
    metrics: Arc<Metrics>,
}

impl ChallengeConfigStore {
    pub fn new(
        repository: Arc<dyn ChallengeRepository>,
        ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache: Arc::new(ConfigCache::new(ttl)),
            repository,
            flights: SingleFlight::new(),
            metrics,
        }
    }

    pub async fn get(&self, challenge_id: &str) -> Result<ChallengeDefinition> {
        if let Some(definition) = self.cache.get_fresh(challenge_id) {
            self.metrics.record_cache_hit();
            return Ok(definition);
        }
        self.metrics.record_cache_miss();

        let cache = Arc::clone(&self.cache);
        let repository = Arc::clone(&self.repository);
        let metrics = Arc::clone(&self.metrics);
        let id = challenge_id.to_string();
        self.flights
            .run(challenge_id.to_string(), async move {
                // a flight that just landed may already have refreshed the entry
                if let Some(definition) = cache.get_fresh(&id) {
                    return Ok(definition);
                }
                let definition = read_through(repository.as_ref(), &id, &metrics).await?;
                cache.insert(definition.clone());
                Ok(definition)
            })
            .await
    }

    pub fn invalidate(&self, challenge_id: &str) {
        self.cache.invalidate(challenge_id);
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

/// One repository read, retried once when the repository is unavailable
async fn read_through(
    repository: &dyn ChallengeRepository,
    challenge_id: &str,
    metrics: &Metrics,
) -> Result<ChallengeDefinition> {
    metrics.record_repository_read();
    match repository.read(challenge_id).await {
        Err(Error::RepositoryUnavailable(reason)) => {
            warn!(challenge_id, %reason, "Repository unavailable, retrying once");
            metrics.record_repository_read();
            repository.read(challenge_id).await
        }
        result => {
            debug!(challenge_id, ok = result.is_ok(), "Repository read");
            result
        }
    }
}
