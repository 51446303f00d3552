use crate::model::ChallengeDefinition;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    definition: ChallengeDefinition,
    inserted_at: Instant,
}

/// TTL-bounded in-memory cache of challenge definitions.
///
/// Expiry is passive: an entry older than the TTL is treated as absent on read.
/// `purge_expired` drops such entries eagerly and is driven by the maintenance task.
#[derive(Debug)]
pub struct ConfigCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Return the cached definition if it is younger than the TTL
    pub fn get_fresh(&self, challenge_id: &str) -> Option<ChallengeDefinition> {
        let entry = self.entries.get(challenge_id)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.definition.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, definition: ChallengeDefinition) {
        self.entries.insert(
            definition.id.clone(),
            CacheEntry {
                definition,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, challenge_id: &str) {
        self.entries.remove(challenge_id);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }
}
