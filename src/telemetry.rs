use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub deployments: AtomicU64,
    pub deployment_failures: AtomicU64,
    pub teardowns: AtomicU64,
    pub active_deployments: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub repository_reads: AtomicU64,
    pub reaped: AtomicU64,
}

/// Point-in-time copy of the counters, served on the health endpoint
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub deployments: u64,
    pub deployment_failures: u64,
    pub teardowns: u64,
    pub active_deployments: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub repository_reads: u64,
    pub reaped: u64,
}

impl Metrics {
    pub fn record_deployment(&self) {
        self.deployments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.deployment_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_active_deployments(&self) {
        self.active_deployments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_active_deployments(&self) {
        // never wrap below zero when a recovered record is torn down twice
        let _ = self
            .active_deployments
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repository_read(&self) {
        self.repository_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reaped(&self) {
        self.reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deployments: self.deployments.load(Ordering::Relaxed),
            deployment_failures: self.deployment_failures.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            active_deployments: self.active_deployments.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            repository_reads: self.repository_reads.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "challenge_manager=info,tower_http=info,kube=info".into())
}

#[cfg(not(debug_assertions))]
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .init();
}

#[cfg(debug_assertions)]
pub fn init() {
    tracing_subscriber::fmt()
        .pretty()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(env_filter())
        .init();
}
