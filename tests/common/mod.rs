//! Shared fixtures: an in-process cluster fake and a wired-up orchestrator.

#![allow(dead_code)]

use async_trait::async_trait;
use challenge_manager::{
    cluster::ClusterClient,
    date_time::DateTime,
    error::{Error, Result},
    model::{
        ChallengeDefinition, DeploymentKey, ObservedDeployment, Resources, WorkloadHandle,
        WorkloadStatus,
    },
    orchestrator::{Orchestrator, OrchestratorSettings},
    store::{ChallengeConfigStore, InMemoryChallengeRepository},
    telemetry::Metrics,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

pub const BASE_DOMAIN: &str = "example.org";

pub fn definition(id: &str) -> ChallengeDefinition {
    ChallengeDefinition {
        id: id.to_string(),
        image: format!("registry.example.org/{id}:latest"),
        port: 1337,
        resources: Resources::default(),
        environment: BTreeMap::new(),
        image_pull_secret: None,
    }
}

/// Cluster stand-in that keeps the created instances in memory and counts calls
#[derive(Default)]
pub struct FakeCluster {
    pub ensure_workload_calls: AtomicUsize,
    pub ensure_route_calls: AtomicUsize,
    pub teardown_calls: AtomicUsize,
    /// Instances with a workload, by key
    live: Mutex<HashMap<DeploymentKey, ObservedDeployment>>,
    workload_delay: Mutex<Option<Duration>>,
    workload_error: Mutex<Option<Error>>,
    route_error: Mutex<Option<Error>>,
    teardown_error: Mutex<Option<Error>>,
    status_error: Mutex<Option<Error>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delay_workloads(&self, delay: Duration) {
        *self.workload_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_workloads(&self, error: Option<Error>) {
        *self.workload_error.lock().unwrap() = error;
    }

    pub fn fail_routes(&self, error: Option<Error>) {
        *self.route_error.lock().unwrap() = error;
    }

    pub fn fail_teardowns(&self, error: Option<Error>) {
        *self.teardown_error.lock().unwrap() = error;
    }

    pub fn fail_status(&self, error: Option<Error>) {
        *self.status_error.lock().unwrap() = error;
    }

    /// Pretend a workload exists from an earlier run of the manager
    pub fn seed(&self, key: DeploymentKey) {
        let url = format!("{}.{}", key.subdomain(), BASE_DOMAIN);
        self.live.lock().unwrap().insert(
            key.clone(),
            ObservedDeployment {
                key,
                url,
                created_at: Some(DateTime::now()),
            },
        );
    }

    pub fn is_live(&self, key: &DeploymentKey) -> bool {
        self.live.lock().unwrap().contains_key(key)
    }

    pub fn ensures(&self) -> usize {
        self.ensure_workload_calls.load(Ordering::SeqCst)
    }

    pub fn routes(&self) -> usize {
        self.ensure_route_calls.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn ensure_workload(
        &self,
        definition: &ChallengeDefinition,
        key: &DeploymentKey,
    ) -> Result<WorkloadHandle> {
        self.ensure_workload_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.workload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.workload_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.seed(key.clone());
        Ok(WorkloadHandle {
            workload_name: key.object_name(),
            service_name: key.object_name(),
            port: definition.port,
        })
    }

    async fn ensure_route(&self, _handle: &WorkloadHandle, key: &DeploymentKey) -> Result<String> {
        self.ensure_route_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.route_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(format!("{}.{}", key.subdomain(), BASE_DOMAIN))
    }

    async fn teardown(&self, key: &DeploymentKey) -> Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.teardown_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.live.lock().unwrap().remove(key);
        Ok(())
    }

    async fn status(&self, key: &DeploymentKey) -> Result<WorkloadStatus> {
        if let Some(e) = self.status_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(if self.is_live(key) {
            WorkloadStatus::Ready
        } else {
            WorkloadStatus::Absent
        })
    }

    async fn list_deployments(&self) -> Result<Vec<ObservedDeployment>> {
        Ok(self.live.lock().unwrap().values().cloned().collect())
    }
}

/// Orchestrator wired to a `FakeCluster` and an in-memory repository holding `c42`
pub struct TestManager {
    pub orchestrator: Orchestrator,
    pub cluster: Arc<FakeCluster>,
    pub repository: Arc<InMemoryChallengeRepository>,
    pub metrics: Arc<Metrics>,
}

impl TestManager {
    pub fn new() -> Self {
        Self::with_settings(OrchestratorSettings::default())
    }

    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        Self::with_cluster(FakeCluster::new(), settings)
    }

    pub fn with_cluster(cluster: Arc<FakeCluster>, settings: OrchestratorSettings) -> Self {
        let repository = Arc::new(InMemoryChallengeRepository::new());
        repository.insert(definition("c42"));
        let metrics = Arc::new(Metrics::default());
        let store = ChallengeConfigStore::new(
            repository.clone(),
            Duration::from_secs(60),
            metrics.clone(),
        );
        let orchestrator = Orchestrator::new(store, cluster.clone(), settings, metrics.clone());

        Self {
            orchestrator,
            cluster,
            repository,
            metrics,
        }
    }
}
