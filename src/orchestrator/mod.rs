//! Per-key deployment state machine.
//!
//! `Requested -> Provisioning -> Ready | Failed`, `Ready -> Terminating -> Absent`
//! and `Failed -> Absent`. Absent is represented by the lack of a record.

use crate::{
    cluster::ClusterClient,
    config::ManagerConfig,
    date_time::DateTime,
    error::{CauseCode, Error, Result},
    model::{
        DeploymentKey, DeploymentRecord, DeploymentRequest, DeploymentState, FailureCause,
        WorkloadStatus,
    },
    single_flight::SingleFlight,
    store::ChallengeConfigStore,
    telemetry::Metrics,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub mod table;
pub mod timeout;

pub use table::DeploymentTable;

/// Lifetimes that drive reaping
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// Instance lifetime after becoming ready; `None` keeps instances until torn down
    pub instance_lifetime: Option<chrono::Duration>,
    pub failed_retention: chrono::Duration,
    pub reaper_interval: std::time::Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            instance_lifetime: None,
            failed_retention: chrono::Duration::minutes(15),
            reaper_interval: std::time::Duration::from_secs(30),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        Ok(Self {
            instance_lifetime: config.instance_lifetime()?,
            failed_retention: config.failed_record_retention(),
            reaper_interval: config.reaper_interval(),
        })
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: ChallengeConfigStore,
    cluster: Arc<dyn ClusterClient>,
    table: Arc<DeploymentTable>,
    flights: SingleFlight<DeploymentKey, DeploymentRecord>,
    settings: OrchestratorSettings,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        store: ChallengeConfigStore,
        cluster: Arc<dyn ClusterClient>,
        settings: OrchestratorSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            cluster,
            table: Arc::new(DeploymentTable::new()),
            flights: SingleFlight::new(),
            settings,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn store(&self) -> &ChallengeConfigStore {
        &self.store
    }

    /// Bring the instance for a request to `Ready`.
    ///
    /// A ready instance is returned without cluster calls. Concurrent requests
    /// for one key share a single provisioning run, which executes on its own
    /// task and survives callers that stop waiting.
    #[instrument(skip(self, request), fields(requester_id = %request.requester_id, challenge_id = %request.challenge_id))]
    pub async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentRecord> {
        let key = request.key()?;

        if let Some(record) = self.table.get(&key) {
            if record.state == DeploymentState::Ready {
                debug!("Instance {} already ready", key);
                return Ok(record);
            }
        }

        let this = self.clone();
        let flight_key = key.clone();
        let requested_at = request.requested_at;
        self.flights
            .run(flight_key, async move { this.provision(key, requested_at).await })
            .await
    }

    async fn provision(&self, key: DeploymentKey, requested_at: DateTime) -> Result<DeploymentRecord> {
        let _guard = self.table.lock(&key).await;

        let prior = self.table.get(&key);
        match &prior {
            Some(record) if record.state == DeploymentState::Ready => return Ok(record.clone()),
            Some(record) if record.state == DeploymentState::Failed => {
                info!(cause = ?record.cause, "Clearing failed record of {}", key);
            }
            _ => {}
        }

        let mut record = DeploymentRecord::requested(&key, requested_at);
        self.table.put(&key, record.clone());
        record.transition(DeploymentState::Provisioning);
        self.table.put(&key, record.clone());

        let definition = match self.store.get(key.challenge_id()).await {
            Ok(definition) => definition,
            Err(e) => {
                warn!("Cannot resolve challenge {}: {}", key.challenge_id(), e);
                match prior {
                    // leftovers of an earlier attempt stay tracked for the reaper
                    Some(prior)
                        if matches!(
                            prior.state,
                            DeploymentState::Failed | DeploymentState::Terminating
                        ) =>
                    {
                        self.table.put(&key, prior);
                    }
                    _ => {
                        self.table.remove(&key);
                    }
                }
                return Err(e);
            }
        };

        let provisioned = async {
            let handle = self.cluster.ensure_workload(&definition, &key).await?;
            self.cluster.ensure_route(&handle, &key).await
        }
        .await;

        match provisioned {
            Ok(url) => {
                record.url = Some(url);
                record.cause = None;
                record.transition(DeploymentState::Ready);
                record.expires_at = self
                    .settings
                    .instance_lifetime
                    .map(|lifetime| record.updated_at.after(lifetime));
                self.table.put(&key, record.clone());
                self.metrics.record_deployment();
                self.metrics.incr_active_deployments();
                info!(url = ?record.url, "Instance {} ready", key);
                Ok(record)
            }
            Err(e) => {
                record.cause = Some(FailureCause::from(&e));
                record.transition(DeploymentState::Failed);
                self.table.put(&key, record);
                self.metrics.record_failure();
                error!(code = %e.code(), "Provisioning {} failed: {}", key, e);
                Err(e)
            }
        }
    }

    /// Remove the instance of a requester. Succeeds when nothing exists, after
    /// still asking the cluster to delete any leftovers.
    #[instrument(skip(self))]
    pub async fn teardown(&self, requester_id: &str, challenge_id: &str) -> Result<()> {
        let key = DeploymentKey::new(requester_id, challenge_id)?;
        let _guard = self.table.lock(&key).await;
        self.teardown_locked(&key).await?;
        self.metrics.record_teardown();
        Ok(())
    }

    /// Caller must hold the key lock
    async fn teardown_locked(&self, key: &DeploymentKey) -> Result<Option<DeploymentRecord>> {
        if let Some(mut record) = self.table.get(key) {
            if record.state == DeploymentState::Ready {
                self.metrics.decr_active_deployments();
            }
            record.transition(DeploymentState::Terminating);
            self.table.put(key, record);
        }

        if let Err(e) = self.cluster.teardown(key).await {
            // Terminating records are retried by the reaper
            if let Some(mut record) = self.table.get(key) {
                record.cause = Some(FailureCause::from(&e));
                self.table.put(key, record);
            }
            error!("Teardown of {} failed: {}", key, e);
            return Err(e);
        }

        let removed = self.table.remove(key);
        info!("Instance {} removed", key);
        Ok(removed)
    }

    /// Current record, if any. Never waits on a key lock.
    pub fn status(&self, requester_id: &str, challenge_id: &str) -> Result<Option<DeploymentRecord>> {
        let key = DeploymentKey::new(requester_id, challenge_id)?;
        Ok(self.table.get(&key))
    }

    /// Rebuild records for managed workloads found in the cluster. Workloads
    /// that cannot start come back as `Failed`.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let observed = self.cluster.list_deployments().await?;
        let mut recovered = 0;

        for deployment in observed {
            let key = deployment.key;
            let _guard = self.table.lock(&key).await;
            if self.table.get(&key).is_some() {
                continue;
            }

            let workload = match self.cluster.status(&key).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Cannot read status of {}, leaving it for the next pass: {}", key, e);
                    continue;
                }
            };

            let created_at = deployment.created_at.unwrap_or_else(DateTime::now);
            let mut record = DeploymentRecord::requested(&key, created_at);
            record.url = Some(deployment.url);
            match workload {
                WorkloadStatus::Absent => continue,
                // adopted as failed so the reaper removes the leftovers
                WorkloadStatus::Failed => {
                    let cause = Error::provisioning(
                        CauseCode::ControlPlane,
                        "workload found failed during recovery",
                    );
                    record.cause = Some(FailureCause::from(&cause));
                    record.transition(DeploymentState::Failed);
                }
                WorkloadStatus::Ready | WorkloadStatus::Pending => {
                    record.expires_at = self
                        .settings
                        .instance_lifetime
                        .map(|lifetime| created_at.after(lifetime));
                    record.transition(DeploymentState::Ready);
                    self.metrics.incr_active_deployments();
                }
            }
            self.table.put(&key, record);
            recovered += 1;
        }

        if recovered > 0 {
            info!("Recovered {} instances from the cluster", recovered);
        }
        Ok(recovered)
    }

    /// Tear down expired instances, retry stuck teardowns and evict old failures.
    /// Returns the number of records removed.
    #[instrument(skip(self))]
    pub async fn reap(&self, now: DateTime) -> usize {
        let mut reaped = 0;

        let candidates: Vec<DeploymentKey> = self
            .table
            .snapshot()
            .into_iter()
            .filter(|(_, record)| self.is_reapable(record, &now))
            .map(|(key, _)| key)
            .collect();

        for key in candidates {
            let _guard = self.table.lock(&key).await;
            // the snapshot may be outdated by the time the lock is held
            let Some(record) = self.table.get(&key) else {
                continue;
            };
            if !self.is_reapable(&record, &now) {
                continue;
            }

            debug!(state = ?record.state, "Reaping {}", key);
            match self.teardown_locked(&key).await {
                Ok(_) => {
                    self.metrics.record_reaped();
                    reaped += 1;
                }
                Err(e) => warn!("Reaping {} failed, will retry: {}", key, e),
            }
        }

        self.table.prune_locks();
        if reaped > 0 {
            info!("Reaped {} instances", reaped);
        }
        reaped
    }

    fn is_reapable(&self, record: &DeploymentRecord, now: &DateTime) -> bool {
        match record.state {
            DeploymentState::Ready => timeout::is_expired(record, now),
            DeploymentState::Failed => {
                timeout::is_stale_failure(record, now, self.settings.failed_retention)
            }
            DeploymentState::Terminating => true,
            _ => false,
        }
    }

    /// Periodically reap records, adopt untracked workloads and purge stale
    /// cache entries
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.settings.reaper_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                this.reap(DateTime::now()).await;
                if let Err(e) = this.recover().await {
                    warn!("Cannot list managed workloads: {}", e);
                }
                let purged = this.store.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired cache entries", purged);
                }
            }
        })
    }
}
