//! Typed interface to the container-orchestration control plane.

use crate::{
    error::Result,
    model::{ChallengeDefinition, DeploymentKey, ObservedDeployment, WorkloadHandle, WorkloadStatus},
};
use async_trait::async_trait;

pub mod kubernetes;
pub mod retry;

pub use kubernetes::{ClusterContext, GatewayRef, KubeClusterClient};
pub use retry::RetryPolicy;

/// Namespace-scoped control-plane operations for challenge instances.
///
/// Every operation is idempotent per deployment key. Transient control-plane
/// errors are retried inside the implementation; what escapes is terminal.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create or confirm the workload and its service
    async fn ensure_workload(
        &self,
        definition: &ChallengeDefinition,
        key: &DeploymentKey,
    ) -> Result<WorkloadHandle>;

    /// Create or confirm the externally reachable route, returning its URL
    async fn ensure_route(&self, handle: &WorkloadHandle, key: &DeploymentKey) -> Result<String>;

    /// Delete everything that exists for the key; missing objects are not an error
    async fn teardown(&self, key: &DeploymentKey) -> Result<()>;

    async fn status(&self, key: &DeploymentKey) -> Result<WorkloadStatus>;

    /// Every managed workload currently in the namespace
    async fn list_deployments(&self) -> Result<Vec<ObservedDeployment>>;
}
