use super::{retry::RetryPolicy, ClusterClient};
use crate::{
    config::ManagerConfig,
    date_time::DateTime,
    error::Result,
    model::{ChallengeDefinition, DeploymentKey, ObservedDeployment, WorkloadHandle, WorkloadStatus},
    resources::{deployment, gateway, labels, service},
};
use async_trait::async_trait;
use kube::{Client, ResourceExt};
use tracing::{instrument, warn};

/// Gateway that instance routes attach to
#[derive(Clone, Debug)]
pub struct GatewayRef {
    pub name: String,
    pub namespace: Option<String>,
    pub listener: Option<String>,
}

/// Everything the resource builders need to talk to one namespace
#[derive(Clone)]
pub struct ClusterContext {
    pub client: Client,
    pub namespace: String,
    pub base_domain: String,
    pub api_domain: String,
    pub container_secret: Option<String>,
    pub gateway: GatewayRef,
    pub retry: RetryPolicy,
}

impl ClusterContext {
    pub fn from_config(client: Client, config: &ManagerConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            base_domain: config.base_domain.clone(),
            api_domain: config.api_domain.clone(),
            container_secret: config.container_secret.clone(),
            gateway: GatewayRef {
                name: config.gateway_name.clone(),
                namespace: config.gateway_namespace.clone(),
                listener: config.gateway_listener.clone(),
            },
            retry: RetryPolicy::from_config(config),
        }
    }
}

pub struct KubeClusterClient {
    ctx: ClusterContext,
}

impl KubeClusterClient {
    pub fn new(ctx: ClusterContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    #[instrument(skip_all, fields(key = %key))]
    async fn ensure_workload(
        &self,
        definition: &ChallengeDefinition,
        key: &DeploymentKey,
    ) -> Result<WorkloadHandle> {
        let mut secrets: Vec<&str> = definition.image_pull_secret.iter().map(String::as_str).collect();
        if let Some(secret) = self.ctx.container_secret.as_deref() {
            if !secrets.contains(&secret) {
                secrets.push(secret);
            }
        }
        for secret in secrets {
            deployment::verify_pull_secret(secret, &self.ctx).await?;
        }

        deployment::ensure(definition, key, &self.ctx).await?;
        service::ensure(key, definition.port, &self.ctx).await
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn ensure_route(&self, handle: &WorkloadHandle, key: &DeploymentKey) -> Result<String> {
        gateway::ensure(handle, key, &self.ctx).await
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn teardown(&self, key: &DeploymentKey) -> Result<()> {
        // Route first so no traffic reaches a half-deleted workload
        gateway::delete(key, &self.ctx).await?;
        service::delete(key, &self.ctx).await?;
        deployment::delete(key, &self.ctx).await
    }

    async fn status(&self, key: &DeploymentKey) -> Result<WorkloadStatus> {
        deployment::status(key, &self.ctx).await
    }

    async fn list_deployments(&self) -> Result<Vec<ObservedDeployment>> {
        let deployments = deployment::list_managed(&self.ctx).await?;

        let observed = deployments
            .iter()
            .filter_map(|d| {
                let key = labels::key_from_annotations(d.annotations());
                if key.is_none() {
                    warn!("Managed deployment {} has no usable id annotations", d.name_any());
                }
                let key = key?;
                let created_at = d
                    .annotations()
                    .get(labels::CREATED_AT_ANNOTATION)
                    .and_then(|ts| DateTime::parse(ts));
                Some(ObservedDeployment {
                    url: gateway::instance_hostname(&key, &self.ctx.base_domain),
                    key,
                    created_at,
                })
            })
            .collect();

        Ok(observed)
    }
}
