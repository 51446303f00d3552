use crate::{
    cluster::{retry, ClusterContext},
    date_time::DateTime,
    error::{CauseCode, Error, Result},
    model::{ChallengeDefinition, DeploymentKey, ResourceSpec, WorkloadStatus},
    resources::labels,
};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Capabilities, Container, ContainerPort, EnvVar, LocalObjectReference, Pod, PodSpec,
            PodTemplateSpec, ResourceRequirements, Secret, SecurityContext,
        },
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::LabelSelector},
};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use tracing::{debug, info};

const DOCKER_CONFIG_SECRET: &str = "kubernetes.io/dockerconfigjson";

/// Container waiting reasons that will not resolve without new input
const TERMINAL_WAITING_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
];

pub async fn ensure(
    definition: &ChallengeDefinition,
    key: &DeploymentKey,
    ctx: &ClusterContext,
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let deployment = build_deployment(
        definition,
        key,
        &ctx.namespace,
        ctx.container_secret.as_deref(),
    );
    let name = key.object_name();
    let pp = PostParams::default();

    let created = retry::with_backoff(&ctx.retry, "create deployment", || {
        api.create(&pp, &deployment)
    })
    .await;

    match created {
        Ok(_) => {
            info!("Created deployment {} in {}", name, ctx.namespace);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            info!("Deployment {} already exists", name);
            Ok(())
        }
        Err(e) => Err(retry::classify(e)),
    }
}

pub fn build_deployment(
    definition: &ChallengeDefinition,
    key: &DeploymentKey,
    namespace: &str,
    container_secret: Option<&str>,
) -> Deployment {
    let name = key.object_name();

    // Build environment variables
    let mut env_vars: Vec<EnvVar> = definition
        .environment
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();

    // Add instance metadata
    for (name, value) in [
        ("CHALLENGE_ID", key.challenge_id()),
        ("REQUESTER_ID", key.requester_id()),
    ] {
        env_vars.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        });
    }

    let container = Container {
        name: "challenge".to_string(),
        image: Some(definition.image.clone()),
        env: Some(env_vars),
        ports: Some(vec![ContainerPort {
            name: Some("challenge".to_string()),
            container_port: definition.port as i32,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(build_resources(
            definition.resources.requests.as_ref(),
            definition.resources.limits.as_ref(),
        )),
        security_context: Some(build_security_context()),
        ..Default::default()
    };

    let mut pull_secrets: Vec<String> = definition.image_pull_secret.iter().cloned().collect();
    if let Some(secret) = container_secret {
        if !pull_secrets.iter().any(|s| s == secret) {
            pull_secrets.push(secret.to_string());
        }
    }

    let mut annotations = labels::annotations(key);
    annotations.insert(
        labels::CREATED_AT_ANNOTATION.to_string(),
        DateTime::now().to_rfc3339(),
    );

    let pod_template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels::common_labels(key)),
            annotations: Some(BTreeMap::from([(
                "cluster-autoscaler.kubernetes.io/safe-to-evict".to_string(),
                "false".to_string(),
            )])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            image_pull_secrets: if pull_secrets.is_empty() {
                None
            } else {
                Some(
                    pull_secrets
                        .into_iter()
                        .map(|name| LocalObjectReference { name })
                        .collect(),
                )
            },
            enable_service_links: Some(false),
            automount_service_account_token: Some(false),
            termination_grace_period_seconds: Some(0),
            ..Default::default()
        }),
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(labels::common_labels(key)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels::pod_selector_labels(key)),
                ..Default::default()
            },
            template: pod_template,
            progress_deadline_seconds: Some(300),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_resources(
    requests: Option<&ResourceSpec>,
    limits: Option<&ResourceSpec>,
) -> ResourceRequirements {
    let cpu_limit = limits
        .and_then(|r| r.cpu.clone())
        .unwrap_or_else(|| "1000m".to_string());
    let memory_limit = limits
        .and_then(|r| r.memory.clone())
        .unwrap_or_else(|| "512Mi".to_string());
    let cpu_request = requests
        .and_then(|r| r.cpu.clone())
        .unwrap_or_else(|| "100m".to_string());
    let memory_request = requests
        .and_then(|r| r.memory.clone())
        .unwrap_or_else(|| "128Mi".to_string());

    ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu_limit)),
            ("memory".to_string(), Quantity(memory_limit)),
        ])),
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu_request)),
            ("memory".to_string(), Quantity(memory_request)),
        ])),
        ..Default::default()
    }
}

fn build_security_context() -> SecurityContext {
    SecurityContext {
        privileged: Some(false),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            add: None,
            drop: Some(vec!["NET_RAW".to_string()]),
        }),
        ..Default::default()
    }
}

pub async fn status(key: &DeploymentKey, ctx: &ClusterContext) -> Result<WorkloadStatus> {
    let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let name = key.object_name();

    let fetched = retry::with_backoff(&ctx.retry, "get deployment", || api.get(&name)).await;
    let deployment = match fetched {
        Ok(deployment) => deployment,
        Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(WorkloadStatus::Absent),
        Err(e) => return Err(retry::classify(e)),
    };

    if deployment_ready(&deployment) {
        return Ok(WorkloadStatus::Ready);
    }
    if deployment_stalled(&deployment) {
        return Ok(WorkloadStatus::Failed);
    }

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let lp = ListParams::default().labels(&labels::key_selector(key));
    let pod_list = retry::with_backoff(&ctx.retry, "list pods", || pods.list(&lp))
        .await
        .map_err(retry::classify)?;

    if let Some(reason) = pod_list.items.iter().find_map(pod_failure) {
        debug!("Instance {} failed: {}", key, reason);
        return Ok(WorkloadStatus::Failed);
    }

    Ok(WorkloadStatus::Pending)
}

/// Cause of a pod that cannot start, if any
pub fn pod_failure(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref()?.reason.clone())
        .find(|reason| TERMINAL_WAITING_REASONS.contains(&reason.as_str()))
}

/// Pull secrets must exist before the workload is created, otherwise the pod
/// would sit in ImagePullBackOff
pub async fn verify_pull_secret(secret_name: &str, ctx: &ClusterContext) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    match retry::with_backoff(&ctx.retry, "get secret", || api.get(secret_name)).await {
        Ok(secret) if secret.type_.as_deref() == Some(DOCKER_CONFIG_SECRET) => Ok(()),
        Ok(_) => Err(Error::provisioning(
            CauseCode::ImagePullDenied,
            format!("pull secret {secret_name} is not of type {DOCKER_CONFIG_SECRET}"),
        )),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Err(Error::provisioning(
            CauseCode::ImagePullDenied,
            format!("pull secret {secret_name} not found in {}", ctx.namespace),
        )),
        Err(e) => Err(retry::classify(e)),
    }
}

fn deployment_ready(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
        >= 1
}

fn deployment_stalled(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == "Progressing"
                    && c.status == "False"
                    && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
            })
        })
        .unwrap_or(false)
}

pub async fn delete(key: &DeploymentKey, ctx: &ClusterContext) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let name = key.object_name();
    let dp = DeleteParams::background();

    match retry::with_backoff(&ctx.retry, "delete deployment", || api.delete(&name, &dp)).await {
        Ok(_) => {
            info!("Deleted deployment {}", name);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            info!("Deployment {} already deleted", name);
            Ok(())
        }
        Err(e) => Err(retry::classify(e)),
    }
}

pub async fn list_managed(ctx: &ClusterContext) -> Result<Vec<Deployment>> {
    let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let lp = ListParams::default().labels(&labels::managed_selector());
    let list = retry::with_backoff(&ctx.retry, "list deployments", || api.list(&lp))
        .await
        .map_err(retry::classify)?;
    Ok(list.items)
}
