use crate::{
    cluster::{retry, ClusterContext},
    error::Result,
    model::{DeploymentKey, WorkloadHandle},
    resources::labels,
};
use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use tracing::info;

/// Create the ClusterIP service in front of the instance workload
pub async fn ensure(key: &DeploymentKey, port: u16, ctx: &ClusterContext) -> Result<WorkloadHandle> {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let svc = build_service(key, port, &ctx.namespace);
    let service_name = key.object_name();
    let pp = PostParams::default();

    match retry::with_backoff(&ctx.retry, "create service", || api.create(&pp, &svc)).await {
        Ok(_) => info!("Created service {} in {}", service_name, ctx.namespace),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            info!("Service {} already exists", service_name)
        }
        Err(e) => return Err(retry::classify(e)),
    }

    Ok(WorkloadHandle {
        workload_name: key.object_name(),
        service_name,
        port,
    })
}

pub fn build_service(key: &DeploymentKey, port: u16, namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(key.object_name()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels::common_labels(key)),
            annotations: Some(labels::annotations(key)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels::pod_selector_labels(key)),
            ports: Some(vec![ServicePort {
                name: Some("challenge".to_string()),
                port: port as i32,
                target_port: Some(IntOrString::Int(port as i32)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub async fn delete(key: &DeploymentKey, ctx: &ClusterContext) -> Result<()> {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let name = key.object_name();
    let dp = DeleteParams::default();

    match retry::with_backoff(&ctx.retry, "delete service", || api.delete(&name, &dp)).await {
        Ok(_) => {
            info!("Deleted service {}", name);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            info!("Service {} already deleted", name);
            Ok(())
        }
        Err(e) => Err(retry::classify(e)),
    }
}
