use crate::{
    cluster::{retry, ClusterContext, GatewayRef},
    crds::{HTTPBackendRef, HTTPRoute, HTTPRouteRule, HTTPRouteSpec, ParentReference},
    error::{Error, Result},
    model::{DeploymentKey, WorkloadHandle},
    resources::labels,
};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use tracing::{info, warn};

const EXTERNAL_DNS_TARGET: &str = "external-dns.alpha.kubernetes.io/target";

/// Public hostname of an instance
pub fn instance_hostname(key: &DeploymentKey, base_domain: &str) -> String {
    format!("{}.{}", key.subdomain(), base_domain)
}

pub fn build_route(
    handle: &WorkloadHandle,
    key: &DeploymentKey,
    hostname: &str,
    namespace: &str,
    api_domain: &str,
    gateway: &GatewayRef,
) -> HTTPRoute {
    let mut annotations = labels::annotations(key);
    annotations.insert(EXTERNAL_DNS_TARGET.to_string(), api_domain.to_string());

    HTTPRoute {
        metadata: ObjectMeta {
            name: Some(key.object_name()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels::common_labels(key)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: HTTPRouteSpec {
            hostnames: Some(vec![hostname.to_string()]),
            parent_refs: Some(vec![ParentReference {
                kind: Some("Gateway".to_string()),
                namespace: gateway.namespace.clone(),
                name: gateway.name.clone(),
                section_name: gateway.listener.clone(),
            }]),
            rules: Some(vec![HTTPRouteRule {
                backend_refs: Some(vec![HTTPBackendRef {
                    kind: None,
                    name: handle.service_name.clone(),
                    port: Some(handle.port as i32),
                }]),
            }]),
        },
    }
}

/// Find a route in `routes` that binds `hostname` to a service other than `service`
fn conflicting_backend(routes: &[HTTPRoute], hostname: &str, service: &str) -> Option<String> {
    routes
        .iter()
        .filter(|route| route.hostname() == Some(hostname))
        .filter_map(|route| route.backend_service())
        .find(|backend| *backend != service)
        .map(str::to_string)
}

/// Create the HTTPRoute of an instance and return its URL
pub async fn ensure(
    handle: &WorkloadHandle,
    key: &DeploymentKey,
    ctx: &ClusterContext,
) -> Result<String> {
    let api: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let hostname = instance_hostname(key, &ctx.base_domain);
    let route_name = key.object_name();

    let lp = ListParams::default();
    let existing = retry::with_backoff(&ctx.retry, "list routes", || api.list(&lp))
        .await
        .map_err(retry::classify)?;
    if let Some(bound_to) = conflicting_backend(&existing.items, &hostname, &handle.service_name) {
        warn!("Hostname {} already routed to {}", hostname, bound_to);
        return Err(Error::RouteConflict {
            subdomain: key.subdomain(),
            bound_to,
        });
    }

    let route = build_route(
        handle,
        key,
        &hostname,
        &ctx.namespace,
        &ctx.api_domain,
        &ctx.gateway,
    );
    let pp = PostParams::default();

    match retry::with_backoff(&ctx.retry, "create route", || api.create(&pp, &route)).await {
        Ok(_) => info!("Created HTTPRoute {} for {}", route_name, hostname),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            let current = retry::with_backoff(&ctx.retry, "get route", || api.get(&route_name))
                .await
                .map_err(retry::classify)?;
            if let Some(bound_to) =
                conflicting_backend(std::slice::from_ref(&current), &hostname, &handle.service_name)
            {
                return Err(Error::RouteConflict {
                    subdomain: key.subdomain(),
                    bound_to,
                });
            }
            info!("HTTPRoute {} already exists", route_name);
        }
        Err(e) => return Err(retry::classify(e)),
    }

    Ok(hostname)
}

pub async fn delete(key: &DeploymentKey, ctx: &ClusterContext) -> Result<()> {
    let api: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let name = key.object_name();
    let dp = DeleteParams::default();

    match retry::with_backoff(&ctx.retry, "delete route", || api.delete(&name, &dp)).await {
        Ok(_) => {
            info!("Deleted HTTPRoute {}", name);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(retry::classify(e)),
    }
}
