//! Deployment lifecycle against an in-process cluster.

mod common;

use challenge_manager::{
    date_time::DateTime,
    error::{CauseCode, Error},
    model::{DeploymentKey, DeploymentRequest, DeploymentState},
    orchestrator::OrchestratorSettings,
};
use common::{FakeCluster, TestManager};
use std::time::Duration;

fn request(requester: &str, challenge: &str) -> DeploymentRequest {
    DeploymentRequest::new(requester, challenge)
}

#[tokio::test]
async fn deploy_is_idempotent_and_teardown_returns_to_absent() {
    let manager = TestManager::new();
    let orchestrator = &manager.orchestrator;

    let first = orchestrator.deploy(request("team1", "c42")).await.unwrap();
    assert_eq!(first.url.as_deref(), Some("c42-team1.example.org"));
    assert_eq!(first.state, DeploymentState::Ready);

    let second = orchestrator.deploy(request("team1", "c42")).await.unwrap();
    assert_eq!(second.url, first.url);
    assert_eq!(manager.cluster.ensures(), 1);
    assert_eq!(manager.cluster.routes(), 1);

    orchestrator.teardown("team1", "c42").await.unwrap();
    assert!(orchestrator.status("team1", "c42").unwrap().is_none());
    let key = DeploymentKey::new("team1", "c42").unwrap();
    assert!(!manager.cluster.is_live(&key));
    assert_eq!(manager.metrics.snapshot().active_deployments, 0);
}

#[tokio::test]
async fn concurrent_deploys_provision_once() {
    let manager = TestManager::new();
    manager.cluster.delay_workloads(Duration::from_millis(50));

    let deploys = (0..10).map(|_| manager.orchestrator.deploy(request("team1", "c42")));
    let results = futures::future::join_all(deploys).await;

    for result in results {
        let record = result.unwrap();
        assert_eq!(record.state, DeploymentState::Ready);
        assert_eq!(record.url.as_deref(), Some("c42-team1.example.org"));
    }
    assert_eq!(manager.cluster.ensures(), 1);
    assert_eq!(manager.cluster.routes(), 1);
}

#[tokio::test]
async fn distinct_requesters_get_distinct_instances() {
    let manager = TestManager::new();

    let (a, b) = tokio::join!(
        manager.orchestrator.deploy(request("team1", "c42")),
        manager.orchestrator.deploy(request("team2", "c42")),
    );

    assert_eq!(a.unwrap().url.as_deref(), Some("c42-team1.example.org"));
    assert_eq!(b.unwrap().url.as_deref(), Some("c42-team2.example.org"));
    assert_eq!(manager.cluster.ensures(), 2);
}

#[tokio::test]
async fn unknown_challenge_leaves_no_record() {
    let manager = TestManager::new();

    let err = manager
        .orchestrator
        .deploy(request("team1", "c404"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert!(manager.orchestrator.status("team1", "c404").unwrap().is_none());
    assert_eq!(manager.cluster.ensures(), 0);
}

#[tokio::test]
async fn invalid_ids_are_rejected_before_any_work() {
    let manager = TestManager::new();

    let err = manager
        .orchestrator
        .deploy(request("Team 1", "c42"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ValidationError(_)));
    assert_eq!(manager.cluster.ensures(), 0);
}

#[tokio::test]
async fn failed_deploy_is_recorded_and_retried_on_next_deploy() {
    let manager = TestManager::new();
    manager.cluster.fail_workloads(Some(Error::provisioning(
        CauseCode::ImagePullDenied,
        "pull secret missing",
    )));

    let err = manager
        .orchestrator
        .deploy(request("team1", "c42"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PROVISIONING_ERROR:IMAGE_PULL_DENIED");

    let failed = manager.orchestrator.status("team1", "c42").unwrap().unwrap();
    assert_eq!(failed.state, DeploymentState::Failed);
    assert_eq!(
        failed.cause.unwrap().code,
        "PROVISIONING_ERROR:IMAGE_PULL_DENIED"
    );
    assert_eq!(manager.metrics.snapshot().deployment_failures, 1);

    manager.cluster.fail_workloads(None);
    let record = manager.orchestrator.deploy(request("team1", "c42")).await.unwrap();
    assert_eq!(record.state, DeploymentState::Ready);
    assert!(record.cause.is_none());
    assert_eq!(manager.cluster.ensures(), 2);
}

#[tokio::test]
async fn route_conflict_fails_the_deployment() {
    let manager = TestManager::new();
    manager.cluster.fail_routes(Some(Error::RouteConflict {
        subdomain: "c42-team1".to_string(),
        bound_to: "chal-ffffffffffffffff".to_string(),
    }));

    let err = manager
        .orchestrator
        .deploy(request("team1", "c42"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RouteConflict { .. }));
    let record = manager.orchestrator.status("team1", "c42").unwrap().unwrap();
    assert_eq!(record.state, DeploymentState::Failed);
    assert_eq!(record.cause.unwrap().code, "ROUTE_CONFLICT");
}

#[tokio::test]
async fn teardown_without_record_still_converges_cluster() {
    let manager = TestManager::new();
    let key = DeploymentKey::new("team1", "c42").unwrap();
    manager.cluster.seed(key.clone());

    manager.orchestrator.teardown("team1", "c42").await.unwrap();
    manager.orchestrator.teardown("team1", "c42").await.unwrap();

    assert_eq!(manager.cluster.teardowns(), 2);
    assert!(!manager.cluster.is_live(&key));
}

#[tokio::test]
async fn abandoned_caller_does_not_cancel_provisioning() {
    let manager = TestManager::new();
    manager.cluster.delay_workloads(Duration::from_millis(100));

    let orchestrator = manager.orchestrator.clone();
    let caller = tokio::spawn(async move { orchestrator.deploy(request("team1", "c42")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    caller.abort();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let record = manager.orchestrator.status("team1", "c42").unwrap().unwrap();
    assert_eq!(record.state, DeploymentState::Ready);
    assert_eq!(manager.cluster.ensures(), 1);
}

#[tokio::test]
async fn teardown_waits_for_inflight_provisioning() {
    let manager = TestManager::new();
    manager.cluster.delay_workloads(Duration::from_millis(100));

    let orchestrator = manager.orchestrator.clone();
    let deploy = tokio::spawn(async move { orchestrator.deploy(request("team1", "c42")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let in_progress = manager.orchestrator.status("team1", "c42").unwrap().unwrap();
    assert_eq!(in_progress.state, DeploymentState::Provisioning);

    manager.orchestrator.teardown("team1", "c42").await.unwrap();

    let deployed = deploy.await.unwrap().unwrap();
    assert_eq!(deployed.state, DeploymentState::Ready);
    assert!(manager.orchestrator.status("team1", "c42").unwrap().is_none());
    let key = DeploymentKey::new("team1", "c42").unwrap();
    assert!(!manager.cluster.is_live(&key));
}

#[tokio::test]
async fn failed_teardown_is_retried_by_reaper() {
    let manager = TestManager::new();
    manager.orchestrator.deploy(request("team1", "c42")).await.unwrap();
    manager
        .cluster
        .fail_teardowns(Some(Error::ClusterUnavailable("503".to_string())));

    let err = manager
        .orchestrator
        .teardown("team1", "c42")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClusterUnavailable(_)));
    let record = manager.orchestrator.status("team1", "c42").unwrap().unwrap();
    assert_eq!(record.state, DeploymentState::Terminating);

    manager.cluster.fail_teardowns(None);
    assert_eq!(manager.orchestrator.reap(DateTime::now()).await, 1);
    assert!(manager.orchestrator.status("team1", "c42").unwrap().is_none());
}

#[tokio::test]
async fn expired_instances_are_reaped() {
    let manager = TestManager::with_settings(OrchestratorSettings {
        instance_lifetime: Some(chrono::Duration::hours(1)),
        ..Default::default()
    });
    manager.orchestrator.deploy(request("team1", "c42")).await.unwrap();

    assert_eq!(manager.orchestrator.reap(DateTime::now()).await, 0);

    let later = DateTime::now().after(chrono::Duration::hours(2));
    assert_eq!(manager.orchestrator.reap(later).await, 1);
    assert!(manager.orchestrator.status("team1", "c42").unwrap().is_none());
    assert_eq!(manager.metrics.snapshot().reaped, 1);
    assert_eq!(manager.metrics.snapshot().active_deployments, 0);
}

#[tokio::test]
async fn recovery_adopts_existing_workloads() {
    let cluster = FakeCluster::new();
    cluster.seed(DeploymentKey::new("team1", "c42").unwrap());
    let manager = TestManager::with_cluster(cluster, OrchestratorSettings::default());

    assert_eq!(manager.orchestrator.recover().await.unwrap(), 1);
    let record = manager.orchestrator.status("team1", "c42").unwrap().unwrap();
    assert_eq!(record.state, DeploymentState::Ready);

    let again = manager.orchestrator.deploy(request("team1", "c42")).await.unwrap();
    assert_eq!(again.url.as_deref(), Some("c42-team1.example.org"));
    assert_eq!(manager.cluster.ensures(), 0);
}

#[tokio::test]
async fn failed_leftovers_stay_tracked_when_challenge_disappears() {
    let manager = TestManager::new();
    let key = DeploymentKey::new("team1", "c42").unwrap();
    manager.cluster.fail_routes(Some(Error::provisioning(
        CauseCode::ControlPlane,
        "gateway rejected route",
    )));
    assert!(manager.orchestrator.deploy(request("team1", "c42")).await.is_err());
    assert!(manager.cluster.is_live(&key));

    manager.cluster.fail_routes(None);
    manager.repository.remove("c42");
    manager.orchestrator.store().invalidate("c42");

    let err = manager
        .orchestrator
        .deploy(request("team1", "c42"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let record = manager.orchestrator.status("team1", "c42").unwrap().unwrap();
    assert_eq!(record.state, DeploymentState::Failed);

    let later = DateTime::now().after(chrono::Duration::minutes(16));
    assert_eq!(manager.orchestrator.reap(later).await, 1);
    assert!(!manager.cluster.is_live(&key));
}

#[tokio::test]
async fn stuck_teardown_stays_tracked_when_challenge_disappears() {
    let manager = TestManager::new();
    let key = DeploymentKey::new("team1", "c42").unwrap();
    manager.orchestrator.deploy(request("team1", "c42")).await.unwrap();
    manager
        .cluster
        .fail_teardowns(Some(Error::ClusterUnavailable("503".to_string())));
    assert!(manager.orchestrator.teardown("team1", "c42").await.is_err());

    manager.repository.remove("c42");
    manager.orchestrator.store().invalidate("c42");
    assert!(manager.orchestrator.deploy(request("team1", "c42")).await.is_err());
    let record = manager.orchestrator.status("team1", "c42").unwrap().unwrap();
    assert_eq!(record.state, DeploymentState::Terminating);

    manager.cluster.fail_teardowns(None);
    assert_eq!(manager.orchestrator.reap(DateTime::now()).await, 1);
    assert!(!manager.cluster.is_live(&key));
}

#[tokio::test]
async fn recovery_skips_workloads_with_unreadable_status() {
    let cluster = FakeCluster::new();
    cluster.seed(DeploymentKey::new("team1", "c42").unwrap());
    cluster.fail_status(Some(Error::ClusterUnavailable("503".to_string())));
    let manager = TestManager::with_cluster(cluster, OrchestratorSettings::default());

    assert_eq!(manager.orchestrator.recover().await.unwrap(), 0);
    assert!(manager.orchestrator.status("team1", "c42").unwrap().is_none());
    assert_eq!(manager.metrics.snapshot().active_deployments, 0);

    manager.cluster.fail_status(None);
    assert_eq!(manager.orchestrator.recover().await.unwrap(), 1);
    assert_eq!(manager.metrics.snapshot().active_deployments, 1);
}
