use crate::model::DeploymentKey;
use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "challenge-manager";
pub const DEPLOYMENT_KEY: &str = "challenges.ctf.dev/deployment-key";
pub const SUBDOMAIN: &str = "challenges.ctf.dev/subdomain";
pub const REQUESTER_ANNOTATION: &str = "challenges.ctf.dev/requester-id";
pub const CHALLENGE_ANNOTATION: &str = "challenges.ctf.dev/challenge-id";
pub const CREATED_AT_ANNOTATION: &str = "challenges.ctf.dev/created-at";

/// Generate standard labels for all resources of one instance
pub fn common_labels(key: &DeploymentKey) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY.to_string(), MANAGER.to_string());
    labels.insert("app.kubernetes.io/component".to_string(), "challenge".to_string());
    labels.insert(DEPLOYMENT_KEY.to_string(), key.digest().to_string());
    labels.insert(SUBDOMAIN.to_string(), key.subdomain());
    labels
}

/// Generate selector labels for pods
pub fn pod_selector_labels(key: &DeploymentKey) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY.to_string(), MANAGER.to_string());
    labels.insert(DEPLOYMENT_KEY.to_string(), key.digest().to_string());
    labels
}

/// Raw ids are kept in annotations since label values are length restricted
pub fn annotations(key: &DeploymentKey) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(REQUESTER_ANNOTATION.to_string(), key.requester_id().to_string());
    annotations.insert(CHALLENGE_ANNOTATION.to_string(), key.challenge_id().to_string());
    annotations
}

pub fn key_selector(key: &DeploymentKey) -> String {
    format!("{}={}", DEPLOYMENT_KEY, key.digest())
}

pub fn managed_selector() -> String {
    format!("{}={}", MANAGED_BY, MANAGER)
}

/// Recover the key of a managed object from its annotations
pub fn key_from_annotations(annotations: &BTreeMap<String, String>) -> Option<DeploymentKey> {
    let requester = annotations.get(REQUESTER_ANNOTATION)?;
    let challenge = annotations.get(CHALLENGE_ANNOTATION)?;
    DeploymentKey::new(requester, challenge).ok()
}
