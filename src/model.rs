//! Domain types shared by the configuration store, the cluster client and the orchestrator.

use crate::{
    date_time::DateTime,
    error::{Error, Result},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, fmt};

/// DNS labels are limited to 63 characters
const MAX_LABEL_LEN: usize = 63;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ResourceSpec {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    pub requests: Option<ResourceSpec>,
    pub limits: Option<ResourceSpec>,
}

/// Immutable description of a challenge workload
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDefinition {
    pub id: String,
    pub image: String,
    pub port: u16,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub image_pull_secret: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DeploymentRequest {
    pub requester_id: String,
    pub challenge_id: String,
    pub requested_at: DateTime,
}

impl DeploymentRequest {
    pub fn new(requester_id: impl Into<String>, challenge_id: impl Into<String>) -> Self {
        Self {
            requester_id: requester_id.into(),
            challenge_id: challenge_id.into(),
            requested_at: DateTime::now(),
        }
    }

    pub fn key(&self) -> Result<DeploymentKey> {
        DeploymentKey::new(&self.requester_id, &self.challenge_id)
    }
}

/// Deterministic identity of one (requester, challenge) instance
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeploymentKey {
    requester_id: String,
    challenge_id: String,
    digest: String,
}

impl DeploymentKey {
    /// Validates both ids and derives the key
    pub fn new(requester_id: &str, challenge_id: &str) -> Result<Self> {
        validate_id("requesterId", requester_id)?;
        validate_id("challengeId", challenge_id)?;
        // "{challenge}-{requester}" must still fit in one DNS label
        if challenge_id.len() + 1 + requester_id.len() > MAX_LABEL_LEN {
            return Err(Error::ValidationError(format!(
                "challengeId and requesterId together exceed {} characters",
                MAX_LABEL_LEN - 1
            )));
        }

        Ok(Self {
            requester_id: requester_id.to_string(),
            challenge_id: challenge_id.to_string(),
            digest: digest(requester_id, challenge_id),
        })
    }

    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }

    pub fn challenge_id(&self) -> &str {
        &self.challenge_id
    }

    /// Short hash used in object names and label values
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Name shared by the Deployment, Service and HTTPRoute of this instance
    pub fn object_name(&self) -> String {
        format!("chal-{}", self.digest)
    }

    /// Leftmost DNS label of the instance hostname
    pub fn subdomain(&self) -> String {
        format!("{}-{}", self.challenge_id, self.requester_id)
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.requester_id, self.challenge_id, self.digest)
    }
}

fn digest(requester_id: &str, challenge_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(requester_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(challenge_id.as_bytes());
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(16);
    encoded
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::ValidationError(format!("{field} must not be empty")));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || value.starts_with('-') || value.ends_with('-') {
        return Err(Error::ValidationError(format!(
            "{field} must consist of lowercase letters, digits and inner dashes"
        )));
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentState {
    Requested,
    Provisioning,
    Ready,
    Failed,
    Terminating,
    Absent,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FailureCause {
    pub code: String,
    pub message: String,
}

impl From<&Error> for FailureCause {
    fn from(e: &Error) -> Self {
        FailureCause {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub key: String,
    pub requester_id: String,
    pub challenge_id: String,
    pub workload_name: String,
    pub service_name: String,
    pub route_name: String,
    pub state: DeploymentState,
    pub url: Option<String>,
    pub cause: Option<FailureCause>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    pub expires_at: Option<DateTime>,
}

impl DeploymentRecord {
    pub fn requested(key: &DeploymentKey, now: DateTime) -> Self {
        let name = key.object_name();
        DeploymentRecord {
            key: key.digest().to_string(),
            requester_id: key.requester_id().to_string(),
            challenge_id: key.challenge_id().to_string(),
            workload_name: name.clone(),
            service_name: name.clone(),
            route_name: name,
            state: DeploymentState::Requested,
            url: None,
            cause: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn transition(&mut self, state: DeploymentState) {
        self.state = state;
        self.updated_at = DateTime::now();
    }
}

/// Names of the cluster objects backing one instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadHandle {
    pub workload_name: String,
    pub service_name: String,
    pub port: u16,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadStatus {
    Pending,
    Ready,
    Failed,
    Absent,
}

/// Managed workload found in the cluster, used to rebuild records after a restart
#[derive(Clone, Debug)]
pub struct ObservedDeployment {
    pub key: DeploymentKey,
    pub url: String,
    pub created_at: Option<DateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let a = DeploymentKey::new("team1", "c42").unwrap();
        let b = DeploymentKey::new("team1", "c42").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest().len(), 16);
        assert!(a.digest().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.subdomain(), "c42-team1");
        assert_eq!(a.object_name(), format!("chal-{}", a.digest()));
    }

    #[test]
    fn test_key_separates_ids() {
        // "ab"+"c" must not collide with "a"+"bc"
        let a = DeploymentKey::new("ab", "c").unwrap();
        let b = DeploymentKey::new("a", "bc").unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_invalid_ids_rejected() {
        for (requester, challenge) in [
            ("", "c42"),
            ("team1", ""),
            ("Team1", "c42"),
            ("team_1", "c42"),
            ("-team", "c42"),
            ("team1", "c42-"),
        ] {
            assert!(
                matches!(
                    DeploymentKey::new(requester, challenge),
                    Err(Error::ValidationError(_))
                ),
                "{requester}/{challenge} should be rejected"
            );
        }
    }

    #[test]
    fn test_subdomain_length_bounded() {
        let requester = "r".repeat(31);
        let challenge = "c".repeat(31);
        assert!(DeploymentKey::new(&requester, &challenge).is_ok());
        let challenge = "c".repeat(32);
        assert!(DeploymentKey::new(&requester, &challenge).is_err());
    }

    #[test]
    fn test_requested_record() {
        let key = DeploymentKey::new("team1", "c42").unwrap();
        let record = DeploymentRecord::requested(&key, DateTime::now());
        assert_eq!(record.state, DeploymentState::Requested);
        assert_eq!(record.key, key.digest());
        assert!(record.url.is_none());
    }
}
