use crate::model::{ChallengeDefinition, ResourceSpec, Resources};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Challenge definition stored in the cluster (read-only from the manager's perspective)
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "challenges.ctf.dev",
    version = "v1",
    kind = "Challenge",
    plural = "challenges",
    namespaced,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Port", "type":"integer", "jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSpec {
    /// Container image reference
    pub image: String,

    /// Port the container listens on
    #[schemars(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    pub resource_requests: Option<ResourceSpec>,
    pub resource_limits: Option<ResourceSpec>,

    /// Secret used to pull a private image
    pub image_pull_secret: Option<String>,
}

impl From<Challenge> for ChallengeDefinition {
    fn from(challenge: Challenge) -> Self {
        let id = challenge.name_any();
        let spec = challenge.spec;
        ChallengeDefinition {
            id,
            image: spec.image,
            port: spec.port,
            resources: Resources {
                requests: spec.resource_requests,
                limits: spec.resource_limits,
            },
            environment: spec.environment,
            image_pull_secret: spec.image_pull_secret,
        }
    }
}
