use crate::{
    crds::Challenge,
    error::{Error, Result},
    model::ChallengeDefinition,
};
use async_trait::async_trait;
use dashmap::DashMap;
use kube::{Api, Client};
use tracing::debug;

/// Durable store of challenge definitions
#[async_trait]
pub trait ChallengeRepository: Send + Sync {
    /// Fails with `NotFound` for unknown ids and `RepositoryUnavailable` when
    /// the store cannot be reached
    async fn read(&self, challenge_id: &str) -> Result<ChallengeDefinition>;
}

/// Reads `Challenge` custom resources from one namespace
#[derive(Clone)]
pub struct KubeChallengeRepository {
    api: Api<Challenge>,
    namespace: String,
}

impl KubeChallengeRepository {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ChallengeRepository for KubeChallengeRepository {
    async fn read(&self, challenge_id: &str) -> Result<ChallengeDefinition> {
        debug!(namespace = %self.namespace, challenge_id, "Reading challenge");
        match self.api.get(challenge_id).await {
            Ok(challenge) => Ok(challenge.into()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(Error::NotFound(challenge_id.to_string()))
            }
            Err(e) => Err(Error::RepositoryUnavailable(e.to_string())),
        }
    }
}

/// Process-local repository, used when definitions are supplied at startup
#[derive(Default)]
pub struct InMemoryChallengeRepository {
    definitions: DashMap<String, ChallengeDefinition>,
}

impl InMemoryChallengeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON array of definitions
    pub fn from_json(json: &str) -> Result<Self> {
        let definitions: Vec<ChallengeDefinition> = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid challenge definitions: {e}")))?;
        let repository = Self::new();
        for definition in definitions {
            repository.insert(definition);
        }
        Ok(repository)
    }

    pub fn insert(&self, definition: ChallengeDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }

    pub fn remove(&self, challenge_id: &str) {
        self.definitions.remove(challenge_id);
    }
}

#[async_trait]
impl ChallengeRepository for InMemoryChallengeRepository {
    async fn read(&self, challenge_id: &str) -> Result<ChallengeDefinition> {
        self.definitions
            .get(challenge_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| Error::NotFound(challenge_id.to_string()))
    }
}
