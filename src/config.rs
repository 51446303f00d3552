use crate::{
    error::{Error, Result},
    orchestrator::timeout,
};
use serde::Deserialize;
use std::time::Duration;

/// Process configuration, read once from the environment at startup
#[derive(Deserialize, Clone, Debug)]
pub struct ManagerConfig {
    /// Domain that instance subdomains are created under (e.g. example.org)
    pub base_domain: String,

    /// Public domain of the API; used as the DNS target of instance routes
    pub api_domain: String,

    /// Namespace holding challenge definitions and all instance objects
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Image pull secret attached to every instance pod
    #[serde(default)]
    pub container_secret: Option<String>,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// "production" hides error details from HTTP responses
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Where challenge definitions come from: "kubernetes" or "memory"
    #[serde(default = "default_repository")]
    pub repository: String,

    /// JSON array of challenge definitions loaded by the "memory" repository
    #[serde(default)]
    pub challenges_file: Option<String>,

    #[serde(default = "default_gateway_name")]
    pub gateway_name: String,
    #[serde(default)]
    pub gateway_namespace: Option<String>,
    #[serde(default)]
    pub gateway_listener: Option<String>,

    #[serde(default = "default_retry_attempts")]
    pub cluster_retry_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub cluster_retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub cluster_retry_max_ms: u64,

    /// Instance lifetime such as "2h" or "1h30m"; unset means instances never expire
    #[serde(default)]
    pub instance_timeout: Option<String>,

    #[serde(default = "default_failed_retention")]
    pub failed_record_retention_seconds: u64,

    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,
}

impl ManagerConfig {
    pub fn from_env() -> Result<Self> {
        let config: ManagerConfig = ::config::Config::builder()
            .add_source(::config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_domain.trim().is_empty() {
            return Err(Error::ConfigError("BASE_DOMAIN must not be empty".to_string()));
        }
        if self.api_domain.trim().is_empty() {
            return Err(Error::ConfigError("API_DOMAIN must not be empty".to_string()));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::ConfigError("NAMESPACE must not be empty".to_string()));
        }
        if self.cache_ttl_seconds == 0 {
            return Err(Error::ConfigError(
                "CACHE_TTL_SECONDS must be greater than zero".to_string(),
            ));
        }
        if !matches!(self.repository.as_str(), "kubernetes" | "memory") {
            return Err(Error::ConfigError(format!(
                "unknown REPOSITORY {}",
                self.repository
            )));
        }
        if self.repository == "memory" && self.challenges_file.is_none() {
            return Err(Error::ConfigError(
                "REPOSITORY=memory requires CHALLENGES_FILE".to_string(),
            ));
        }
        self.instance_lifetime()?;
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn instance_lifetime(&self) -> Result<Option<chrono::Duration>> {
        self.instance_timeout
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(timeout::parse_timeout)
            .transpose()
    }

    pub fn failed_record_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.failed_record_retention_seconds as i64)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds.max(1))
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn default_namespace() -> String {
    "challenges".to_string()
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_repository() -> String {
    "kubernetes".to_string()
}

fn default_gateway_name() -> String {
    "challenge-gateway".to_string()
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    100
}

fn default_retry_max_ms() -> u64 {
    5_000
}

fn default_failed_retention() -> u64 {
    15 * 60
}

fn default_reaper_interval() -> u64 {
    30
}

#[cfg(test)]
pub(crate) fn test_config() -> ManagerConfig {
    serde_json::from_value(serde_json::json!({
        "base_domain": "example.org",
        "api_domain": "api.example.org",
        "environment": "development",
    }))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = test_config();
        assert_eq!(config.namespace, "challenges");
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.repository, "kubernetes");
        assert!(config.instance_lifetime().unwrap().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let mut config = test_config();
        config.instance_timeout = Some("2x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_repository_needs_file() {
        let mut config = test_config();
        config.repository = "memory".to_string();
        assert!(config.validate().is_err());
        config.challenges_file = Some("/etc/challenges.json".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_domains_rejected() {
        let mut config = test_config();
        config.api_domain = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.base_domain = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = test_config();
        config.cache_ttl_seconds = 0;
        assert!(config.validate().is_err());
    }
}
