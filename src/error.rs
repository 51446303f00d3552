use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Terminal cluster-side failure classes carried by `Error::Provisioning`
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CauseCode {
    InvalidDefinition,
    QuotaExceeded,
    ImagePullDenied,
    Forbidden,
    ControlPlane,
}

impl fmt::Display for CauseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            CauseCode::InvalidDefinition => "INVALID_DEFINITION",
            CauseCode::QuotaExceeded => "QUOTA_EXCEEDED",
            CauseCode::ImagePullDenied => "IMAGE_PULL_DENIED",
            CauseCode::Forbidden => "FORBIDDEN",
            CauseCode::ControlPlane => "CONTROL_PLANE",
        };
        f.write_str(code)
    }
}

// Cloneable so that a single in-flight result can be handed to every waiter.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Challenge not found: {0}")]
    NotFound(String),

    #[error("Challenge repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("Provisioning failed ({code}): {message}")]
    ProvisioningError { code: CauseCode, message: String },

    #[error("Route conflict: {subdomain} is bound to workload {bound_to}")]
    RouteConflict { subdomain: String, bound_to: String },

    #[error("Cluster unavailable after retries: {0}")]
    ClusterUnavailable(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("In-flight operation aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Determine if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RepositoryUnavailable(_) | Error::ClusterUnavailable(_)
        )
    }

    /// Stable machine-readable code surfaced to HTTP callers
    pub fn code(&self) -> String {
        match self {
            Error::ValidationError(_) => "VALIDATION_ERROR".to_string(),
            Error::NotFound(_) => "NOT_FOUND".to_string(),
            Error::RepositoryUnavailable(_) => "REPOSITORY_UNAVAILABLE".to_string(),
            Error::ProvisioningError { code, .. } => format!("PROVISIONING_ERROR:{code}"),
            Error::RouteConflict { .. } => "ROUTE_CONFLICT".to_string(),
            Error::ClusterUnavailable(_) => "CLUSTER_UNAVAILABLE".to_string(),
            Error::ConfigError(_) => "CONFIG_ERROR".to_string(),
            Error::Aborted(_) => "ABORTED".to_string(),
        }
    }

    pub fn provisioning(code: CauseCode, message: impl Into<String>) -> Self {
        Error::ProvisioningError {
            code,
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_code_carries_cause() {
        let err = Error::provisioning(CauseCode::QuotaExceeded, "exceeded quota: pods");
        assert_eq!(err.code(), "PROVISIONING_ERROR:QUOTA_EXCEEDED");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::RepositoryUnavailable("timeout".to_string()).is_retryable());
        assert!(Error::ClusterUnavailable("503".to_string()).is_retryable());
        assert!(!Error::NotFound("c42".to_string()).is_retryable());
    }
}
