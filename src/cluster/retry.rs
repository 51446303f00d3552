use crate::{
    config::ManagerConfig,
    error::{CauseCode, Error},
};
use rand::Rng;
use std::{future::Future, time::Duration};
use tracing::warn;

/// Bounded exponential backoff for control-plane calls
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            attempts: config.cluster_retry_attempts.max(1),
            base: Duration::from_millis(config.cluster_retry_base_ms),
            max: Duration::from_millis(config.cluster_retry_max_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt capped at max,
    /// plus up to 50% jitter, never exceeding max
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max);
        let jitter_ms = (exp.as_millis() as u64) / 2;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        (exp + jitter).min(self.max)
    }
}

/// Whether a failed call is worth repeating unchanged
pub fn is_transient(e: &kube::Error) -> bool {
    match e {
        // AlreadyExists is an answer, not a race
        kube::Error::Api(ae) if ae.code == 409 => ae.reason != "AlreadyExists",
        kube::Error::Api(ae) => matches!(ae.code, 429 | 500 | 502 | 503 | 504),
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Run `op`, retrying transient errors. The last error is returned unchanged
/// once retries are exhausted so callers can still match on it.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> std::result::Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, kube::Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if is_transient(&e) && attempt + 1 < policy.attempts => {
                let delay = policy.backoff(attempt);
                warn!(call = what, attempt = attempt + 1, ?delay, error = %e, "Transient control-plane error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Map a control-plane error that was not handled by the caller
pub fn classify(e: kube::Error) -> Error {
    if is_transient(&e) {
        return Error::ClusterUnavailable(e.to_string());
    }
    match &e {
        kube::Error::Api(ae) if ae.code == 400 || ae.code == 422 => {
            Error::provisioning(CauseCode::InvalidDefinition, ae.message.clone())
        }
        kube::Error::Api(ae) if ae.code == 403 && ae.message.contains("exceeded quota") => {
            Error::provisioning(CauseCode::QuotaExceeded, ae.message.clone())
        }
        kube::Error::Api(ae) if ae.code == 403 => {
            Error::provisioning(CauseCode::Forbidden, ae.message.clone())
        }
        _ => Error::provisioning(CauseCode::ControlPlane, e.to_string()),
    }
}
