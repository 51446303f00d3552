use crate::{
    date_time::DateTime,
    error::{Error, Result},
    model::{DeploymentRecord, DeploymentState},
};
use chrono::Duration;

/// Parse a lifetime string like "2h", "30m" or "1h30m15s"
pub fn parse_timeout(timeout_str: &str) -> Result<Duration> {
    let mut total_seconds = 0i64;
    let mut current_num = String::new();

    for ch in timeout_str.trim().chars() {
        if ch.is_ascii_digit() {
            current_num.push(ch);
            continue;
        }
        if current_num.is_empty() {
            return Err(Error::ConfigError(format!(
                "Invalid timeout {timeout_str}: unit {ch} without a number"
            )));
        }

        let num: i64 = current_num
            .parse()
            .map_err(|_| Error::ConfigError(format!("Invalid number: {}", current_num)))?;

        let multiplier = match ch {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => {
                return Err(Error::ConfigError(format!(
                    "Invalid time unit: {}",
                    ch
                )))
            }
        };
        total_seconds = num
            .checked_mul(multiplier)
            .and_then(|seconds| total_seconds.checked_add(seconds))
            .ok_or_else(|| Error::ConfigError(format!("Timeout {timeout_str} is too large")))?;

        current_num.clear();
    }

    if !current_num.is_empty() {
        return Err(Error::ConfigError(
            "Timeout string must end with a unit (h/m/s)".to_string(),
        ));
    }
    if total_seconds <= 0 {
        return Err(Error::ConfigError(format!(
            "Timeout {timeout_str} must be longer than zero"
        )));
    }

    Duration::try_seconds(total_seconds)
        .ok_or_else(|| Error::ConfigError(format!("Invalid duration: {} seconds", total_seconds)))
}

/// Whether a record outlived its instance lifetime
pub fn is_expired(record: &DeploymentRecord, now: &DateTime) -> bool {
    record
        .expires_at
        .map(|expires_at| expires_at.is_before(now))
        .unwrap_or(false)
}

/// Whether a failed record has been kept around long enough
pub fn is_stale_failure(record: &DeploymentRecord, now: &DateTime, retention: Duration) -> bool {
    record.state == DeploymentState::Failed && record.updated_at.after(retention).is_before(now)
}
