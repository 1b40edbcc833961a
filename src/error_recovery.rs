//! Automatic error recovery for device queries.
//!
//! A failed query is retried after a backoff delay, resetting the device (close and
//! reopen its connection) between attempts. Used by the timing loop and the poller so
//! a single serial hiccup does not abort an ensemble.

use crate::error::DaqError;
use crate::instrument::Device;
use crate::measurement::Reading;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    100
}

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// The maximum number of attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// The delay between attempts, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Pause between a failed attempt and the next one.
    pub fn backoff_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Query `device`, resetting and retrying according to `policy`.
///
/// Returns the last failure wrapped in [`DaqError::Instrument`] once every attempt
/// is spent.
pub async fn query_with_retry(
    device: &mut dyn Device,
    policy: &RetryPolicy,
) -> anyhow::Result<Reading> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match device.query().await {
            Ok(reading) => return Ok(reading),
            Err(e) => {
                warn!(
                    "Query of '{}' failed (attempt {}/{}): {:#}",
                    device.name(),
                    attempt,
                    attempts,
                    e
                );
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            sleep(policy.backoff_delay()).await;
            if let Err(e) = device.reset().await {
                warn!("Reset of '{}' failed: {:#}", device.name(), e);
            }
        }
    }

    let detail = last_error
        .map(|e| format!("{:#}", e))
        .unwrap_or_default();
    Err(DaqError::Instrument(format!(
        "'{}' failed after {} attempt(s): {}",
        device.name(),
        attempts,
        detail
    ))
    .into())
}
