//! Bounded polling for external readiness.
//!
//! The CI control plane and freshly started containers become usable at
//! some unknown point after start. Callers probe them at a fixed interval
//! until they answer, giving up with `ReadinessError::NotReady` once the
//! attempt budget is spent.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::errors::ReadinessError;

/// Result of one readiness probe.
#[derive(Debug)]
pub enum Probe<T> {
    Ready(T),
    /// Not ready yet; the string says why (logged at debug).
    Pending(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    /// Total probes before giving up (at least one probe always runs).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between probes.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    300
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl ReadinessPolicy {
    pub fn new(max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            max_attempts,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Run `probe` until it reports ready, errors, or the budget runs out.
    ///
    /// Errors returned by `probe` are not retried: only `Probe::Pending`
    /// means "try again".
    pub async fn wait_for<T, E, F, Fut>(&self, what: &str, mut probe: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, E>>,
        E: From<ReadinessError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match probe().await? {
                Probe::Ready(value) => return Ok(value),
                Probe::Pending(reason) => {
                    tracing::debug!(what, attempt, reason = %reason, "waiting on {}", what);
                    last = reason;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.interval()).await;
            }
        }
        Err(ReadinessError::NotReady {
            what: what.to_string(),
            attempts,
            last,
        }
        .into())
    }
}
