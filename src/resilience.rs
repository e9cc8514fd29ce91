//! Retry policy and timeouts for compound dispatch.
//!
//! Servers answer with a handful of transient statuses (busy, grace
//! period after restart, layout not yet available). Those are retried
//! after a random pause; everything else is final.

use crate::config::humantime_serde;
use crate::error::{Nfs4Error, Result};
use crate::nfs::NfsStatus;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Upper bound of the random pause before a retry.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Total attempts per compound; `None` retries until the server relents.
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    /// No pause between attempts.
    pub fn immediate() -> Self {
        Self {
            max_delay: Duration::ZERO,
            max_attempts: None,
        }
    }
}

/// What to do with a failed compound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send again after the delay.
    Retry(Duration),
    /// Surface the status to the caller.
    Fatal,
}

/// Classifies compound statuses into retry decisions.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide how to handle a non-OK compound status.
    pub fn classify(&self, status: NfsStatus) -> RetryDecision {
        if status.is_retryable() {
            RetryDecision::Retry(self.delay())
        } else {
            RetryDecision::Fatal
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_another(&self, attempts: u32) -> bool {
        self.config.max_attempts.map_or(true, |max| attempts < max)
    }

    fn delay(&self) -> Duration {
        let max_ms = self.config.max_delay.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

// ============================================================================
// Timeout Wrapper
// ============================================================================

/// Run `fut`, failing with [`Nfs4Error::Timeout`] naming `what` once
/// `timeout` passes.
pub async fn with_timeout<F, T>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Nfs4Error::Timeout(format!("{} after {:?}", what, timeout)))?
}
