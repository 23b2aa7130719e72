//! Bounded polling of CA resources
//!
//! Authorization and order status are re-fetched with exponential backoff
//! until they settle or the policy's timeout expires. A timeout surfaces as
//! [`CertError::IssuanceTimeout`] and leaves persisted state as it was, so
//! the caller can simply retry.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use dnsproof_config::PollingConfig;

use super::error::CertError;

/// Deadline used when the timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Result of one poll
#[derive(Debug)]
pub enum PollStep<T> {
    Ready(T),
    Pending,
}

/// Backoff schedule for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: u32,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            backoff_factor: config.backoff_factor.max(1),
            max_delay: config.max_delay(),
            timeout: config.timeout(),
        }
    }

    /// Same schedule, waiting at least `timeout` in total
    pub fn with_min_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: self.timeout.max(timeout),
            ..self
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay
            .checked_mul(self.backoff_factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Call `check` until it reports ready, sleeping between calls.
    ///
    /// The first call happens immediately. `stage` and `domain` only feed
    /// logging and the timeout error.
    pub async fn poll<T, F, Fut>(
        &self,
        stage: &'static str,
        domain: &str,
        mut check: F,
    ) -> Result<T, CertError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStep<T>, CertError>>,
    {
        let start = Instant::now();
        let deadline = start
            .checked_add(self.timeout)
            .unwrap_or_else(|| start + FAR_FUTURE);
        let mut delay = self.initial_delay;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let PollStep::Ready(value) = check().await? {
                trace!(stage, domain = %domain, attempts, "Poll settled");
                return Ok(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CertError::IssuanceTimeout {
                    domain: domain.to_string(),
                    stage,
                    waited: now - start,
                });
            }

            let sleep_for = delay.min(deadline - now);
            trace!(
                stage,
                domain = %domain,
                attempts,
                delay_ms = sleep_for.as_millis() as u64,
                "Not settled yet, waiting"
            );
            tokio::time::sleep(sleep_for).await;
            delay = self.next_delay(delay);
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}
