use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::config::ExecutionConfig;
use crate::error::{Result, TradelaneError};

/// Bounded exponential backoff for transient provider errors.
///
/// Validation errors and terminal provider outcomes are never retried; only
/// errors classified transient by `TradelaneError::is_transient` are.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_execution(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            ..Self::default()
        }
    }

    /// Exponential delay for the given attempt (1-based) with jitter
    fn delay_for(&self, attempt: u8) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << attempt.min(16) as u32);
        let capped = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
        capped + Duration::from_millis(jitter)
    }
}

/// Run `operation` until it succeeds, fails non-transiently, or the attempt
/// bound is exhausted. Exhaustion surfaces as a terminal provider failure;
/// nothing is ever retried silently beyond the bound.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts: u8 = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempts < policy.max_attempts => {
                let delay = policy.delay_for(attempts);
                warn!(
                    "{} attempt {} failed: {}. Retrying in {:?}",
                    op_name, attempts, e, delay
                );
                sleep(delay).await;
            }
            Err(e) if e.is_transient() => {
                error!("{} failed after {} attempts: {}", op_name, attempts, e);
                return Err(TradelaneError::ProviderUnavailable(format!(
                    "{op_name} failed after {attempts} attempts: {e}"
                )));
            }
            Err(e) => return Err(e),
        }
    }
}
