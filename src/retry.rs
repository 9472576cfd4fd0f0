use std::time::Duration;

use tracing::warn;

use crate::error::BrowseResult;
use crate::pacing::Pacer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_factor,
        }
    }

    /// Wait before attempt `attempt + 1` (attempt counts from 1).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.initial_delay.mul_f64(self.backoff_factor.powi(exponent))
    }
}

/// Run `op` until it succeeds, fails fatally, or runs out of attempts.
///
/// Session loss is returned on the spot: retrying against a dead browser
/// only burns time the orchestrator needs for recreation.
pub fn with_retry<T, F>(policy: &RetryPolicy, pacer: &dyn Pacer, label: &str, mut op: F) -> BrowseResult<T>
where
    F: FnMut() -> BrowseResult<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:.1}s",
                    label,
                    attempt,
                    policy.max_attempts,
                    e,
                    delay.as_secs_f64()
                );
                pacer.pause(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrowseError;
    use crate::pacing::recording::RecordingPacer;

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, Duration::from_secs(2), 1.5)
    }

    #[test]
    fn test_session_loss_is_not_retried() {
        let pacer = RecordingPacer::default();
        let mut calls = 0;
        let result: BrowseResult<()> = with_retry(&policy(5), &pacer, "enrich", || {
            calls += 1;
            Err(BrowseError::SessionLost("Target closed".into()))
        });
        assert!(matches!(result, Err(BrowseError::SessionLost(_))));
        assert_eq!(calls, 1);
        assert!(pacer.fixed_waits().is_empty());
    }

    #[test]
    fn test_timeouts_retry_with_growing_delay() {
        let pacer = RecordingPacer::default();
        let mut calls = 0;
        let result: BrowseResult<()> = with_retry(&policy(4), &pacer, "enrich", || {
            calls += 1;
            Err(BrowseError::Timeout("detail page".into()))
        });
        assert!(matches!(result, Err(BrowseError::Timeout(_))));
        assert_eq!(calls, 4);

        let waits = pacer.fixed_waits();
        assert_eq!(
            waits,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_millis(4500)
            ]
        );
        assert!(waits.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_success_after_transient_failure() {
        let pacer = RecordingPacer::default();
        let mut calls = 0;
        let result = with_retry(&policy(2), &pacer, "mine", || {
            calls += 1;
            if calls == 1 {
                Err(BrowseError::Interaction("node detached".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(pacer.fixed_waits().len(), 1);
    }
}
