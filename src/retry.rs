//! Retry with exponential backoff for rate-limited upstream calls
//!
//! Only an upstream HTTP 429 is treated as transient. Everything else, and a 429 on
//! the final attempt, is handed back to the caller unchanged.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::debug::DebugTrail;
use crate::error::PipelineError;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,

    /// Wait before the second attempt
    pub initial_delay: Duration,

    /// Factor applied to the wait after every retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier).unwrap_or(delay)
    }
}

/// Run `operation` until it succeeds, fails with something other than a 429, or the
/// attempt budget runs out.
///
/// Each failed attempt's upstream error body is filed in the trail, and each retry adds
/// a "Rate limited, attempt i/max. Waiting Nms..." step. The wait is a
/// `tokio::time::sleep`, so other requests keep being served meanwhile.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    trail: &mut DebugTrail,
    mut operation: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        trail.record_api_error(&err);

        if !err.is_rate_limited() || attempt >= max_attempts {
            return Err(err);
        }

        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Rate limited, backing off"
        );
        trail.step(format!(
            "Rate limited, attempt {}/{}. Waiting {}ms...",
            attempt,
            max_attempts,
            delay.as_millis()
        ));

        tokio::time::sleep(delay).await;
        delay = policy.next_delay(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::ApiErrorSummary;
    use tokio::time::Instant;

    fn rate_limited() -> PipelineError {
        PipelineError::TranscriptionService(ApiErrorSummary {
            status: 429,
            status_text: "Too Many Requests".to_string(),
            error: r#"{"error":"rate_limit_exceeded"}"#.to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_operation_runs_once() {
        let mut trail = DebugTrail::default();
        let mut calls = 0;

        let result = retry_with_backoff(&RetryPolicy::default(), &mut trail, || {
            calls += 1;
            async { Ok::<_, PipelineError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
        assert!(trail.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_rate_limits_then_success_waits_1000_then_2000() {
        let mut trail = DebugTrail::default();
        let mut calls = 0;
        let started = Instant::now();

        let result = retry_with_backoff(&RetryPolicy::default(), &mut trail, || {
            calls += 1;
            let call = calls;
            async move {
                if call <= 2 {
                    Err(rate_limited())
                } else {
                    Ok("transcript")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "transcript");
        assert_eq!(calls, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(
            trail.steps,
            vec![
                "Rate limited, attempt 1/3. Waiting 1000ms...".to_string(),
                "Rate limited, attempt 2/3. Waiting 2000ms...".to_string(),
            ]
        );
        // the 429 bodies stay visible even though the call recovered
        assert_eq!(trail.api_responses.whisper_error.as_ref().unwrap().status, 429);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_returns_last_error_without_a_third_wait() {
        let mut trail = DebugTrail::default();
        let mut calls = 0;
        let started = Instant::now();

        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::default(), &mut trail, || {
            calls += 1;
            async { Err(rate_limited()) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::TranscriptionService(ref s) if s.status == 429));
        assert_eq!(calls, 3);
        assert_eq!(trail.steps.len(), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_error_is_not_retried() {
        let mut trail = DebugTrail::default();
        let mut calls = 0;

        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::default(), &mut trail, || {
            calls += 1;
            async {
                Err(PipelineError::ChatService(ApiErrorSummary {
                    status: 500,
                    status_text: "Internal Server Error".to_string(),
                    error: "boom".to_string(),
                }))
            }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::ChatService(_))));
        assert_eq!(calls, 1);
        assert!(trail.steps.is_empty());
        assert_eq!(trail.api_responses.gpt_error.as_ref().unwrap().status, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempt_policy_still_runs_once() {
        let mut trail = DebugTrail::default();
        let mut calls = 0;
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };

        let result: Result<(), _> = retry_with_backoff(&policy, &mut trail, || {
            calls += 1;
            async { Err(rate_limited()) }
        })
        .await;

        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(calls, 1);
        assert!(trail.steps.is_empty());
    }

    #[test]
    fn test_delay_grows_by_multiplier() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(Duration::from_millis(1000)), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(Duration::from_millis(2000)), Duration::from_millis(4000));
    }
}
