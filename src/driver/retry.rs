//! Retry policy for managed units of work.
//!
//! Failures are classified through [`DriverError::category`]; retryable ones
//! are retried with exponential backoff and jitter until a total elapsed
//! deadline, after which the last failure is re-raised together with the
//! attempt count. Non-retryable failures surface immediately, with no delay.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use super::error::{DriverError, DriverResult};

/// Backoff and deadline settings for retried work.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Relative jitter applied to each delay (0.2 = ±20%)
    pub jitter: f64,
    /// Total elapsed time budget across attempts
    pub max_retry_time: Duration,
}

impl RetryPolicy {
    /// Default backoff with the given total deadline.
    pub fn new(max_retry_time: Duration) -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
            max_retry_time,
        }
    }

    /// Fully custom settings.
    pub fn with_backoff(
        mut self,
        initial_delay: Duration,
        max_delay: Duration,
        jitter: f64,
    ) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Begin tracking one retried operation.
    pub fn start(&self) -> RetryState {
        RetryState {
            policy: self.clone(),
            started: Instant::now(),
            attempts: 0,
            backoff: self.initial_delay,
        }
    }

    /// Run `work` until it succeeds, its failure is terminal, or the retry
    /// deadline passes. Every attempt must build its own state from scratch:
    /// partial work from a failed attempt must not be assumed committed.
    pub async fn execute<T, F, Fut>(&self, mut work: F) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let mut state = self.start();
        loop {
            match work().await {
                Ok(value) => return Ok(value),
                Err(e) => match state.next_delay(&e) {
                    Some(delay) => {
                        debug!(error = %e, ?delay, attempt = state.attempts(), "retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(state.give_up(e)),
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Progress of one retried operation.
pub struct RetryState {
    policy: RetryPolicy,
    started: Instant,
    attempts: u32,
    backoff: Duration,
}

impl RetryState {
    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt. Returns the delay to sleep before the next
    /// attempt, or `None` when the failure is terminal or the deadline is
    /// spent.
    pub fn next_delay(&mut self, error: &DriverError) -> Option<Duration> {
        self.attempts += 1;

        if !error.is_retryable() {
            return None;
        }

        let delay = self.jittered(self.backoff);
        if self.started.elapsed() + delay > self.policy.max_retry_time {
            return None;
        }

        self.backoff = (self.backoff * 2).min(self.policy.max_delay);
        Some(delay)
    }

    /// Final error after giving up: the bare failure for a first-attempt
    /// terminal error, or the failure wrapped with the attempt count when
    /// retries were involved.
    pub fn give_up(self, error: DriverError) -> DriverError {
        if self.attempts > 1 {
            DriverError::RetriesExhausted { attempts: self.attempts, last: Box::new(error) }
        } else {
            error
        }
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.policy.jitter <= 0.0 {
            return base;
        }
        let spread = self.policy.jitter;
        let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        base.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::sync::Mutex;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(5)).with_backoff(
            Duration::from_millis(5),
            Duration::from_millis(80),
            0.2,
        )
    }

    fn transient() -> DriverError {
        DriverError::service_unavailable("flaky")
    }

    #[tokio::test]
    async fn succeeds_after_two_retries_with_monotonic_backoff() {
        let policy = fast_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let delays = Arc::new(Mutex::new(Vec::new()));

        let mut state = policy.start();
        let result = loop {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let outcome: DriverResult<u32> = if n < 2 { Err(transient()) } else { Ok(99) };
            match outcome {
                Ok(v) => break v,
                Err(e) => {
                    let delay = state.next_delay(&e).expect("should retry");
                    delays.lock().unwrap().push(delay);
                    tokio::time::sleep(delay).await;
                }
            }
        };

        assert_eq!(result, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let delays = delays.lock().unwrap();
        assert_eq!(delays.len(), 2);
        assert!(delays[1] >= delays[0], "backoff must not shrink: {:?}", delays);
    }

    #[tokio::test]
    async fn execute_retries_and_returns_the_value() {
        let policy = fast_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value = policy
            .execute(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately_without_delay() {
        let policy = fast_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let started = Instant::now();
        let err = policy
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DriverError::client("misuse"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, DriverError::Client(_)));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn deadline_exhaustion_wraps_with_attempt_count() {
        let policy = RetryPolicy::new(Duration::from_millis(30)).with_backoff(
            Duration::from_millis(10),
            Duration::from_millis(10),
            0.0,
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = policy
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await
            .unwrap_err();

        match err {
            DriverError::RetriesExhausted { attempts, last } => {
                assert!(attempts >= 2);
                assert_eq!(attempts, calls.load(Ordering::SeqCst));
                assert!(last.is_retryable());
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(Duration::from_secs(600)).with_backoff(
            Duration::from_millis(100),
            Duration::from_millis(350),
            0.0,
        );
        let mut state = policy.start();
        let err = transient();
        assert_eq!(state.next_delay(&err), Some(Duration::from_millis(100)));
        assert_eq!(state.next_delay(&err), Some(Duration::from_millis(200)));
        assert_eq!(state.next_delay(&err), Some(Duration::from_millis(350)));
        assert_eq!(state.next_delay(&err), Some(Duration::from_millis(350)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(Duration::from_secs(600)).with_backoff(
            Duration::from_millis(100),
            Duration::from_secs(10),
            0.2,
        );
        let err = transient();
        for _ in 0..50 {
            let mut state = policy.start();
            let delay = state.next_delay(&err).unwrap();
            assert!(delay >= Duration::from_millis(80), "{:?}", delay);
            assert!(delay <= Duration::from_millis(120), "{:?}", delay);
        }
    }

    #[test]
    fn first_attempt_terminal_error_is_not_wrapped() {
        let policy = fast_policy();
        let mut state = policy.start();
        let err = DriverError::client("bad");
        assert!(state.next_delay(&err).is_none());
        let surfaced = state.give_up(err);
        assert!(matches!(surfaced, DriverError::Client(_)));
    }
}
