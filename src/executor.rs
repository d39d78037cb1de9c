//! Bounded probe execution.
//!
//! Every network probe in the crate goes through [`ProbeExecutor`]: a
//! semaphore caps how many run at once, transient failures are retried with
//! a doubling delay, and a shared [`ProgressCounter`] is bumped exactly once
//! per probe no matter how many attempts it took.

use crate::config::RetryConfig;
use crate::{Result, ScanError};
use futures::stream::{self, StreamExt};
use log::{debug, trace};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.attempts, Duration::from_secs_f64(config.backoff.max(0.0)))
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Scanned/total counter shared between probes and whoever renders progress.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    scanned: AtomicU64,
    total: AtomicU64,
}

impl ProgressCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start a new run with a known amount of work.
    pub fn reset(&self, total: u64) {
        self.scanned.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn add_total(&self, extra: u64) {
        self.total.fetch_add(extra, Ordering::SeqCst);
    }

    pub fn increment(&self) {
        self.scanned.fetch_add(1, Ordering::SeqCst);
    }

    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn get_progress(&self) -> String {
        format!("{}/{}", self.scanned(), self.total())
    }
}

pub struct ProbeExecutor {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry: RetryPolicy,
    progress: Arc<ProgressCounter>,
}

impl ProbeExecutor {
    pub fn new(concurrency: usize, retry: RetryPolicy) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry,
            progress: ProgressCounter::new(),
        }
    }

    pub fn progress(&self) -> Arc<ProgressCounter> {
        Arc::clone(&self.progress)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run one probe behind the concurrency gate, retrying transient failures.
    ///
    /// The permit is held for the whole retry loop, backoff included, and is
    /// released when it goes out of scope whatever the outcome.
    pub async fn run<T, F, Fut>(&self, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ScanError::Unknown(format!("Probe gate closed: {}", e)))?;

        let mut attempt = 1;
        let outcome = loop {
            match probe().await {
                Ok(value) => break Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay_for(attempt);
                    trace!("Attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("Probe gave up after {} attempt(s): {}", attempt, e);
                    break Err(e);
                }
            }
        };

        self.progress.increment();
        outcome
    }

    /// Run `probe` over every input and return one result per input, in input order.
    ///
    /// A failing probe never aborts the batch; its error is returned in its slot.
    pub async fn run_all<I, T, F, Fut>(&self, inputs: &[I], probe: F) -> Vec<Result<T>>
    where
        F: Fn(&I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let probe = &probe;
        let tasks: Vec<_> = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| async move { (index, self.run(|| probe(input)).await) })
            .collect();

        let mut indexed: Vec<(usize, Result<T>)> = stream::iter(tasks)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    fn refused() -> ScanError {
        ScanError::Network(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let executor = ProbeExecutor::new(4, fast_retry());
        let inputs: Vec<u64> = (0..8).collect();

        let results = executor
            .run_all(&inputs, |n| {
                let n = *n;
                async move {
                    // Later inputs finish first
                    tokio::time::sleep(Duration::from_millis(40 - n * 5)).await;
                    Ok(n * 10)
                }
            })
            .await;

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let executor = ProbeExecutor::new(2, fast_retry());
        let calls = AtomicUsize::new(0);

        let result: Result<()> = executor
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.progress().scanned(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let executor = ProbeExecutor::new(1, fast_retry());
        let calls = AtomicUsize::new(0);

        let result = executor
            .run(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(ScanError::RateLimited { url: "http://t/".to_string() })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_transient_failure_stops_immediately() {
        let executor = ProbeExecutor::new(2, fast_retry());
        let calls = AtomicUsize::new(0);

        let result: Result<()> = executor
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ScanError::InvalidInput("malformed url".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(ScanError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_progress_counted_once() {
        let executor = ProbeExecutor::new(3, fast_retry());
        executor.progress().reset(20);
        let in_flight_count = AtomicUsize::new(0);
        let peak_count = AtomicUsize::new(0);
        let in_flight = &in_flight_count;
        let peak = &peak_count;
        let inputs: Vec<usize> = (0..20).collect();

        let results = executor
            .run_all(&inputs, move |n| {
                let n = *n;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    if n % 2 == 0 {
                        Ok(n)
                    } else {
                        Err(refused())
                    }
                }
            })
            .await;

        assert_eq!(results.len(), 20);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
        assert!(peak_count.load(Ordering::SeqCst) <= 3);
        assert_eq!(executor.progress().get_progress(), "20/20");
    }

    #[tokio::test]
    async fn test_run_all_inside_spawned_task() {
        // Scanners call run_all from `Send` futures
        let executor = Arc::new(ProbeExecutor::new(2, fast_retry()));
        let inputs: Vec<String> = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];

        let handle = tokio::spawn({
            let executor = Arc::clone(&executor);
            async move {
                executor
                    .run_all(&inputs, |word| {
                        let len = word.len();
                        async move { Ok(len) }
                    })
                    .await
            }
        });

        let lengths: Vec<usize> = handle.await.unwrap().into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(lengths, vec![1, 2, 3]);
        assert_eq!(executor.progress().scanned(), 3);
    }
}
