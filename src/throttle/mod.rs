//! Bounded-concurrency and delay-spaced task execution
//!
//! [`ConcurrencyLimiter`] caps how many async tasks are in flight at once and is
//! shared by the crawler (pagination pages) and the sync orchestrator (subject
//! workloads). [`run_with_delay`] dispatches one worker per item with a fixed
//! gap between dispatches, substituting a default value for failed items.

use futures::future::join_all;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Runs at most `limit` tasks concurrently
///
/// Tasks wait for a permit in submission order (the underlying semaphore is
/// fair); completion order is unconstrained. A task's failure is only visible
/// through its own return value.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter; a limit of zero is treated as one
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of tasks currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Run `task` once a permit is available and return its output
    pub async fn run<F, Fut, R>(&self, task: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        // The semaphore is never closed, so acquisition only fails if that
        // changes; the task still runs rather than being dropped.
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                tracing::warn!(error = %e, "Concurrency limiter closed, running unbounded");
                None
            }
        };
        task().await
    }

    /// Run every item through `worker` under the limit, keeping input order
    pub async fn run_all<I, F, Fut, R>(&self, items: I, worker: F) -> Vec<R>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = R>,
    {
        let futures = items
            .into_iter()
            .map(|item| self.run(|| worker(item)));
        join_all(futures).await
    }
}

/// Dispatch `worker(item)` for each item, `delay` apart, and await them all
///
/// Item `i` starts `i * delay` after the call; workers may overlap when one
/// takes longer than the gap. A failing item is logged and replaced by
/// `R::default()` so the rest of the batch is unaffected. Results keep input
/// order.
pub async fn run_with_delay<T, F, Fut, R, E>(items: Vec<T>, worker: F, delay: Duration) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    R: Default,
    E: Display,
{
    let futures = items.into_iter().enumerate().map(|(index, item)| {
        let offset = delay.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
        let work = worker(item);
        async move {
            if !offset.is_zero() {
                tokio::time::sleep(offset).await;
            }
            match work.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Delayed task failed, using empty result");
                    R::default()
                }
            }
        }
    });
    join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_limiter_bounds_in_flight_tasks() {
        let limiter = ConcurrencyLimiter::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = limiter
            .run_all(0..10, |i| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + (i % 3) * 5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    i * 2
                }
            })
            .await;

        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_affect_others() {
        let limiter = ConcurrencyLimiter::new(2);
        let results: Vec<Result<u32, String>> = limiter
            .run_all(0..4u32, |i| async move {
                if i == 1 {
                    Err("boom".to_string())
                } else {
                    Ok(i)
                }
            })
            .await;

        assert_eq!(results[0], Ok(0));
        assert!(results[1].is_err());
        assert_eq!(results[3], Ok(3));
    }

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.limit(), 1);
        assert_eq!(limiter.run(|| async { 7 }).await, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_delay_spaces_dispatches() {
        let start = Instant::now();
        let results = run_with_delay(
            vec![1u64, 2, 3],
            |n| async move {
                let started = start.elapsed();
                // Long work: completions would be 500ms apart if spacing were by completion
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, String>((n, started))
            },
            Duration::from_millis(200),
        )
        .await;

        let ms = |i: usize| results[i].1.as_millis();
        assert!(ms(0) < 50);
        assert!((200..250).contains(&ms(1)));
        assert!((400..450).contains(&ms(2)));
        // The last dispatch plus its work, not the sum of all work
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_run_with_delay_substitutes_default_on_failure() {
        let results: Vec<Vec<u32>> = run_with_delay(
            vec![1u32, 2, 3],
            |n| async move {
                if n == 2 {
                    Err("subfolder unavailable")
                } else {
                    Ok(vec![n])
                }
            },
            Duration::ZERO,
        )
        .await;

        assert_eq!(results, vec![vec![1], vec![], vec![3]]);
    }
}
