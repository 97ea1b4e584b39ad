//! Bounded task group for per-key calls.

use std::sync::Arc;

use futures::future::{BoxFuture, join_all};
use tokio::sync::Semaphore;

use crate::{Error, Result};

/// Spawns one task per unit of work and awaits them all.
///
/// At most as many tasks as the limiter has permits run at once. A failing
/// task never cancels its siblings. Results keep the order of `work`.
pub(crate) async fn fan_out<T>(
    limiter: &Arc<Semaphore>,
    work: Vec<BoxFuture<'static, Result<T>>>,
) -> Vec<Result<T>>
where
    T: Send + 'static,
{
    let handles: Vec<_> = work
        .into_iter()
        .map(|task| {
            let limiter = Arc::clone(limiter);
            tokio::spawn(async move {
                // Hold the permit until the call completes.
                let _permit = limiter.acquire_owned().await?;
                task.await
            })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap_or_else(|e| Err(Error::Task(e))))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn keeps_order_and_isolates_failures() {
        let limiter = Arc::new(Semaphore::new(2));
        let work = (0..5u64)
            .map(|index| {
                async move {
                    tokio::time::sleep(Duration::from_millis(10 * (5 - index))).await;
                    if index == 2 {
                        Err(Error::InvalidRequest("boom".to_string()))
                    } else {
                        Ok(index)
                    }
                }
                .boxed()
            })
            .collect();

        let results = fan_out(&limiter, work).await;
        assert_eq!(results.len(), 5);
        assert!(results[2].is_err());
        let ok: Vec<u64> = results.into_iter().filter_map(Result::ok).collect();
        assert_eq!(ok, vec![0, 1, 3, 4]);
    }

    #[tokio::test]
    async fn respects_limit() {
        let limiter = Arc::new(Semaphore::new(3));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let work = (0..12)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
            .collect();

        let results = fan_out(&limiter, work).await;
        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    fn explode() -> Result<()> {
        panic!("task exploded")
    }

    #[tokio::test]
    async fn panics_become_task_errors() {
        let limiter = Arc::new(Semaphore::new(1));
        let work: Vec<BoxFuture<'static, Result<()>>> =
            vec![async { explode() }.boxed(), async { Ok(()) }.boxed()];

        let results = fan_out(&limiter, work).await;
        assert!(matches!(results[0], Err(Error::Task(_))));
        assert!(results[1].is_ok());
    }
}
