//! Bounded task group for independent registry requests.

use std::future::Future;
use std::sync::Arc;

use cnab_oci_core::{CnabError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::Context;

/// Run `task` for every item with at most `limit` in flight.
///
/// Each task writes only its own result slot; the slots are returned in
/// item order once every task has finished. The first failure aborts the
/// remaining tasks, and a done context always surfaces as a single
/// [`CnabError::Cancelled`].
pub(crate) async fn run_bounded<I, T, F, Fut>(
    ctx: &Context,
    limit: usize,
    items: Vec<I>,
    task: F,
) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    ctx.check()?;

    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(items.len()).collect();

    for (slot, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let ctx = ctx.clone();
        let fut = task(item);
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| CnabError::Cancelled("task group closed".to_string()))?;
            let value = ctx.run(fut).await?;
            Ok::<_, CnabError>((slot, value))
        });
    }

    while let Some(joined) = set.join_next().await {
        let failure = match joined {
            Ok(Ok((slot, value))) => {
                slots[slot] = Some(value);
                continue;
            }
            Ok(Err(err)) => err,
            Err(join_err) => CnabError::RegistryError {
                registry: "-".to_string(),
                message: format!("registry task failed: {}", join_err),
            },
        };

        set.abort_all();
        return Err(match ctx.check() {
            Err(cancelled) => cancelled,
            Ok(()) => failure,
        });
    }

    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_item_order() {
        let ctx = Context::background();
        let items = vec![30u64, 10, 20];
        let results = run_bounded(&ctx, 3, items, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .await
        .unwrap();
        assert_eq!(results, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_respects_limit() {
        let ctx = Context::background();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..8).collect();

        run_bounded(&ctx, 2, items, |_| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_first_error_is_returned() {
        let ctx = Context::background();
        let err = run_bounded(&ctx, 4, vec![1, 2, 3], |n| async move {
            if n == 2 {
                Err(CnabError::MalformedArtifact(format!("item {}", n)))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Malformed artifact: item 2");
    }

    #[tokio::test]
    async fn test_cancellation_is_aggregated() {
        let (ctx, handle) = Context::with_cancel();
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let err = run_bounded(&ctx, 4, vec![1, 2, 3, 4], |_| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        cancel.await.unwrap();
        assert!(matches!(err, CnabError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_empty_items() {
        let ctx = Context::background();
        let results: Vec<()> = run_bounded(&ctx, 4, Vec::<u8>::new(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
