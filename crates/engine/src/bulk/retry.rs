use std::future::Future;

use crate::{ResultEngine, settings::RetrySettings};

/// Run `op`, retrying transient failures with exponential backoff.
///
/// `op` runs once, then up to `settings.max_retries` more times while it
/// fails with an error for which [`EngineError::is_transient`] holds. Retry
/// `k` waits [`RetrySettings::delay_for`]`(k)` first. The last error is
/// returned once retries are exhausted; other errors are returned at once.
///
/// [`EngineError::is_transient`]: crate::EngineError::is_transient
pub async fn retry_with_backoff<T, F, Fut>(
    settings: &RetrySettings,
    label: &str,
    mut op: F,
) -> ResultEngine<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ResultEngine<T>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && retries < settings.max_retries => {
                retries += 1;
                let delay = settings.delay_for(retries);
                tracing::warn!(
                    "{label} failed: {err}; retry {retries}/{} in {delay:?}",
                    settings.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if retries > 0 {
                    tracing::error!("{label} failed after {retries} retries: {err}");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use tokio::time::Instant;

    use super::*;
    use crate::EngineError;

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_with_backoff() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let result = retry_with_backoff(&RetrySettings::default(), "commit", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EngineError::Store("unavailable".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s before the first retry, 2s before the second.
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let result: ResultEngine<()> = retry_with_backoff(&RetrySettings::default(), "commit", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Store("down".to_string()))
        })
        .await;

        assert_eq!(result, Err(EngineError::Store("down".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: ResultEngine<()> = retry_with_backoff(&RetrySettings::default(), "commit", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Validation("bad".to_string()))
        })
        .await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
